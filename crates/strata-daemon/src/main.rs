//! strata-daemon: runs one Strata relay node.
//!
//! Binds a QUIC endpoint, builds the onion engine with a fresh identity,
//! advertises itself to the configured peers and relays until Ctrl-C.

mod config;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use strata_crypto::ed25519::SigningKey;
use strata_crypto::x25519::X25519StaticSecret;
use strata_onion::engine::{engine_channels, Engine};
use strata_onion::layers::Layer;
use strata_transport::quic::{accept_loop, QuicConfig, QuicNode, QuicTransport};

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config (it names the log level)
    let config = DaemonConfig::load()?;

    // 2. Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("strata={}", config.logging.level).parse()?),
        )
        .init();

    info!("Strata daemon starting");

    // 3. Bind QUIC
    let node = Arc::new(QuicNode::new(QuicConfig {
        bind_addr: config.network.listen_addr,
        ..QuicConfig::default()
    })?);
    let addr = node.local_addr();

    // 4. Build the engine
    let engine_config = config.engine_config();
    let (handles, inbox) = engine_channels(engine_config.channel_capacity);
    let transport = Arc::new(QuicTransport::new(Arc::clone(&node))?);
    let engine = Arc::new(Engine::new(
        engine_config,
        X25519StaticSecret::random(),
        SigningKey::generate(),
        addr,
        transport,
        handles.clone(),
    )?);
    for peer in config.peers()? {
        engine.add_peer(peer);
    }
    info!(
        %addr,
        identity = %hex::encode(engine.identity().to_bytes()),
        signing = %hex::encode(engine.local_node().signing),
        peers = engine.manager().node_count(),
        "node ready"
    );

    // 5. Start accepting and dispatching
    let accept = tokio::spawn(accept_loop(Arc::clone(&node), handles.inbound.clone()));
    let mut runner = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run(inbox).await }
    });

    // 6. Announce ourselves
    let ttl = Duration::from_secs(config.network.ad_ttl_secs);
    let sent = engine.advertise(&[
        Layer::PeerAd(engine.peer_ad(ttl)),
        Layer::AddressAd(engine.address_ad(ttl)),
    ]);
    info!(sent, "ads sent");

    // 7. Run until Ctrl-C or the engine stops
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Ctrl-C received, shutting down");
        }
        _ = &mut runner => {
            warn!("engine stopped unexpectedly");
        }
    }

    // Graceful shutdown
    engine.shutdown();
    node.close();
    accept.abort();
    if !runner.is_finished() {
        let _ = runner.await;
    }

    info!("Daemon stopped");
    Ok(())
}
