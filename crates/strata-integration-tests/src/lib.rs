//! Multi-node test harness for Strata.
//!
//! A [`Cluster`] runs several engines over one [`SimNetwork`], each with its
//! dispatch loop on its own task and every other node in its node table.
//! The scenarios themselves live in `tests/`.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p strata-integration-tests
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use strata_crypto::ed25519::SigningKey;
use strata_crypto::x25519::X25519StaticSecret;
use strata_onion::engine::{engine_channels, Engine, EngineConfig, EngineHandles};
use strata_onion::pending::Callback;
use strata_transport::sim::SimNetwork;
use strata_types::Id;

/// How long a scenario waits for any single reply.
pub const REPLY_WAIT: Duration = Duration::from_secs(5);

pub struct TestNode {
    pub engine: Arc<Engine>,
    pub handles: EngineHandles,
    runner: JoinHandle<()>,
}

impl TestNode {
    pub fn addr(&self) -> SocketAddr {
        self.engine.local_node().addr
    }

    /// Bind `port` to a service that answers every request with
    /// `prefix || request`.
    pub fn bind_echo(&self, port: u16, prefix: &'static [u8]) {
        let mut handle = self.engine.services().bind(port);
        tokio::spawn(async move {
            while let Some(request) = handle.recv().await {
                let mut reply = prefix.to_vec();
                reply.extend_from_slice(&request);
                if !handle.reply(reply).await {
                    break;
                }
            }
        });
    }
}

pub struct Cluster {
    pub net: SimNetwork,
    pub nodes: Vec<TestNode>,
}

impl Cluster {
    /// Start `count` fully meshed nodes on `net`, on ports from `base_port`.
    pub fn start(net: SimNetwork, count: usize, base_port: u16, config: EngineConfig) -> anyhow::Result<Self> {
        let mut nodes = Vec::with_capacity(count);
        for i in 0..count {
            let port = base_port + u16::try_from(i)?;
            let addr = SocketAddr::from(([127, 0, 0, 1], port));
            let identity = X25519StaticSecret::random();
            let (handles, inbox) = engine_channels(config.channel_capacity);
            let transport = net.attach(addr, identity.clone(), handles.inbound.clone())?;
            let engine = Arc::new(Engine::new(
                config.clone(),
                identity,
                SigningKey::generate(),
                addr,
                Arc::new(transport),
                handles.clone(),
            )?);
            let runner = tokio::spawn({
                let engine = Arc::clone(&engine);
                async move { engine.run(inbox).await }
            });
            nodes.push(TestNode {
                engine,
                handles,
                runner,
            });
        }

        for node in &nodes {
            for peer in &nodes {
                node.engine.add_peer(peer.engine.local_node().clone());
            }
        }
        Ok(Self { net, nodes })
    }

    pub fn node(&self, i: usize) -> &TestNode {
        &self.nodes[i]
    }

    pub fn by_addr(&self, addr: SocketAddr) -> Option<&TestNode> {
        self.nodes.iter().find(|n| n.addr() == addr)
    }

    /// Buy a five-hop circuit for node `client`: pay every relay, send the
    /// purchase onion and wait for its confirmation. Returns the session ids
    /// in hop order.
    pub async fn buy_circuit(&self, client: usize, amount: u64) -> anyhow::Result<Vec<Id>> {
        let engine = &self.node(client).engine;
        let purchase = engine.prepare_purchase(amount)?;
        let ids: Vec<Id> = purchase.invoices.iter().map(|i| i.payment_id).collect();

        for invoice in &purchase.invoices {
            let relay = self
                .by_addr(invoice.node.addr)
                .ok_or_else(|| anyhow!("no relay at {}", invoice.node.addr))?;
            let (payment, ack) = invoice.payment().with_confirm();
            relay.handles.payments.send(payment).await?;
            if !ack.await? {
                return Err(anyhow!("payment refused by {}", invoice.node.addr));
            }
        }

        let (callback, reply) = reply_channel();
        let id = engine.send_purchase(purchase, callback)?;
        let (confirmed, payload) = wait(reply).await?;
        if confirmed != id || payload.is_empty() {
            return Err(anyhow!("purchase {id} not confirmed"));
        }
        Ok(ids)
    }

    pub async fn shutdown(self) {
        for node in &self.nodes {
            node.engine.shutdown();
        }
        for node in self.nodes {
            let _ = node.runner.await;
        }
    }
}

/// A callback that forwards its result to the returned receiver.
pub fn reply_channel() -> (Callback, oneshot::Receiver<(Id, Vec<u8>)>) {
    let (tx, rx) = oneshot::channel();
    let callback: Callback = Box::new(move |id, payload| {
        let _ = tx.send((id, payload));
    });
    (callback, rx)
}

pub async fn wait(reply: oneshot::Receiver<(Id, Vec<u8>)>) -> anyhow::Result<(Id, Vec<u8>)> {
    tokio::time::timeout(REPLY_WAIT, reply)
        .await
        .context("no reply in time")?
        .context("callback dropped")
}

/// Engine settings for fast tests.
pub fn test_config(relay_rate: u32) -> EngineConfig {
    EngineConfig {
        relay_rate,
        exit_timeout: Duration::from_millis(500),
        pending_timeout: Duration::from_secs(3),
        sweep_interval: Duration::from_millis(50),
        channel_capacity: 256,
    }
}
