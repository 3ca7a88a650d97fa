//! The per-node engine.
//!
//! One task runs [`Engine::run`], a single dispatch loop over the node's
//! event sources. Each event is handled to completion before the next is
//! taken. Transport workers only push whole buffers into the inbound channel.
//!
//! ```text
//!  shutdown --+
//!  control ---+   biased select    +--> handle_message --> Transport::send
//!  payments --+-----------------> -+--> handle_payment
//!  sweep -----+                    +--> PendingResponses::expire
//!  inbound ---+
//! ```
//!
//! Client operations ([`Engine::send_exit`] and friends) may be called from
//! any task; they register a pending response and hand the onion to the
//! transport without going through the loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use strata_crypto::ed25519::SigningKey;
use strata_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use strata_transport::Transport;

use crate::hidden::HiddenServices;
use crate::layers::ads::{unix_now, AddressAd, IntroAd, PeerAd};
use crate::layers::Layer;
use crate::manager::SessionManager;
use crate::payment::{Payment, PendingPayment};
use crate::pending::PendingResponses;
use crate::registry::Registry;
use crate::services::LocalServices;
use crate::session::Node;
use crate::Result;

/// Engine tuning.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Price per byte this node charges as a relay.
    pub relay_rate: u32,
    /// Longest wait for a local service to answer an exit request.
    pub exit_timeout: Duration,
    /// How long a client waits for a reply before giving up.
    pub pending_timeout: Duration,
    pub sweep_interval: Duration,
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relay_rate: 1,
            exit_timeout: Duration::from_secs(2),
            pending_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
            channel_capacity: 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Pause,
    Resume,
}

/// Sending halves of the engine's event sources.
#[derive(Clone)]
pub struct EngineHandles {
    pub inbound: mpsc::Sender<Vec<u8>>,
    pub payments: mpsc::Sender<Payment>,
    pub control: mpsc::Sender<Control>,
}

/// Receiving halves, consumed by [`Engine::run`].
pub struct EngineInbox {
    inbound: mpsc::Receiver<Vec<u8>>,
    payments: mpsc::Receiver<Payment>,
    control: mpsc::Receiver<Control>,
}

pub fn engine_channels(capacity: usize) -> (EngineHandles, EngineInbox) {
    let capacity = capacity.max(1);
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (payments_tx, payments_rx) = mpsc::channel(capacity);
    let (control_tx, control_rx) = mpsc::channel(16);
    (
        EngineHandles {
            inbound: inbound_tx,
            payments: payments_tx,
            control: control_tx,
        },
        EngineInbox {
            inbound: inbound_rx,
            payments: payments_rx,
            control: control_rx,
        },
    )
}

pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) identity: X25519StaticSecret,
    signing: SigningKey,
    pub(crate) local: Node,
    pub(crate) registry: Registry,
    pub(crate) manager: SessionManager,
    pub(crate) pending: PendingResponses,
    pub(crate) hidden: HiddenServices,
    pub(crate) services: LocalServices,
    pub(crate) transport: Arc<dyn Transport>,
    handles: EngineHandles,
    shutdown: broadcast::Sender<()>,
    stopped: AtomicBool,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        identity: X25519StaticSecret,
        signing: SigningKey,
        addr: SocketAddr,
        transport: Arc<dyn Transport>,
        handles: EngineHandles,
    ) -> Result<Self> {
        let local = Node::new(
            addr,
            identity.public_key(),
            signing.verifying_key().to_bytes(),
            config.relay_rate,
        );
        let registry = Registry::standard()?;
        let (shutdown, _) = broadcast::channel(1);
        debug!(%addr, layers = registry.len(), "engine created");
        Ok(Self {
            manager: SessionManager::new(local.clone()),
            config,
            identity,
            signing,
            local,
            registry,
            pending: PendingResponses::new(),
            hidden: HiddenServices::new(),
            services: LocalServices::new(),
            transport,
            handles,
            shutdown,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local_node(&self) -> &Node {
        &self.local
    }

    pub fn identity(&self) -> X25519PublicKey {
        self.identity.public_key()
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn pending(&self) -> &PendingResponses {
        &self.pending
    }

    pub fn hidden(&self) -> &HiddenServices {
        &self.hidden
    }

    pub fn services(&self) -> &LocalServices {
        &self.services
    }

    pub fn handles(&self) -> &EngineHandles {
        &self.handles
    }

    pub fn add_peer(&self, node: Node) {
        self.manager.add_node(node);
    }

    /// Host a hidden service and return its public key.
    pub fn host_service(&self, key: X25519StaticSecret, port: u16) -> X25519PublicKey {
        self.hidden.host(key, port)
    }

    /// Inbound queue occupancy scaled to 0..=255.
    pub(crate) fn load(&self) -> u8 {
        let max = self.handles.inbound.max_capacity().max(1);
        let used = max.saturating_sub(self.handles.inbound.capacity());
        u8::try_from(used * 255 / max).unwrap_or(u8::MAX)
    }

    // ---- advertisements ----

    fn expiry(ttl: Duration) -> u64 {
        unix_now().saturating_add(ttl.as_secs())
    }

    pub fn peer_ad(&self, ttl: Duration) -> PeerAd {
        PeerAd::new(&self.signing, self.config.relay_rate, Self::expiry(ttl))
    }

    pub fn address_ad(&self, ttl: Duration) -> AddressAd {
        AddressAd::new(&self.signing, self.local.addr, Self::expiry(ttl))
    }

    pub fn intro_ad(&self, service: X25519PublicKey, port: u16, ttl: Duration) -> IntroAd {
        IntroAd::new(
            &self.signing,
            service,
            self.config.relay_rate,
            port,
            Self::expiry(ttl),
        )
    }

    /// Send each ad to every known node. Returns the number of sends queued.
    pub fn advertise(&self, ads: &[Layer]) -> usize {
        let encoded: Vec<Vec<u8>> = ads
            .iter()
            .map(|ad| {
                let mut s = strata_types::Splice::new(ad.len());
                ad.encode(&mut s);
                s.into_bytes()
            })
            .collect();
        let mut sent = 0;
        for node in self.manager.nodes() {
            for bytes in &encoded {
                match self.transport.send(node.addr, bytes.clone()) {
                    Ok(()) => sent += 1,
                    Err(e) => debug!(addr = %node.addr, error = %e, "ad not sent"),
                }
            }
        }
        sent
    }

    // ---- dispatch loop ----

    /// Stop the dispatch loop after its current event.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // No receivers just means the loop is not running yet.
        let _ = self.shutdown.send(());
    }

    pub async fn run(&self, mut inbox: EngineInbox) {
        let mut shutdown = self.shutdown.subscribe();
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut paused = false;
        info!(addr = %self.local.addr, "engine running");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                Some(control) = inbox.control.recv() => {
                    paused = control == Control::Pause;
                    info!(addr = %self.local.addr, ?control, "engine control");
                }
                Some(payment) = inbox.payments.recv() => self.handle_payment(payment, paused),
                _ = sweep.tick() => {
                    let expired = self.pending.expire(Instant::now());
                    if expired > 0 {
                        debug!(expired, "pending responses expired");
                    }
                }
                inbound = inbox.inbound.recv() => match inbound {
                    Some(bytes) if paused => trace!(len = bytes.len(), "paused, inbound discarded"),
                    Some(bytes) => self.handle_message(bytes).await,
                    None => {
                        warn!(addr = %self.local.addr, "inbound channel closed");
                        break;
                    }
                },
            }
        }
        info!(addr = %self.local.addr, "engine stopped");
    }

    fn handle_payment(&self, mut payment: Payment, paused: bool) {
        if paused {
            trace!(id = %payment.id, "paused, payment discarded");
            payment.acknowledge(false);
            return;
        }
        let pending = PendingPayment {
            id: payment.id,
            preimage: payment.preimage,
            amount: payment.amount,
        };
        if self.manager.add_payment(pending).is_none() {
            trace!(id = %payment.id, "payment pending");
        }
        payment.acknowledge(true);
    }
}
