//! Test helpers shared by the engine, handler and client tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use strata_crypto::ed25519::SigningKey;
use strata_crypto::x25519::X25519StaticSecret;
use strata_transport::Transport;
use strata_types::KEY_LEN;

use crate::engine::{engine_channels, Engine, EngineConfig, EngineInbox};
use crate::session::Node;

/// Records every send instead of delivering it.
#[derive(Default)]
pub(crate) struct Recorder {
    pub sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
}

impl Recorder {
    pub fn take(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut *self.sent.lock().expect("lock"))
    }
}

impl Transport for Recorder {
    fn send(&self, addr: SocketAddr, data: Vec<u8>) -> strata_transport::Result<()> {
        self.sent.lock().expect("lock").push((addr, data));
        Ok(())
    }
}

pub(crate) fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().expect("addr")
}

/// A remote node with a fresh identity.
pub(crate) fn node(port: u16, rate: u32) -> (Node, X25519StaticSecret) {
    let identity = X25519StaticSecret::random();
    let node = Node::new(addr(port), identity.public_key(), [port as u8; KEY_LEN], rate);
    (node, identity)
}

pub(crate) fn engine_at(port: u16) -> (Arc<Engine>, Arc<Recorder>, EngineInbox) {
    let recorder = Arc::new(Recorder::default());
    let (handles, inbox) = engine_channels(8);
    let engine = Engine::new(
        EngineConfig::default(),
        X25519StaticSecret::random(),
        SigningKey::generate(),
        addr(port),
        recorder.clone(),
        handles,
    )
    .expect("engine");
    (Arc::new(engine), recorder, inbox)
}
