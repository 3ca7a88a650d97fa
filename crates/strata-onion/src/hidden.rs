//! Hidden services hosted by this node, and rendezvous points learned as a
//! client.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use strata_crypto::cloak::{self, Cloak};
use strata_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use strata_types::Id;

use crate::layers::ready::Ready;

#[derive(Clone, Debug)]
pub struct HostedService {
    pub key: X25519StaticSecret,
    pub port: u16,
}

#[derive(Default)]
struct State {
    hosted: Vec<HostedService>,
    rendezvous: HashMap<Id, Ready>,
}

#[derive(Default)]
pub struct HiddenServices {
    state: Mutex<State>,
}

impl HiddenServices {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Host a service on `port` and return its public key.
    pub fn host(&self, key: X25519StaticSecret, port: u16) -> X25519PublicKey {
        let public = key.public_key();
        debug!(port, "hosting hidden service");
        self.state().hosted.push(HostedService { key, port });
        public
    }

    pub fn hosted(&self) -> Vec<HostedService> {
        self.state().hosted.clone()
    }

    pub fn find_cloaked(&self, cloak: &Cloak) -> Option<HostedService> {
        self.state()
            .hosted
            .iter()
            .find(|svc| cloak::matches(cloak, &svc.key.public_key()))
            .cloned()
    }

    pub fn add_rendezvous(&self, ready: Ready) {
        self.state().rendezvous.insert(ready.id, ready);
    }

    pub fn rendezvous(&self, id: &Id) -> Option<Ready> {
        self.state().rendezvous.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_cloaked_hosted_only() {
        let hidden = HiddenServices::new();
        let public = hidden.host(X25519StaticSecret::random(), 8080);
        let found = hidden.find_cloaked(&cloak::cloak(&public)).expect("hosted");
        assert_eq!(found.port, 8080);

        let stranger = X25519StaticSecret::random().public_key();
        assert!(hidden.find_cloaked(&cloak::cloak(&stranger)).is_none());
    }
}
