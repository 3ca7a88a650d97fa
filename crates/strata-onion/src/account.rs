//! Client-side billing for an outgoing onion.
//!
//! Walks an assembled onion and works out what each remote session will be
//! charged, using the same formulas as the relays:
//!
//! | Layer | Session | When | Amount |
//! |---|---|---|---|
//! | `Forward` after a `Crypt` | that `Crypt`'s | at send | `rate * bytes from the Forward on` |
//! | `Exit` / `GetBalance` after a `Crypt` | that `Crypt`'s | on reply | `rate * (request + reply) / 2` |
//! | `Reverse` before a `Crypt` | that `Crypt`'s | on reply | `rate * reply` |
//!
//! The sender's own sessions are never charged.

use strata_types::{Amount, Id};

use crate::layers::Layer;
use crate::manager::SessionManager;
use crate::onion::Assembled;
use crate::pending::PostAcct;
use crate::session::SessionData;

#[derive(Default)]
pub struct Accounting {
    /// Debits to apply before the onion is sent.
    pub immediate: Vec<(Id, Amount)>,
    /// Debits to run when the reply arrives, given its length.
    pub deferred: Vec<PostAcct>,
}

impl Accounting {
    /// Apply the immediate debits.
    pub fn charge(&self, mgr: &SessionManager) {
        for (id, amount) in &self.immediate {
            mgr.dec_session(id, *amount, "forward");
        }
    }
}

/// The remote session whose `Crypt` sits at layer `i`.
fn crypt_session<'a>(built: &'a Assembled, mgr: &SessionManager, i: usize) -> Option<&'a SessionData> {
    match built.onion.layers().get(i)? {
        Layer::Crypt(_) => built
            .billing
            .get(i)?
            .as_ref()
            .filter(|s| !mgr.is_local(&s.node)),
        _ => None,
    }
}

pub fn account(built: &Assembled, mgr: &SessionManager) -> Accounting {
    let mut acct = Accounting::default();
    for (i, layer) in built.onion.layers().iter().enumerate() {
        match layer {
            Layer::Forward(_) => {
                if let Some(s) = i.checked_sub(1).and_then(|j| crypt_session(built, mgr, j)) {
                    acct.immediate.push((s.id, s.cost(built.onion.len_from(i))));
                }
            }
            Layer::Exit(_) | Layer::GetBalance(_) => {
                if let Some(s) = i.checked_sub(1).and_then(|j| crypt_session(built, mgr, j)) {
                    let request = built.onion.len_from(i);
                    let s = s.clone();
                    acct.deferred.push(Box::new(move |mgr, received| {
                        mgr.dec_session(&s.id, s.exit_cost(request, received), "exit");
                    }));
                }
            }
            Layer::Reverse(_) => {
                if let Some(s) = crypt_session(built, mgr, i + 1) {
                    let s = s.clone();
                    acct.deferred.push(Box::new(move |mgr, received| {
                        mgr.dec_session(&s.id, s.cost(received), "reverse");
                    }));
                }
            }
            _ => {}
        }
    }
    acct
}

#[cfg(test)]
mod tests {
    use strata_crypto::x25519::X25519StaticSecret;
    use strata_types::KEY_LEN;

    use super::*;
    use crate::layers::crypt::CRYPT_LEN;
    use crate::layers::exit::EXIT_LEN;
    use crate::layers::forward::FORWARD_LEN;
    use crate::onion::{exit_onion, purchase_onion};
    use crate::session::Node;
    use crate::{REVERSE_HEADER_LEN, RETURN_HOP};

    fn node(port: u16, rate: u32) -> Node {
        Node::new(
            format!("127.0.0.1:{port}").parse().expect("addr"),
            X25519StaticSecret::random().public_key(),
            [port as u8; KEY_LEN],
            rate,
        )
    }

    fn setup() -> (SessionManager, Vec<SessionData>) {
        let mgr = SessionManager::new(node(8000, 1));
        let mut sessions: Vec<SessionData> = (0..5u8)
            .map(|hop| SessionData::generate(node(8001 + u16::from(hop), 2), hop, 1_000_000))
            .collect();
        for s in &sessions {
            mgr.add_session(s.clone());
        }
        sessions.push(mgr.local_return_session().expect("return"));
        (mgr, sessions)
    }

    #[test]
    fn test_exit_onion_billing() {
        let (mgr, sessions) = setup();
        let payload = vec![0; 32];
        let built = exit_onion(&sessions, 80, Id::random(), payload).expect("onion");
        let acct = account(&built, &mgr);

        // Forwards to hops 1 and 2 are charged to hops 0 and 1.
        let ids: Vec<Id> = acct.immediate.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![sessions[0].id, sessions[1].id]);
        let (_, second) = acct.immediate[1];
        let request = EXIT_LEN + 32 + REVERSE_HEADER_LEN;
        assert_eq!(second, 2 * (request + FORWARD_LEN + CRYPT_LEN) as u64);

        // Exit plus two reverse relays; the return session is ours.
        assert_eq!(acct.deferred.len(), 3);

        acct.charge(&mgr);
        let received = REVERSE_HEADER_LEN + 60;
        for f in acct.deferred {
            f(&mgr, received);
        }
        let remaining = |i: usize| mgr.session(&sessions[i].id).expect("session").remaining;
        assert_eq!(remaining(2), 1_000_000 - (2 * (request + received) as u64) / 2);
        assert_eq!(remaining(3), 1_000_000 - 2 * received as u64);
        assert_eq!(remaining(4), 1_000_000 - 2 * received as u64);
        assert_eq!(
            mgr.session(&sessions[5].id).expect("return").hop,
            RETURN_HOP
        );
    }

    #[test]
    fn test_purchase_onion_is_free() {
        let (mgr, sessions) = setup();
        let client = mgr.local_node().clone();
        let built = purchase_onion(&sessions[..5], &client, Id::random()).expect("onion");
        let acct = account(&built, &mgr);
        assert!(acct.immediate.is_empty());
        assert!(acct.deferred.is_empty());
    }
}
