//! Client operations: building, billing and sending onions.
//!
//! Every send follows the same path. The client works out the billing,
//! registers the pending response with its deferred debits, then sends the
//! onion without its outer `Forward` to the first hop. The immediate debits
//! are applied only once the send has been queued.

use std::net::SocketAddr;

use tracing::debug;

use strata_crypto::x25519::X25519PublicKey;
use strata_types::{Amount, Hash, Id};

use crate::account::account;
use crate::engine::Engine;
use crate::layers::forward::FORWARD_LEN;
use crate::layers::Layer;
use crate::onion::{exit_onion, get_balance_onion, purchase_onion, route_onion, Assembled};
use crate::payment::Payment;
use crate::pending::{Callback, PendingResponse, PostAcct};
use crate::session::{Node, SessionData};
use crate::{OnionError, Result, RETURN_HOP};

/// What one relay must be paid before its `Session` layer arrives.
#[derive(Clone, Debug)]
pub struct Invoice {
    pub node: Node,
    pub payment_id: Id,
    pub preimage: Hash,
    pub amount: Amount,
}

impl Invoice {
    pub fn payment(&self) -> Payment {
        Payment::new(self.payment_id, self.preimage, self.amount)
    }
}

/// A prepared session purchase. Pay every invoice, then hand it to
/// [`Engine::send_purchase`].
pub struct Purchase {
    pub id: Id,
    pub invoices: Vec<Invoice>,
    sessions: Vec<SessionData>,
    built: Assembled,
}

impl Engine {
    fn dispatch(&self, built: Assembled, id: Id, extra: Vec<PostAcct>, callback: Callback) -> Result<Id> {
        let mut acct = account(&built, &self.manager);
        let Some(Layer::Forward(first)) = built.onion.layers().first() else {
            return Err(OnionError::InvalidOnion("onion must start with a forward".into()));
        };
        let first = first.addr;
        let encoded = built.onion.encode();
        let bytes = encoded
            .bytes
            .get(FORWARD_LEN..)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();

        let mut pending = PendingResponse::new(id, self.config.pending_timeout, callback);
        pending.post_acct = std::mem::take(&mut acct.deferred);
        pending.post_acct.extend(extra);
        self.pending.add(pending);

        if let Err(e) = self.transport.send(first, bytes) {
            self.pending.take(&id);
            return Err(e.into());
        }
        acct.charge(&self.manager);
        debug!(%id, addr = %first, len = encoded.bytes.len(), "onion sent");
        Ok(id)
    }

    /// Send `payload` to the service on `port` of a hop 2 relay.
    ///
    /// The callback gets the service's reply, or an empty payload if none
    /// arrives in time.
    pub fn send_exit(&self, port: u16, payload: Vec<u8>, callback: Callback) -> Result<Id> {
        let sessions = self.manager.select_hops(&[0, 1, 2, 3, 4, RETURN_HOP], vec![None; 6])?;
        let id = Id::random();
        let built = exit_onion(&sessions, port, id, payload)?;
        self.dispatch(built, id, Vec::new(), callback)
    }

    /// Ask the relay holding session `target` for its remaining balance.
    /// The reply overwrites this node's record of that session.
    pub fn get_balance(&self, target: Id, callback: Callback) -> Result<Id> {
        let session = self
            .manager
            .session(&target)
            .ok_or(OnionError::UnknownSession(target))?;
        let mut already = vec![None; 6];
        already[2] = Some(session);
        let sessions = self.manager.select_hops(&[0, 1, 2, 3, 4, RETURN_HOP], already)?;
        let id = Id::random();
        let built = get_balance_onion(&sessions, id)?;
        self.dispatch(built, id, Vec::new(), callback)
    }

    /// The node that introduced `service`, if an intro ad has been seen.
    pub fn find_service(&self, service: &X25519PublicKey) -> Option<(Node, u16)> {
        self.manager.nodes().into_iter().find_map(|n| {
            let port = n.services.iter().find(|i| &i.key == service)?.port;
            Some((n, port))
        })
    }

    /// Rendezvous with a hidden service hosted at `host`. On success the
    /// `Ready` is recorded under the returned id.
    pub fn send_route(&self, host: SocketAddr, service: &X25519PublicKey, callback: Callback) -> Result<Id> {
        let sessions = self.manager.select_hops(&[0, 1, 3, 4, RETURN_HOP], vec![None; 5])?;
        let id = Id::random();
        let built = route_onion(&sessions, host, service, id)?;
        self.dispatch(built, id, Vec::new(), callback)
    }

    /// Pick five unused relays and generate a session for each.
    pub fn prepare_purchase(&self, amount: Amount) -> Result<Purchase> {
        let nodes = self.manager.select_unused_circuit()?;
        let sessions: Vec<SessionData> = nodes
            .into_iter()
            .zip(0u8..)
            .map(|(node, hop)| SessionData::generate(node, hop, amount))
            .collect();
        let id = Id::random();
        let built = purchase_onion(&sessions, &self.local, id)?;
        let invoices = sessions
            .iter()
            .map(|s| Invoice {
                node: s.node.clone(),
                payment_id: s.id,
                preimage: s.preimage,
                amount,
            })
            .collect();
        Ok(Purchase {
            id,
            invoices,
            sessions,
            built,
        })
    }

    /// Send the purchase onion. The sessions are added once the
    /// confirmation comes back.
    pub fn send_purchase(&self, purchase: Purchase, callback: Callback) -> Result<Id> {
        let Purchase {
            id,
            sessions,
            built,
            ..
        } = purchase;
        let install: PostAcct = Box::new(move |mgr, _| {
            for s in sessions {
                mgr.add_session(s);
            }
        });
        self.dispatch(built, id, vec![install], callback)
    }
}
