//! Session and circuit manager.
//!
//! Holds the node table, every session this node knows about (its own
//! purchases as a client and the sessions it sells as a relay), a per-node
//! cache of which circuit positions are already bought, and payments waiting
//! for their `Session` layer.
//!
//! Sessions this node bought are evicted once spent, which also frees their
//! circuit positions. All state sits behind one lock. Critical sections only look up, insert,
//! remove or adjust numbers; callers get clones back.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::seq::SliceRandom;
use tracing::{debug, trace, warn};

use strata_crypto::cloak::{self, Cloak};
use strata_crypto::x25519::X25519PublicKey;
use strata_types::{Amount, Hash, Id, KEY_LEN};

use crate::payment::{PendingPayment, PendingPayments};
use crate::session::{Node, SessionData};
use crate::{OnionError, Result, CIRCUIT_LEN, RETURN_HOP};

#[derive(Default)]
struct State {
    nodes: Vec<Node>,
    sessions: Vec<SessionData>,
    circuits: HashMap<X25519PublicKey, [Option<Id>; CIRCUIT_LEN]>,
    payments: PendingPayments,
}

impl State {
    /// Drop the spent sessions this node bought, except those in `keep`,
    /// and free their circuit positions.
    fn evict_exhausted(&mut self, local: &X25519PublicKey, keep: &HashSet<Id>) -> usize {
        let before = self.sessions.len();
        let circuits = &mut self.circuits;
        self.sessions.retain(|s| {
            if s.remaining > 0 || &s.node.identity == local || keep.contains(&s.id) {
                return true;
            }
            let emptied = match circuits.get_mut(&s.node.identity) {
                Some(slots) => {
                    if let Some(slot) = slots.get_mut(usize::from(s.hop)) {
                        if *slot == Some(s.id) {
                            *slot = None;
                        }
                    }
                    slots.iter().all(Option::is_none)
                }
                None => false,
            };
            if emptied {
                circuits.remove(&s.node.identity);
            }
            false
        });
        let evicted = before - self.sessions.len();
        if evicted > 0 {
            debug!(evicted, "exhausted sessions evicted");
        }
        evicted
    }
}

pub struct SessionManager {
    local: Node,
    state: Mutex<State>,
}

impl SessionManager {
    /// A manager for `local`, holding the node's own return session.
    pub fn new(local: Node) -> Self {
        let mut ret = SessionData::generate(local.clone(), RETURN_HOP, 0);
        ret.relay_rate = 0;
        let state = State {
            sessions: vec![ret],
            ..State::default()
        };
        Self {
            local,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local_node(&self) -> &Node {
        &self.local
    }

    pub fn is_local(&self, node: &Node) -> bool {
        node.identity == self.local.identity
    }

    /// Sessions bought by others, plus the return session, are spent here.
    /// Everything else must still have funds.
    fn eligible(&self, s: &SessionData) -> bool {
        if self.is_local(&s.node) {
            s.hop == RETURN_HOP
        } else {
            s.remaining > 0
        }
    }

    /// Add or replace a node, keyed by identity.
    pub fn add_node(&self, node: Node) {
        if self.is_local(&node) {
            return;
        }
        let mut state = self.state();
        match state.nodes.iter_mut().find(|n| n.identity == node.identity) {
            Some(existing) => *existing = node,
            None => state.nodes.push(node),
        }
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.state().nodes.clone()
    }

    pub fn node_count(&self) -> usize {
        self.state().nodes.len()
    }

    /// Apply `update` to the node that signs with `signing`.
    pub fn update_node<F>(&self, signing: &[u8; KEY_LEN], update: F) -> bool
    where
        F: FnOnce(&mut Node),
    {
        let mut state = self.state();
        match state.nodes.iter_mut().find(|n| &n.signing == signing) {
            Some(node) => {
                update(node);
                true
            }
            None => false,
        }
    }

    pub fn add_session(&self, session: SessionData) {
        let local = self.is_local(&session.node);
        let mut state = self.state();
        if !local && usize::from(session.hop) < CIRCUIT_LEN {
            let slots = state.circuits.entry(session.node.identity).or_default();
            slots[usize::from(session.hop)] = Some(session.id);
        }
        trace!(id = %session.id, hop = session.hop, local, "session added");
        state.sessions.push(session);
    }

    pub fn session(&self, id: &Id) -> Option<SessionData> {
        self.state().sessions.iter().find(|s| &s.id == id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn local_return_session(&self) -> Result<SessionData> {
        self.state()
            .sessions
            .iter()
            .find(|s| s.hop == RETURN_HOP && self.is_local(&s.node))
            .cloned()
            .ok_or(OnionError::NoEligibleHop(RETURN_HOP))
    }

    /// A session sold by this node whose header key matches `cloak`.
    pub fn find_cloaked(&self, cloak: &Cloak) -> Option<SessionData> {
        self.state()
            .sessions
            .iter()
            .find(|s| self.is_local(&s.node) && cloak::matches(cloak, &s.header_pub))
            .cloned()
    }

    /// Pick five distinct nodes, one per circuit position, none of which
    /// already holds a funded session at that position. Spent sessions are
    /// evicted first.
    pub fn select_unused_circuit(&self) -> Result<[Node; CIRCUIT_LEN]> {
        let mut state = self.state();
        state.evict_exhausted(&self.local.identity, &HashSet::new());
        let mut candidates: Vec<Node> = state.nodes.clone();
        if candidates.len() < CIRCUIT_LEN {
            return Err(OnionError::InsufficientRelays {
                need: CIRCUIT_LEN,
                have: candidates.len(),
            });
        }
        candidates.shuffle(&mut rand::thread_rng());

        let occupied = |node: &Node, pos: usize| {
            state
                .circuits
                .get(&node.identity)
                .and_then(|slots| slots[pos])
                .and_then(|id| state.sessions.iter().find(|s| s.id == id))
                .is_some_and(|s| s.remaining > 0)
        };

        let mut chosen = Vec::with_capacity(CIRCUIT_LEN);
        for pos in 0..CIRCUIT_LEN {
            let Some(i) = candidates.iter().position(|n| !occupied(n, pos)) else {
                debug!(pos, "no unused node for circuit position");
                return Err(OnionError::InsufficientRelays {
                    need: CIRCUIT_LEN,
                    have: chosen.len(),
                });
            };
            chosen.push(candidates.swap_remove(i));
        }

        chosen
            .try_into()
            .map_err(|_| OnionError::Internal("circuit length".into()))
    }

    /// Fill the empty slots of `already` with funded sessions whose hop
    /// labels match `hops`, position by position. Spent sessions not named
    /// in `already` are evicted first.
    pub fn select_hops(&self, hops: &[u8], already: Vec<Option<SessionData>>) -> Result<Vec<SessionData>> {
        if hops.len() != already.len() {
            warn!(hops = hops.len(), sessions = already.len(), "hop list mismatch");
            return Err(OnionError::HopMismatch {
                hops: hops.len(),
                sessions: already.len(),
            });
        }

        let mut state = self.state();
        let taken: HashSet<Id> = already.iter().flatten().map(|s| s.id).collect();
        state.evict_exhausted(&self.local.identity, &taken);
        let mut pool: Vec<&SessionData> = state
            .sessions
            .iter()
            .filter(|s| !taken.contains(&s.id) && self.eligible(s))
            .collect();
        pool.shuffle(&mut rand::thread_rng());

        let mut selected = Vec::with_capacity(hops.len());
        for (&hop, slot) in hops.iter().zip(already) {
            if let Some(s) = slot {
                selected.push(s);
                continue;
            }
            let Some(i) = pool.iter().position(|s| s.hop == hop) else {
                debug!(hop, "no eligible session");
                return Err(OnionError::NoEligibleHop(hop));
            };
            selected.push(pool.swap_remove(i).clone());
        }
        Ok(selected)
    }

    pub fn inc_session(&self, id: &Id, amount: Amount) -> bool {
        let mut state = self.state();
        match state.sessions.iter_mut().find(|s| &s.id == id) {
            Some(s) => {
                s.remaining = s.remaining.saturating_add(amount);
                true
            }
            None => false,
        }
    }

    /// Debit a session. Returns `false` if the session is unknown or held
    /// less than `amount`, in which case it is left at zero.
    pub fn dec_session(&self, id: &Id, amount: Amount, what: &str) -> bool {
        let mut state = self.state();
        let Some(s) = state.sessions.iter_mut().find(|s| &s.id == id) else {
            trace!(%id, what, "debit for unknown session");
            return false;
        };
        if s.remaining < amount {
            debug!(%id, what, remaining = s.remaining, amount, "session exhausted");
            s.remaining = 0;
            return false;
        }
        s.remaining -= amount;
        trace!(%id, what, amount, remaining = s.remaining, "session debited");
        true
    }

    pub fn set_remaining(&self, id: &Id, amount: Amount) -> bool {
        let mut state = self.state();
        match state.sessions.iter_mut().find(|s| &s.id == id) {
            Some(s) => {
                s.remaining = amount;
                true
            }
            None => false,
        }
    }

    /// Record a payment. A payment for an existing session tops it up and
    /// returns that session's id; otherwise it waits for its `Session` layer.
    pub fn add_payment(&self, payment: PendingPayment) -> Option<Id> {
        let mut state = self.state();
        if let Some(s) = state.sessions.iter_mut().find(|s| s.preimage == payment.preimage) {
            s.remaining = s.remaining.saturating_add(payment.amount);
            debug!(id = %s.id, amount = payment.amount, "session topped up");
            return Some(s.id);
        }
        state.payments.add(payment);
        None
    }

    pub fn take_payment(&self, preimage: &Hash) -> Option<PendingPayment> {
        self.state().payments.take_by_preimage(preimage)
    }

    pub fn pending_payment(&self, id: &Id) -> Option<PendingPayment> {
        self.state().payments.find_by_id(id).copied()
    }

    pub fn pending_payment_count(&self) -> usize {
        self.state().payments.len()
    }
}
