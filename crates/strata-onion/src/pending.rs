//! Replies the client is waiting for.
//!
//! Each entry holds the deferred billing for the onion that produced it and a
//! callback for the caller. Both run at most once: the entry is removed when
//! the reply arrives or when it expires, whichever comes first.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use strata_types::Id;

use crate::manager::SessionManager;

/// Deferred debits, run with the number of reply bytes received.
pub type PostAcct = Box<dyn FnOnce(&SessionManager, usize) + Send>;

/// Receives the reply payload, or an empty buffer on expiry.
pub type Callback = Box<dyn FnOnce(Id, Vec<u8>) + Send>;

pub struct PendingResponse {
    pub id: Id,
    pub sent: Instant,
    pub deadline: Instant,
    pub post_acct: Vec<PostAcct>,
    pub callback: Callback,
}

impl PendingResponse {
    pub fn new(id: Id, timeout: Duration, callback: Callback) -> Self {
        let sent = Instant::now();
        Self {
            id,
            sent,
            deadline: sent + timeout,
            post_acct: Vec::new(),
            callback,
        }
    }

    /// Run the deferred debits for a reply of `received` bytes.
    pub fn settle(&mut self, mgr: &SessionManager, received: usize) {
        for acct in self.post_acct.drain(..) {
            acct(mgr, received);
        }
    }

    pub fn complete(self, payload: Vec<u8>) {
        (self.callback)(self.id, payload);
    }

    pub fn resolve(mut self, mgr: &SessionManager, received: usize, payload: Vec<u8>) {
        self.settle(mgr, received);
        self.complete(payload);
    }
}

#[derive(Default)]
pub struct PendingResponses {
    entries: Mutex<HashMap<Id, PendingResponse>>,
}

impl PendingResponses {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Id, PendingResponse>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, pending: PendingResponse) {
        self.entries().insert(pending.id, pending);
    }

    pub fn take(&self, id: &Id) -> Option<PendingResponse> {
        self.entries().remove(id)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.entries().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Remove entries past their deadline and call each back with an empty
    /// payload. No billing runs for expired entries.
    pub fn expire(&self, now: Instant) -> usize {
        let expired: Vec<PendingResponse> = {
            let mut entries = self.entries();
            let ids: Vec<Id> = entries
                .values()
                .filter(|p| p.deadline <= now)
                .map(|p| p.id)
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };
        let count = expired.len();
        for p in expired {
            debug!(id = %p.id, waited = ?now.saturating_duration_since(p.sent), "pending response expired");
            (p.callback)(p.id, Vec::new());
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use strata_crypto::x25519::X25519StaticSecret;

    use super::*;
    use crate::session::{Node, SessionData};

    fn manager() -> SessionManager {
        let addr: SocketAddr = "127.0.0.1:1".parse().expect("addr");
        SessionManager::new(Node::new(addr, X25519StaticSecret::random().public_key(), [0; 32], 1))
    }

    fn counting(calls: &Arc<AtomicUsize>) -> Callback {
        let calls = calls.clone();
        Box::new(move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_take_is_once() {
        let table = PendingResponses::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = Id::random();
        table.add(PendingResponse::new(id, Duration::from_secs(5), counting(&calls)));

        let mgr = manager();
        table.take(&id).expect("first").resolve(&mgr, 0, Vec::new());
        assert!(table.take(&id).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_runs_post_acct() {
        let mgr = manager();
        let remote = Node::new("127.0.0.1:2".parse().expect("addr"), X25519StaticSecret::random().public_key(), [1; 32], 2);
        let s = SessionData::generate(remote, 3, 1_000);
        mgr.add_session(s.clone());

        let calls = Arc::new(AtomicUsize::new(0));
        let mut p = PendingResponse::new(Id::random(), Duration::from_secs(5), counting(&calls));
        let sid = s.id;
        p.post_acct.push(Box::new(move |mgr, received| {
            mgr.dec_session(&sid, 2 * received as u64, "reverse");
        }));
        p.resolve(&mgr, 100, b"reply".to_vec());

        assert_eq!(mgr.session(&s.id).expect("session").remaining, 800);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_expire_calls_back_empty_without_billing() {
        let table = PendingResponses::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let acct_ran = Arc::new(AtomicUsize::new(0));

        let id = Id::random();
        let sink = seen.clone();
        let mut p = PendingResponse::new(
            id,
            Duration::ZERO,
            Box::new(move |id, bytes| sink.lock().expect("lock").push((id, bytes))),
        );
        let flag = acct_ran.clone();
        p.post_acct.push(Box::new(move |_, _| {
            flag.fetch_add(1, Ordering::SeqCst);
        }));
        table.add(p);

        let calls = Arc::new(AtomicUsize::new(0));
        table.add(PendingResponse::new(Id::random(), Duration::from_secs(60), counting(&calls)));

        assert_eq!(table.expire(Instant::now()), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(seen.lock().expect("lock").as_slice(), &[(id, Vec::new())]);
        assert_eq!(acct_ran.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
