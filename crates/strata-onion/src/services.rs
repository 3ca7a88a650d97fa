//! Services bound to local ports, reached by exit requests.
//!
//! A binding is a pair of channels. The engine pushes a request and waits,
//! bounded by a timeout, for the service to push one reply back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Queue depth of a binding in each direction.
const BINDING_CAPACITY: usize = 64;

#[derive(Clone)]
struct Binding {
    requests: mpsc::Sender<Vec<u8>>,
    replies: Arc<tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>>,
}

/// The service side of a binding.
pub struct ServiceHandle {
    pub port: u16,
    requests: mpsc::Receiver<Vec<u8>>,
    replies: mpsc::Sender<Vec<u8>>,
}

impl ServiceHandle {
    /// Next request, or `None` once the binding is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.requests.recv().await
    }

    pub async fn reply(&self, data: Vec<u8>) -> bool {
        self.replies.send(data).await.is_ok()
    }
}

#[derive(Default)]
pub struct LocalServices {
    bindings: Mutex<HashMap<u16, Binding>>,
}

impl LocalServices {
    pub fn new() -> Self {
        Self::default()
    }

    fn bindings(&self) -> MutexGuard<'_, HashMap<u16, Binding>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `port`, replacing any earlier binding.
    pub fn bind(&self, port: u16) -> ServiceHandle {
        let (req_tx, req_rx) = mpsc::channel(BINDING_CAPACITY);
        let (rep_tx, rep_rx) = mpsc::channel(BINDING_CAPACITY);
        self.bindings().insert(
            port,
            Binding {
                requests: req_tx,
                replies: Arc::new(tokio::sync::Mutex::new(rep_rx)),
            },
        );
        debug!(port, "local service bound");
        ServiceHandle {
            port,
            requests: req_rx,
            replies: rep_tx,
        }
    }

    pub fn unbind(&self, port: u16) {
        self.bindings().remove(&port);
    }

    pub fn is_bound(&self, port: u16) -> bool {
        self.bindings().contains_key(&port)
    }

    /// Send `request` to the service on `port` and wait for its reply.
    ///
    /// Returns an empty reply when nothing is bound or the service does not
    /// answer within `timeout`.
    pub async fn exchange(&self, port: u16, request: Vec<u8>, timeout: Duration) -> Vec<u8> {
        let Some(binding) = self.bindings().get(&port).cloned() else {
            debug!(port, "exit to unbound port");
            return Vec::new();
        };

        let mut replies = binding.replies.lock().await;
        // Replies that arrived after an earlier exchange gave up.
        while replies.try_recv().is_ok() {}

        let exchange = async {
            binding.requests.send(request).await.ok()?;
            replies.recv().await
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                debug!(port, "local service closed");
                Vec::new()
            }
            Err(_) => {
                trace!(port, ?timeout, "local service timed out");
                Vec::new()
            }
        }
    }
}
