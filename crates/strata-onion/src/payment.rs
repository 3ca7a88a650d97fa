//! Incoming payments and the table of payments not yet claimed by a session.

use tokio::sync::oneshot;
use tracing::trace;

use strata_types::{Amount, Hash, Id};

/// A payment as delivered by the payment channel.
#[derive(Debug)]
pub struct Payment {
    /// Becomes the id of the session it funds.
    pub id: Id,
    pub preimage: Hash,
    pub amount: Amount,
    /// Acknowledged once the engine has processed the payment. `false` means
    /// it was discarded while paused.
    pub confirm: Option<oneshot::Sender<bool>>,
}

impl Payment {
    pub fn new(id: Id, preimage: Hash, amount: Amount) -> Self {
        Self {
            id,
            preimage,
            amount,
            confirm: None,
        }
    }

    /// Attach an acknowledgement channel.
    pub fn with_confirm(mut self) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        self.confirm = Some(tx);
        (self, rx)
    }

    pub fn acknowledge(&mut self, accepted: bool) {
        if let Some(tx) = self.confirm.take() {
            // The payer may have stopped waiting.
            let _ = tx.send(accepted);
        }
    }
}

/// An unclaimed payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingPayment {
    pub id: Id,
    pub preimage: Hash,
    pub amount: Amount,
}

#[derive(Debug, Default)]
pub struct PendingPayments {
    entries: Vec<PendingPayment>,
}

impl PendingPayments {
    pub fn add(&mut self, payment: PendingPayment) {
        trace!(id = %payment.id, amount = payment.amount, "payment pending");
        self.entries.push(payment);
    }

    /// Remove and return the payment for `preimage`.
    pub fn take_by_preimage(&mut self, preimage: &Hash) -> Option<PendingPayment> {
        let pos = self.entries.iter().position(|p| &p.preimage == preimage)?;
        Some(self.entries.swap_remove(pos))
    }

    pub fn find_by_id(&self, id: &Id) -> Option<&PendingPayment> {
        self.entries.iter().find(|p| &p.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
