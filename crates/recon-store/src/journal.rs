//! Ordered journal of store calls

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use recon_core::StoreOp;

/// One store call as seen by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    /// Position in the journal
    pub seq: u64,
    /// Operation
    pub op: StoreOp,
    /// Record id for reads and creates, object id for patches and deletes
    pub target: String,
    /// When the call arrived
    pub at: DateTime<Utc>,
}

/// Append-only call journal
#[derive(Debug, Default)]
pub struct CallJournal {
    inner: Mutex<Vec<StoreCall>>,
}

impl CallJournal {
    /// Record a call, returning its sequence number
    pub fn append(&self, op: StoreOp, target: impl Into<String>) -> u64 {
        let mut guard = self.inner.lock();
        let seq = guard.len() as u64;
        guard.push(StoreCall {
            seq,
            op,
            target: target.into(),
            at: Utc::now(),
        });
        seq
    }

    /// All calls in arrival order
    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.lock().clone()
    }

    /// Calls of one operation in arrival order
    #[must_use]
    pub fn calls_of(&self, op: StoreOp) -> Vec<StoreCall> {
        self.inner.lock().iter().filter(|c| c.op == op).cloned().collect()
    }

    /// Number of recorded calls
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if no call was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
