//! Bounded record of reconciliations that did not complete.

use std::collections::VecDeque;

use dealerbooks_common::{now, DealerBooksError, Timestamp};
use dealerbooks_ledger::{BalanceEvent, EventKind};
use parking_lot::Mutex;
use serde::Serialize;

/// Why a reconciliation did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The engine returned an error; nothing was committed.
    Failed,
    /// The call-site timeout fired; the store may or may not have committed.
    TimedOut,
}

/// A reconciliation that did not complete.
#[derive(Debug, Clone, Serialize)]
pub struct FailedReconciliation {
    pub event: BalanceEvent,
    pub reason: FailureReason,
    pub error_code: &'static str,
    pub message: String,
    /// Whether replaying can be expected to succeed.
    pub retryable: bool,
    pub attempts: u32,
    pub failed_at: Timestamp,
}

impl FailedReconciliation {
    /// Record an engine error.
    pub fn failed(event: BalanceEvent, error: &DealerBooksError) -> Self {
        Self {
            event,
            reason: FailureReason::Failed,
            error_code: error.error_code(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            attempts: 1,
            failed_at: now(),
        }
    }

    /// Record a call-site timeout.
    pub fn timed_out(event: BalanceEvent) -> Self {
        let error = DealerBooksError::Timeout("reconciliation".to_string());
        Self {
            event,
            reason: FailureReason::TimedOut,
            error_code: error.error_code(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            attempts: 1,
            failed_at: now(),
        }
    }

    /// Whether replay may apply this entry without corrupting the ledger.
    ///
    /// Purchases are never replayed: the latest purchase wins, and a newer
    /// one may have been applied since this entry failed. A timed-out
    /// expense may already be committed, and expenses accumulate. Both wait
    /// for manual review instead.
    pub fn is_replayable(&self) -> bool {
        if !self.retryable {
            return false;
        }
        match self.event.kind {
            EventKind::Purchase => false,
            EventKind::Expense => self.reason != FailureReason::TimedOut,
            EventKind::Sale | EventKind::Invoice => true,
        }
    }
}

/// FIFO backlog that evicts the oldest entry when full.
pub struct ReconciliationBacklog {
    entries: Mutex<VecDeque<FailedReconciliation>>,
    capacity: usize,
}

impl ReconciliationBacklog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, returning the evicted one if the backlog was full.
    pub fn push(&self, entry: FailedReconciliation) -> Option<FailedReconciliation> {
        let mut entries = self.entries.lock();
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(entry);
        evicted
    }

    /// Take every entry out, oldest first.
    pub fn drain(&self) -> Vec<FailedReconciliation> {
        self.entries.lock().drain(..).collect()
    }

    /// Copy of the current entries, oldest first.
    pub fn entries(&self) -> Vec<FailedReconciliation> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
