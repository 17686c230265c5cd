//! Metrics collection for reconciliation monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dealerbooks_fx::RateProviderStats;

/// Reconciliation metrics.
pub struct ReconciliationMetrics {
    /// Events handed to the hook.
    pub events_received: AtomicU64,
    /// Events that changed a ledger.
    pub events_applied: AtomicU64,
    /// Sale/invoice events ignored because a sale price was already set.
    pub events_ignored: AtomicU64,
    /// Events that failed with an error.
    pub events_failed: AtomicU64,
    /// Events abandoned after the call-site timeout.
    pub events_timed_out: AtomicU64,
    /// Unknown-currency conversions passed through unconverted.
    pub conversion_fallbacks: AtomicU64,
    /// Failed reconciliations awaiting replay or review.
    pub backlog_size: AtomicU64,
    /// Backlog entries evicted because the backlog was full.
    pub backlog_dropped: AtomicU64,
    /// Backlog entries successfully replayed.
    pub events_replayed: AtomicU64,
    /// Successful rate refreshes.
    pub rate_refresh_successes: AtomicU64,
    /// Failed rate refreshes.
    pub rate_refresh_failures: AtomicU64,
}

impl ReconciliationMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            events_applied: AtomicU64::new(0),
            events_ignored: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            events_timed_out: AtomicU64::new(0),
            conversion_fallbacks: AtomicU64::new(0),
            backlog_size: AtomicU64::new(0),
            backlog_dropped: AtomicU64::new(0),
            events_replayed: AtomicU64::new(0),
            rate_refresh_successes: AtomicU64::new(0),
            rate_refresh_failures: AtomicU64::new(0),
        }
    }

    pub fn event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_applied(&self) {
        self.events_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_ignored(&self) {
        self.events_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_timed_out(&self) {
        self.events_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conversion_fallback(&self) {
        self.conversion_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_replayed(&self) {
        self.events_replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn backlog_dropped(&self) {
        self.backlog_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the current backlog size.
    pub fn set_backlog_size(&self, size: usize) {
        self.backlog_size.store(size as u64, Ordering::Relaxed);
    }

    /// Copy the rate provider's refresh counters.
    pub fn record_rate_stats(&self, stats: &RateProviderStats) {
        self.rate_refresh_successes
            .store(stats.refresh_successes, Ordering::Relaxed);
        self.rate_refresh_failures
            .store(stats.refresh_failures, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_applied: self.events_applied.load(Ordering::Relaxed),
            events_ignored: self.events_ignored.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            events_timed_out: self.events_timed_out.load(Ordering::Relaxed),
            conversion_fallbacks: self.conversion_fallbacks.load(Ordering::Relaxed),
            backlog_size: self.backlog_size.load(Ordering::Relaxed),
            backlog_dropped: self.backlog_dropped.load(Ordering::Relaxed),
            events_replayed: self.events_replayed.load(Ordering::Relaxed),
            rate_refresh_successes: self.rate_refresh_successes.load(Ordering::Relaxed),
            rate_refresh_failures: self.rate_refresh_failures.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP dealerbooks_reconcile_events_received Total events handed to reconciliation
# TYPE dealerbooks_reconcile_events_received counter
dealerbooks_reconcile_events_received {}

# HELP dealerbooks_reconcile_events_applied Total events that changed a ledger
# TYPE dealerbooks_reconcile_events_applied counter
dealerbooks_reconcile_events_applied {}

# HELP dealerbooks_reconcile_events_ignored Total sale or invoice events ignored by first-write-wins
# TYPE dealerbooks_reconcile_events_ignored counter
dealerbooks_reconcile_events_ignored {}

# HELP dealerbooks_reconcile_events_failed Total events that failed to reconcile
# TYPE dealerbooks_reconcile_events_failed counter
dealerbooks_reconcile_events_failed {}

# HELP dealerbooks_reconcile_events_timed_out Total events abandoned after the timeout
# TYPE dealerbooks_reconcile_events_timed_out counter
dealerbooks_reconcile_events_timed_out {}

# HELP dealerbooks_conversion_fallbacks Total amounts passed through without a rate
# TYPE dealerbooks_conversion_fallbacks counter
dealerbooks_conversion_fallbacks {}

# HELP dealerbooks_reconcile_backlog_size Current failed reconciliations awaiting replay
# TYPE dealerbooks_reconcile_backlog_size gauge
dealerbooks_reconcile_backlog_size {}

# HELP dealerbooks_reconcile_backlog_dropped Total backlog entries evicted
# TYPE dealerbooks_reconcile_backlog_dropped counter
dealerbooks_reconcile_backlog_dropped {}

# HELP dealerbooks_reconcile_events_replayed Total backlog entries replayed
# TYPE dealerbooks_reconcile_events_replayed counter
dealerbooks_reconcile_events_replayed {}

# HELP dealerbooks_rate_refresh_successes Total successful exchange rate refreshes
# TYPE dealerbooks_rate_refresh_successes counter
dealerbooks_rate_refresh_successes {}

# HELP dealerbooks_rate_refresh_failures Total failed exchange rate refreshes
# TYPE dealerbooks_rate_refresh_failures counter
dealerbooks_rate_refresh_failures {}
"#,
            snapshot.events_received,
            snapshot.events_applied,
            snapshot.events_ignored,
            snapshot.events_failed,
            snapshot.events_timed_out,
            snapshot.conversion_fallbacks,
            snapshot.backlog_size,
            snapshot.backlog_dropped,
            snapshot.events_replayed,
            snapshot.rate_refresh_successes,
            snapshot.rate_refresh_failures,
        )
    }
}

impl Default for ReconciliationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub events_applied: u64,
    pub events_ignored: u64,
    pub events_failed: u64,
    pub events_timed_out: u64,
    pub conversion_fallbacks: u64,
    pub backlog_size: u64,
    pub backlog_dropped: u64,
    pub events_replayed: u64,
    pub rate_refresh_successes: u64,
    pub rate_refresh_failures: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<ReconciliationMetrics>;
