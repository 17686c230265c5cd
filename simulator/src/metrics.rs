//! Simulation metrics.

use std::collections::VecDeque;

use dealerbooks_ledger::{MergeOutcome, ReconcileOutcome};

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total actions recorded.
    pub total_events: u64,
    /// Reconciliations that changed a ledger.
    pub applied_events: u64,
    /// Reconciliations ignored by first-write-wins.
    pub ignored_events: u64,
    /// Reconciliations the hook gave up on.
    pub failed_events: u64,
    /// Property checks that held.
    pub checks_passed: u64,
    /// Property checks that did not hold.
    pub checks_failed: u64,
    /// Latency samples (µs).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_events: 0,
            applied_events: 0,
            ignored_events: 0,
            failed_events: 0,
            checks_passed: 0,
            checks_failed: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record the hook's result for one action.
    pub fn record_event(&mut self, outcome: Option<&ReconcileOutcome>, latency_us: u64) {
        self.total_events += 1;
        match outcome.map(|o| o.merge) {
            Some(MergeOutcome::Applied) => self.applied_events += 1,
            Some(MergeOutcome::Ignored) => self.ignored_events += 1,
            None => self.failed_events += 1,
        }

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_us);
    }

    pub fn record_check(&mut self, passed: bool) {
        if passed {
            self.checks_passed += 1;
        } else {
            self.checks_failed += 1;
        }
    }

    /// Get average latency in µs.
    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    pub fn p50_latency_us(&self) -> u64 {
        self.percentile_latency(50)
    }

    pub fn p99_latency_us(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get throughput (events per second).
    pub fn throughput(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs <= 0.0 {
            return 0.0;
        }

        self.total_events as f64 / elapsed_secs
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
