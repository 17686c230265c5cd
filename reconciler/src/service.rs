//! Reconciler service: owns the components and their background tasks.

use std::sync::Arc;
use std::time::Duration;

use dealerbooks_common::Result;
use dealerbooks_fx::{CurrencyNormalizer, RateProvider, RateSource};
use dealerbooks_ledger::{BalanceService, BalanceStore, ReconciliationEngine, VehicleDirectory};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, instrument};

use crate::backlog::ReconciliationBacklog;
use crate::config::ServiceConfig;
use crate::hook::ReconciliationHook;
use crate::metrics::{MetricsSnapshot, ReconciliationMetrics, SharedMetrics};
use crate::state::ServiceState;

/// The reconciliation service.
pub struct ReconcilerService {
    config: ServiceConfig,
    state: Arc<RwLock<ServiceState>>,
    provider: Arc<RateProvider>,
    engine: Arc<ReconciliationEngine>,
    hook: Arc<ReconciliationHook>,
    balances: Arc<BalanceService>,
    metrics: SharedMetrics,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ReconcilerService {
    /// Wire the service from its external collaborators.
    pub fn new(
        config: ServiceConfig,
        source: Arc<dyn RateSource>,
        store: Arc<dyn BalanceStore>,
        directory: Arc<dyn VehicleDirectory>,
    ) -> Self {
        let provider = Arc::new(RateProvider::new(source, config.rate_provider_config()));
        let normalizer = CurrencyNormalizer::new(provider.clone(), config.currency_policy());
        let engine = Arc::new(ReconciliationEngine::new(store, normalizer));
        let metrics: SharedMetrics = Arc::new(ReconciliationMetrics::new());
        let backlog = Arc::new(ReconciliationBacklog::new(
            config.reconcile_config.backlog_capacity,
        ));
        let hook = Arc::new(ReconciliationHook::new(
            engine.clone(),
            backlog,
            metrics.clone(),
            config.reconcile_config.timeout,
        ));
        let balances = Arc::new(BalanceService::new(engine.clone(), directory));

        Self {
            config,
            state: Arc::new(RwLock::new(ServiceState::Starting)),
            provider,
            engine,
            hook,
            balances,
            metrics,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the background tasks.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        if self.state().is_operational() {
            return Ok(());
        }

        info!(
            settlement = %self.provider.settlement_currency(),
            store = self.engine.store().name(),
            policy = ?self.config.currency_policy(),
            "Starting reconciler"
        );

        let mut tasks = self.tasks.lock();
        tasks.push(self.provider.spawn_refresh_task());
        if let Some(interval) = self.config.reconcile_config.replay_interval {
            tasks.push(self.spawn_replay_task(interval));
        }
        drop(tasks);

        *self.state.write() = ServiceState::Running;

        info!("Reconciler started");
        Ok(())
    }

    /// Stop the background tasks. Reconciliation runs inline with the
    /// caller, so there is nothing in flight to drain.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping reconciler");

        *self.state.write() = ServiceState::ShuttingDown;

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        let snapshot = self.metrics_snapshot();
        info!(
            received = snapshot.events_received,
            applied = snapshot.events_applied,
            ignored = snapshot.events_ignored,
            failed = snapshot.events_failed,
            timed_out = snapshot.events_timed_out,
            backlog = snapshot.backlog_size,
            "Reconciliation totals"
        );

        *self.state.write() = ServiceState::Stopped;

        info!("Reconciler stopped");
        Ok(())
    }

    fn spawn_replay_task(&self, interval: Duration) -> JoinHandle<()> {
        let hook = self.hook.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                hook.replay_backlog().await;
            }
        })
    }

    /// Get the current service state.
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<RateProvider> {
        &self.provider
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    /// Hook for the transaction, sale and invoice modules.
    pub fn hook(&self) -> &Arc<ReconciliationHook> {
        &self.hook
    }

    /// Query and override API.
    pub fn balances(&self) -> &Arc<BalanceService> {
        &self.balances
    }

    /// Metrics with the rate provider's counters folded in.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.record_rate_stats(&self.provider.stats());
        self.metrics.snapshot()
    }

    /// Metrics in Prometheus text format.
    pub fn metrics_report(&self) -> String {
        self.metrics.record_rate_stats(&self.provider.stats());
        self.metrics.to_prometheus()
    }
}
