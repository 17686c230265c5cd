//! Best-effort reconciliation at the emitter call site.
//!
//! The transaction, sale and invoice modules call the hook after their own
//! record is committed. The hook never returns an error: failures are
//! logged, counted and kept in the backlog, and the emitter's operation
//! succeeds regardless.

use std::sync::Arc;
use std::time::Duration;

use dealerbooks_common::{DealerBooksError, Money, VehicleId};
use dealerbooks_ledger::{
    BalanceEvent, EventKind, ExpenseCategory, MergeOutcome, ReconcileOutcome, ReconciliationEngine,
};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::backlog::{FailedReconciliation, FailureReason, ReconciliationBacklog};
use crate::metrics::SharedMetrics;

/// Result of one backlog replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Entries applied and removed from the backlog.
    pub replayed: usize,
    /// Entries that failed again and were put back.
    pub failed: usize,
    /// Entries not eligible for replay, left for review.
    pub held: usize,
}

enum Attempt {
    Done(ReconcileOutcome),
    Failed(DealerBooksError),
    TimedOut,
}

/// Call-site guard around the reconciliation engine.
pub struct ReconciliationHook {
    engine: Arc<ReconciliationEngine>,
    backlog: Arc<ReconciliationBacklog>,
    metrics: SharedMetrics,
    timeout: Duration,
}

impl ReconciliationHook {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        backlog: Arc<ReconciliationBacklog>,
        metrics: SharedMetrics,
        timeout: Duration,
    ) -> Self {
        Self {
            engine,
            backlog,
            metrics,
            timeout,
        }
    }

    pub fn backlog(&self) -> &Arc<ReconciliationBacklog> {
        &self.backlog
    }

    /// Called after a vehicle transaction is recorded.
    pub async fn after_transaction(
        &self,
        vehicle_id: VehicleId,
        category: ExpenseCategory,
        amount: &Money,
    ) -> Option<ReconcileOutcome> {
        self.submit(BalanceEvent::from_category(vehicle_id, category, amount.clone()))
            .await
    }

    /// Called after a sale is recorded.
    pub async fn after_sale(&self, vehicle_id: VehicleId, sale_price: &Money) -> Option<ReconcileOutcome> {
        self.submit(BalanceEvent::new(vehicle_id, EventKind::Sale, sale_price.clone()))
            .await
    }

    /// Called after an invoice is issued.
    pub async fn after_invoice(&self, vehicle_id: VehicleId, total: &Money) -> Option<ReconcileOutcome> {
        self.submit(BalanceEvent::new(vehicle_id, EventKind::Invoice, total.clone()))
            .await
    }

    /// Reconcile an event, swallowing any failure.
    pub async fn submit(&self, event: BalanceEvent) -> Option<ReconcileOutcome> {
        self.metrics.event_received();

        match self.attempt(&event).await {
            Attempt::Done(outcome) => {
                self.record_success(&outcome);
                Some(outcome)
            }
            Attempt::Failed(e) => {
                self.metrics.event_failed();
                error!(
                    vehicle_id = %event.vehicle_id,
                    kind = %event.kind,
                    amount = %event.amount.value,
                    currency = %event.amount.currency,
                    error_code = e.error_code(),
                    error = %e,
                    "Reconciliation failed"
                );
                self.enqueue(FailedReconciliation::failed(event, &e));
                None
            }
            Attempt::TimedOut => {
                self.metrics.event_timed_out();
                error!(
                    vehicle_id = %event.vehicle_id,
                    kind = %event.kind,
                    amount = %event.amount.value,
                    currency = %event.amount.currency,
                    error_code = "TIMEOUT",
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Reconciliation timed out"
                );
                self.enqueue(FailedReconciliation::timed_out(event));
                None
            }
        }
    }

    /// Re-apply replayable backlog entries once.
    pub async fn replay_backlog(&self) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        let entries = self.backlog.drain();
        if entries.is_empty() {
            return summary;
        }

        info!(entries = entries.len(), "Replaying reconciliation backlog");

        for mut entry in entries {
            if !entry.is_replayable() {
                summary.held += 1;
                self.enqueue(entry);
                continue;
            }

            match self.attempt(&entry.event).await {
                Attempt::Done(outcome) => {
                    summary.replayed += 1;
                    self.metrics.event_replayed();
                    self.record_success(&outcome);
                }
                Attempt::Failed(e) => {
                    summary.failed += 1;
                    entry.attempts += 1;
                    entry.error_code = e.error_code();
                    entry.message = e.to_string();
                    entry.retryable = e.is_retryable();
                    self.enqueue(entry);
                }
                Attempt::TimedOut => {
                    summary.failed += 1;
                    entry.attempts += 1;
                    entry.reason = FailureReason::TimedOut;
                    self.enqueue(entry);
                }
            }
        }

        info!(
            replayed = summary.replayed,
            failed = summary.failed,
            held = summary.held,
            "Backlog replay finished"
        );
        summary
    }

    async fn attempt(&self, event: &BalanceEvent) -> Attempt {
        match timeout(self.timeout, self.engine.apply(event)).await {
            Ok(Ok(outcome)) => Attempt::Done(outcome),
            Ok(Err(e)) => Attempt::Failed(e),
            Err(_) => Attempt::TimedOut,
        }
    }

    fn record_success(&self, outcome: &ReconcileOutcome) {
        match outcome.merge {
            MergeOutcome::Applied => self.metrics.event_applied(),
            MergeOutcome::Ignored => self.metrics.event_ignored(),
        }
        if outcome.conversion.fallback {
            self.metrics.conversion_fallback();
        }
    }

    fn enqueue(&self, entry: FailedReconciliation) {
        if let Some(evicted) = self.backlog.push(entry) {
            self.metrics.backlog_dropped();
            warn!(
                vehicle_id = %evicted.event.vehicle_id,
                kind = %evicted.event.kind,
                "Reconciliation backlog full, oldest entry dropped"
            );
        }
        self.metrics.set_backlog_size(self.backlog.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ReconciliationMetrics;
    use async_trait::async_trait;
    use dealerbooks_common::{Currency, Result};
    use dealerbooks_fx::{
        CurrencyNormalizer, MockRateSource, RateProvider, RateProviderConfig, UnknownCurrencyPolicy,
    };
    use dealerbooks_ledger::{BalanceMutator, BalanceStore, MemoryBalanceStore, UpsertResult, VehicleBalance};
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store that can be made to fail or stall.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryBalanceStore,
        failing: AtomicBool,
        delay: Mutex<Option<Duration>>,
    }

    impl FlakyStore {
        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn set_delay(&self, delay: Option<Duration>) {
            *self.delay.lock() = delay;
        }
    }

    #[async_trait]
    impl BalanceStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn get(&self, vehicle_id: VehicleId) -> Result<Option<VehicleBalance>> {
            self.inner.get(vehicle_id).await
        }

        async fn get_many(&self, vehicle_ids: &[VehicleId]) -> Result<Vec<VehicleBalance>> {
            self.inner.get_many(vehicle_ids).await
        }

        async fn upsert(&self, vehicle_id: VehicleId, mutate: BalanceMutator) -> Result<UpsertResult> {
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(DealerBooksError::StoreUnavailable("connection refused".to_string()));
            }
            self.inner.upsert(vehicle_id, mutate).await
        }
    }

    fn setup(capacity: usize) -> (Arc<FlakyStore>, SharedMetrics, ReconciliationHook) {
        let source = Arc::new(MockRateSource::new("test"));
        let provider = Arc::new(RateProvider::new(source, RateProviderConfig::default()));
        let store = Arc::new(FlakyStore::default());
        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            CurrencyNormalizer::new(provider, UnknownCurrencyPolicy::Lenient),
        ));
        let metrics: SharedMetrics = Arc::new(ReconciliationMetrics::new());
        let hook = ReconciliationHook::new(
            engine,
            Arc::new(ReconciliationBacklog::new(capacity)),
            metrics.clone(),
            Duration::from_millis(50),
        );
        (store, metrics, hook)
    }

    fn ars(value: rust_decimal::Decimal) -> Money {
        Money::new(value, Currency::ars())
    }

    #[tokio::test]
    async fn test_success_counts() {
        let (_, metrics, hook) = setup(10);
        let vehicle = VehicleId::new();

        hook.after_sale(vehicle, &ars(dec!(1000))).await.unwrap();
        let outcome = hook.after_invoice(vehicle, &ars(dec!(1200))).await.unwrap();

        assert_eq!(outcome.merge, MergeOutcome::Ignored);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_received, 2);
        assert_eq!(snapshot.events_applied, 1);
        assert_eq!(snapshot.events_ignored, 1);
    }

    #[tokio::test]
    async fn test_failure_swallowed_and_recorded() {
        let (store, metrics, hook) = setup(10);
        store.set_failing(true);
        let vehicle = VehicleId::new();

        let outcome = hook
            .after_transaction(vehicle, ExpenseCategory::Service, &ars(dec!(500)))
            .await;

        assert!(outcome.is_none());
        assert_eq!(metrics.snapshot().events_failed, 1);
        assert_eq!(metrics.snapshot().backlog_size, 1);

        let entries = hook.backlog().entries();
        assert_eq!(entries[0].reason, FailureReason::Failed);
        assert_eq!(entries[0].error_code, "STORE_UNAVAILABLE");
        assert!(entries[0].retryable);
    }

    #[tokio::test]
    async fn test_replay_after_recovery() {
        let (store, metrics, hook) = setup(10);
        let vehicle = VehicleId::new();
        store.set_failing(true);
        hook.after_sale(vehicle, &ars(dec!(1000))).await;
        hook.after_transaction(vehicle, ExpenseCategory::Maintenance, &ars(dec!(50)))
            .await;

        // Still down: entries go back.
        let summary = hook.replay_backlog().await;
        assert_eq!(summary.failed, 2);
        assert_eq!(hook.backlog().entries()[0].attempts, 2);

        store.set_failing(false);
        let summary = hook.replay_backlog().await;

        assert_eq!(summary.replayed, 2);
        assert!(hook.backlog().is_empty());
        assert_eq!(metrics.snapshot().events_replayed, 2);
        assert_eq!(metrics.snapshot().backlog_size, 0);

        let balance = store.get(vehicle).await.unwrap().unwrap();
        assert_eq!(balance.sale_price, Some(dec!(1000)));
        assert_eq!(balance.investment, dec!(50));
    }

    #[tokio::test]
    async fn test_failed_purchase_does_not_overwrite_newer_one() {
        let (store, metrics, hook) = setup(10);
        let vehicle = VehicleId::new();

        store.set_failing(true);
        assert!(hook
            .after_transaction(vehicle, ExpenseCategory::VehiclePurchase, &ars(dec!(100)))
            .await
            .is_none());

        store.set_failing(false);
        hook.after_transaction(vehicle, ExpenseCategory::VehiclePurchase, &ars(dec!(150)))
            .await
            .unwrap();

        let summary = hook.replay_backlog().await;

        assert_eq!(summary.held, 1);
        assert_eq!(summary.replayed, 0);
        assert_eq!(metrics.snapshot().events_replayed, 0);
        let held = hook.backlog().entries();
        assert_eq!(held[0].event.kind, EventKind::Purchase);
        assert_eq!(held[0].event.amount.value, dec!(100));

        let balance = store.get(vehicle).await.unwrap().unwrap();
        assert_eq!(balance.purchase_price, dec!(150));
    }

    #[tokio::test]
    async fn test_timed_out_expense_held() {
        let (store, metrics, hook) = setup(10);
        let vehicle = VehicleId::new();
        store.set_delay(Some(Duration::from_millis(500)));

        assert!(hook
            .after_transaction(vehicle, ExpenseCategory::Other, &ars(dec!(10)))
            .await
            .is_none());
        assert!(hook.after_sale(vehicle, &ars(dec!(900))).await.is_none());
        assert_eq!(metrics.snapshot().events_timed_out, 2);

        store.set_delay(None);
        let summary = hook.replay_backlog().await;

        assert_eq!(summary.replayed, 1);
        assert_eq!(summary.held, 1);
        let held = hook.backlog().entries();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].event.kind, EventKind::Expense);

        let balance = store.get(vehicle).await.unwrap().unwrap();
        assert_eq!(balance.sale_price, Some(dec!(900)));
        assert_eq!(balance.investment, dec!(0));
    }

    #[tokio::test]
    async fn test_invalid_amount_not_replayed() {
        let (_, _, hook) = setup(10);

        hook.after_sale(VehicleId::new(), &ars(dec!(-1))).await;
        let summary = hook.replay_backlog().await;

        assert_eq!(summary.held, 1);
        assert_eq!(hook.backlog().len(), 1);
    }

    #[tokio::test]
    async fn test_overflow_swallowed_and_held() {
        let (store, metrics, hook) = setup(10);
        let vehicle = VehicleId::new();

        assert!(hook
            .after_transaction(vehicle, ExpenseCategory::Service, &ars(Decimal::MAX))
            .await
            .is_some());
        assert!(hook
            .after_transaction(vehicle, ExpenseCategory::Service, &ars(Decimal::MAX))
            .await
            .is_none());
        assert!(hook
            .after_transaction(
                VehicleId::new(),
                ExpenseCategory::VehiclePurchase,
                &Money::new(Decimal::MAX / dec!(10), Currency::usd()),
            )
            .await
            .is_none());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_failed, 2);
        assert_eq!(snapshot.events_applied, 1);

        let entries = hook.backlog().entries();
        assert_eq!(entries[0].error_code, "INVALID_AMOUNT");
        assert_eq!(entries[1].error_code, "CONVERSION_ERROR");
        assert!(entries.iter().all(|e| !e.retryable));

        let summary = hook.replay_backlog().await;
        assert_eq!(summary.held, 2);
        let balance = store.get(vehicle).await.unwrap().unwrap();
        assert_eq!(balance.investment, Decimal::MAX);
    }

    #[tokio::test]
    async fn test_backlog_bounded() {
        let (store, metrics, hook) = setup(2);
        store.set_failing(true);

        for _ in 0..5 {
            hook.after_sale(VehicleId::new(), &ars(dec!(1))).await;
        }

        assert_eq!(hook.backlog().len(), 2);
        assert_eq!(metrics.snapshot().backlog_dropped, 3);
        assert_eq!(metrics.snapshot().backlog_size, 2);
    }
}
