//! Reconciliation engine: folds ledger events into per-vehicle balances.

use std::sync::Arc;

use dealerbooks_common::{DealerBooksError, Money, Result, VehicleId};
use dealerbooks_fx::{Conversion, CurrencyNormalizer};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::balance::{BalanceMutation, BalanceOverride, MergeOutcome, VehicleBalance};
use crate::event::{BalanceEvent, EventKind, ExpenseCategory};
use crate::store::BalanceStore;

/// What one reconciled event did to the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub vehicle_id: VehicleId,
    pub kind: EventKind,
    /// Amount as received and as applied.
    pub conversion: Conversion,
    /// `Ignored` when a sale price was already recorded.
    pub merge: MergeOutcome,
    /// Ledger row after the event.
    pub balance: VehicleBalance,
    /// Whether this event created the ledger row.
    pub created: bool,
}

/// The reconciliation engine normalizes each event to the settlement
/// currency and merges it into the vehicle's ledger in a single atomic
/// read-modify-write on the store.
pub struct ReconciliationEngine {
    store: Arc<dyn BalanceStore>,
    normalizer: CurrencyNormalizer,
}

impl ReconciliationEngine {
    /// Create a new reconciliation engine.
    pub fn new(store: Arc<dyn BalanceStore>, normalizer: CurrencyNormalizer) -> Self {
        Self { store, normalizer }
    }

    pub fn store(&self) -> &Arc<dyn BalanceStore> {
        &self.store
    }

    pub fn normalizer(&self) -> &CurrencyNormalizer {
        &self.normalizer
    }

    /// Apply one event to a vehicle's ledger, creating the ledger if needed.
    #[instrument(
        skip_all,
        fields(vehicle_id = %vehicle_id, kind = %kind, currency = %amount.currency)
    )]
    pub async fn apply_event(
        &self,
        vehicle_id: VehicleId,
        kind: EventKind,
        amount: &Money,
    ) -> Result<ReconcileOutcome> {
        if amount.is_negative() {
            return Err(DealerBooksError::InvalidAmount {
                field: kind.to_string(),
                amount: amount.to_string(),
            });
        }

        let mut conversion = self.normalizer.normalize(amount)?;
        // Identity and fallback amounts arrive unrounded; the ledger keeps
        // settlement-currency precision in every store.
        conversion.output = conversion.output.round();
        let mutation = kind.mutation(conversion.output.value);

        let result = self
            .store
            .upsert(vehicle_id, Box::new(move |balance: &mut VehicleBalance| balance.apply(&mutation)))
            .await?;

        match result.outcome {
            MergeOutcome::Applied => info!(
                amount = %conversion.output,
                created = result.created,
                "Ledger event applied"
            ),
            MergeOutcome::Ignored => debug!(
                amount = %conversion.output,
                sale_price = ?result.balance.sale_price,
                "Sale price already recorded, event ignored"
            ),
        }

        Ok(ReconcileOutcome {
            vehicle_id,
            kind,
            conversion,
            merge: result.outcome,
            balance: result.balance,
            created: result.created,
        })
    }

    /// Apply a typed event.
    pub async fn apply(&self, event: &BalanceEvent) -> Result<ReconcileOutcome> {
        self.apply_event(event.vehicle_id, event.kind, &event.amount).await
    }

    /// Reconcile a recorded vehicle transaction.
    pub async fn reconcile(
        &self,
        vehicle_id: VehicleId,
        category: ExpenseCategory,
        amount: &Money,
    ) -> Result<ReconcileOutcome> {
        self.apply_event(vehicle_id, category.event_kind(), amount).await
    }

    /// Reconcile a recorded sale.
    pub async fn reconcile_sale(&self, vehicle_id: VehicleId, sale_price: &Money) -> Result<ReconcileOutcome> {
        self.apply_event(vehicle_id, EventKind::Sale, sale_price).await
    }

    /// Reconcile an issued invoice.
    pub async fn reconcile_invoice(&self, vehicle_id: VehicleId, total: &Money) -> Result<ReconcileOutcome> {
        self.apply_event(vehicle_id, EventKind::Invoice, total).await
    }

    /// Current ledger row, `None` if nothing has been reconciled yet.
    pub async fn balance(&self, vehicle_id: VehicleId) -> Result<Option<VehicleBalance>> {
        self.store.get(vehicle_id).await
    }

    /// Replace ledger fields directly, bypassing the merge policies.
    /// Amounts are taken to be in the settlement currency and are rounded
    /// to its decimal places.
    #[instrument(skip_all, fields(vehicle_id = %vehicle_id))]
    pub async fn override_balance(
        &self,
        vehicle_id: VehicleId,
        mut fields: BalanceOverride,
    ) -> Result<VehicleBalance> {
        for (name, value) in fields.fields() {
            if let Some(value) = value.filter(|v| *v < Decimal::ZERO) {
                return Err(DealerBooksError::InvalidAmount {
                    field: name.to_string(),
                    amount: value.to_string(),
                });
            }
        }

        let places = self.normalizer.settlement_currency().decimal_places();
        for value in [&mut fields.purchase_price, &mut fields.investment, &mut fields.sale_price]
            .into_iter()
            .flatten()
        {
            *value = value.round_dp(places);
        }

        let mutation = BalanceMutation::Override(fields);
        let result = self
            .store
            .upsert(vehicle_id, Box::new(move |balance: &mut VehicleBalance| balance.apply(&mutation)))
            .await?;

        info!(outcome = ?result.outcome, "Ledger overridden");
        Ok(result.balance)
    }
}
