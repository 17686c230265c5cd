//! Simulated dealership.
//!
//! Wires a reconciler service to an in-memory ledger and plays the part of
//! the transaction, sale and invoice modules: each recorded action is handed
//! to the reconciliation hook the way those modules do after their own write.

use std::sync::Arc;

use dealerbooks_common::{Currency, Money, TenantId, VehicleId};
use dealerbooks_fx::{MockRateSource, RefreshOutcome};
use dealerbooks_ledger::{
    BalanceReport, BalanceView, ExpenseCategory, InMemoryVehicleDirectory, MemoryBalanceStore,
    ReconcileOutcome, VehicleRef,
};
use dealerbooks_reconciler::{ReconcilerService, ReconciliationHook, ServiceConfig};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

const CATALOG: &[(&str, &str)] = &[
    ("Fiat", "Cronos"),
    ("Toyota", "Hilux"),
    ("Volkswagen", "Amarok"),
    ("Ford", "Ranger"),
    ("Chevrolet", "Onix"),
    ("Renault", "Kangoo"),
    ("Peugeot", "208"),
];

/// Something an upstream module records against a vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DealerAction {
    /// A vehicle transaction (purchase or expense).
    Transaction {
        category: ExpenseCategory,
        amount: Money,
    },
    /// A sale record.
    Sale { price: Money },
    /// An invoice.
    Invoice { total: Money },
}

impl DealerAction {
    /// Hand the action to the reconciliation hook.
    pub async fn perform(
        &self,
        hook: &ReconciliationHook,
        vehicle_id: VehicleId,
    ) -> Option<ReconcileOutcome> {
        match self {
            DealerAction::Transaction { category, amount } => {
                hook.after_transaction(vehicle_id, *category, amount).await
            }
            DealerAction::Sale { price } => hook.after_sale(vehicle_id, price).await,
            DealerAction::Invoice { total } => hook.after_invoice(vehicle_id, total).await,
        }
    }
}

/// A dealership backed by an in-memory ledger.
pub struct SimulatedDealer {
    /// Tenant owning every simulated vehicle.
    pub tenant_id: TenantId,
    service: ReconcilerService,
    source: Arc<MockRateSource>,
    directory: Arc<InMemoryVehicleDirectory>,
}

impl SimulatedDealer {
    /// Create a dealer whose rate feed serves `usd_rate`.
    pub fn new(usd_rate: Decimal) -> Self {
        let mut config = ServiceConfig::default();
        config.rate_config.default_rate = usd_rate;
        config.reconcile_config.replay_interval = None;

        let source = Arc::new(MockRateSource::new("simulated-feed"));
        source.set_rate(Currency::usd(), usd_rate);
        let directory = Arc::new(InMemoryVehicleDirectory::new());
        let service = ReconcilerService::new(
            config,
            source.clone(),
            Arc::new(MemoryBalanceStore::new()),
            directory.clone(),
        );

        Self {
            tenant_id: TenantId::new(),
            service,
            source,
            directory,
        }
    }

    /// Start the reconciler.
    pub async fn open(&self) -> anyhow::Result<()> {
        self.service.start().await?;
        Ok(())
    }

    /// Stop the reconciler.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.service.stop().await?;
        Ok(())
    }

    /// Put a new vehicle on the lot.
    pub fn register_vehicle<R: Rng>(&self, rng: &mut R) -> VehicleId {
        let (brand, model) = CATALOG[rng.gen_range(0..CATALOG.len())];
        let mut vehicle = VehicleRef::new(VehicleId::new(), brand, model);
        vehicle.year = Some(rng.gen_range(2010..=2025));

        let id = vehicle.id;
        info!(vehicle_id = %id, brand, model, "Registered vehicle");
        self.directory.register(self.tenant_id, vehicle);
        id
    }

    /// Publish a new USD rate and refresh the provider from it.
    pub async fn set_usd_rate(&self, rate: Decimal) -> anyhow::Result<()> {
        self.source.set_rate(Currency::usd(), rate);
        match self.service.provider().refresh().await {
            RefreshOutcome::Updated { .. } => Ok(()),
            RefreshOutcome::Retained { reason } => {
                Err(anyhow::anyhow!("Rate refresh failed: {}", reason))
            }
        }
    }

    pub fn hook(&self) -> &Arc<ReconciliationHook> {
        self.service.hook()
    }

    pub fn service(&self) -> &ReconcilerService {
        &self.service
    }

    /// Record an action and reconcile it inline.
    pub async fn record(&self, vehicle_id: VehicleId, action: &DealerAction) -> Option<ReconcileOutcome> {
        action.perform(self.hook(), vehicle_id).await
    }

    pub async fn balance(&self, vehicle_id: VehicleId) -> anyhow::Result<BalanceView> {
        Ok(self
            .service
            .balances()
            .get_balance(self.tenant_id, vehicle_id)
            .await?)
    }

    pub async fn report(&self) -> anyhow::Result<BalanceReport> {
        Ok(self
            .service
            .balances()
            .get_balances_report(self.tenant_id)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_dealer_records_through_hook() {
        let dealer = SimulatedDealer::new(dec!(1000));
        dealer.open().await.unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let vehicle = dealer.register_vehicle(&mut rng);

        let purchase = DealerAction::Transaction {
            category: ExpenseCategory::VehiclePurchase,
            amount: Money::new(dec!(100), Currency::usd()),
        };
        let outcome = dealer.record(vehicle, &purchase).await.unwrap();
        assert!(outcome.created);

        let view = dealer.balance(vehicle).await.unwrap();
        assert_eq!(view.purchase_price, dec!(100000));
        assert!(view.sale_price.is_none());

        dealer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_usd_rate() {
        let dealer = SimulatedDealer::new(dec!(1000));
        dealer.set_usd_rate(dec!(1250)).await.unwrap();

        assert_eq!(
            dealer.service().provider().get_rate(&Currency::usd()),
            Some(dec!(1250))
        );
    }
}
