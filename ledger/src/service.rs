//! Balance queries, manual overrides and the tenant report.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dealerbooks_common::{DealerBooksError, Result, TenantId, VehicleId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::balance::{BalanceOverride, VehicleBalance, MARGIN_DECIMAL_PLACES};
use crate::directory::{VehicleDirectory, VehicleRef};
use crate::engine::ReconciliationEngine;

/// Client-facing balance of one vehicle. Vehicles without a ledger row
/// render with zero amounts and null optional fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    pub vehicle: VehicleRef,
    pub has_ledger: bool,
    pub purchase_price: Decimal,
    pub investment: Decimal,
    pub sale_price: Option<Decimal>,
    pub profit: Option<Decimal>,
    pub profit_margin: Option<Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BalanceView {
    fn new(vehicle: VehicleRef, balance: Option<&VehicleBalance>) -> Self {
        match balance {
            Some(balance) => Self {
                vehicle,
                has_ledger: true,
                purchase_price: balance.purchase_price,
                investment: balance.investment,
                sale_price: balance.sale_price,
                profit: balance.profit,
                profit_margin: balance.profit_margin,
                updated_at: Some(balance.updated_at),
            },
            None => Self {
                vehicle,
                has_ledger: false,
                purchase_price: Decimal::ZERO,
                investment: Decimal::ZERO,
                sale_price: None,
                profit: None,
                profit_margin: None,
                updated_at: None,
            },
        }
    }

    pub fn is_sold(&self) -> bool {
        self.sale_price.is_some()
    }
}

/// Tenant-level totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_vehicles: usize,
    pub sold_vehicles: usize,
    pub total_purchase: Decimal,
    pub total_investment: Decimal,
    pub total_sales: Decimal,
    pub total_profit: Decimal,
    /// Mean margin over sold vehicles; zero when nothing is sold.
    pub average_profit_margin: Decimal,
}

impl ReportSummary {
    fn from_views(views: &[BalanceView]) -> Self {
        let mut summary = ReportSummary {
            total_vehicles: views.len(),
            ..Default::default()
        };
        let mut margin_sum = Decimal::ZERO;

        for view in views {
            summary.total_purchase += view.purchase_price;
            summary.total_investment += view.investment;
            if let Some(sale_price) = view.sale_price {
                summary.sold_vehicles += 1;
                summary.total_sales += sale_price;
                summary.total_profit += view.profit.unwrap_or_default();
                margin_sum += view.profit_margin.unwrap_or_default();
            }
        }

        if summary.sold_vehicles > 0 {
            summary.average_profit_margin =
                (margin_sum / Decimal::from(summary.sold_vehicles)).round_dp(MARGIN_DECIMAL_PLACES);
        }

        summary
    }
}

/// Balances report for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceReport {
    pub summary: ReportSummary,
    pub vehicles: Vec<BalanceView>,
}

/// Read side of the ledger plus the admin override. Every call is scoped
/// to a tenant through the vehicle directory.
pub struct BalanceService {
    engine: Arc<ReconciliationEngine>,
    directory: Arc<dyn VehicleDirectory>,
}

impl BalanceService {
    pub fn new(engine: Arc<ReconciliationEngine>, directory: Arc<dyn VehicleDirectory>) -> Self {
        Self { engine, directory }
    }

    async fn owned_vehicle(&self, tenant_id: TenantId, vehicle_id: VehicleId) -> Result<VehicleRef> {
        self.directory
            .find_vehicle(tenant_id, vehicle_id)
            .await?
            .ok_or(DealerBooksError::VehicleNotFound {
                tenant_id,
                vehicle_id,
            })
    }

    /// Balance of one vehicle of the tenant.
    #[instrument(skip(self))]
    pub async fn get_balance(&self, tenant_id: TenantId, vehicle_id: VehicleId) -> Result<BalanceView> {
        let vehicle = self.owned_vehicle(tenant_id, vehicle_id).await?;
        let balance = self.engine.balance(vehicle_id).await?;
        Ok(BalanceView::new(vehicle, balance.as_ref()))
    }

    /// Replace ledger fields by hand and recompute profit and margin.
    #[instrument(skip(self, fields))]
    pub async fn update_balance(
        &self,
        tenant_id: TenantId,
        vehicle_id: VehicleId,
        fields: BalanceOverride,
    ) -> Result<BalanceView> {
        let vehicle = self.owned_vehicle(tenant_id, vehicle_id).await?;
        let balance = self.engine.override_balance(vehicle_id, fields).await?;

        info!(
            tenant_id = %tenant_id,
            vehicle_id = %vehicle_id,
            sale_price = ?balance.sale_price,
            "Balance manually updated"
        );

        Ok(BalanceView::new(vehicle, Some(&balance)))
    }

    /// Every vehicle of the tenant with its balance, plus totals.
    #[instrument(skip(self))]
    pub async fn get_balances_report(&self, tenant_id: TenantId) -> Result<BalanceReport> {
        let vehicles = self.directory.list_vehicles(tenant_id).await?;
        let ids: Vec<VehicleId> = vehicles.iter().map(|v| v.id).collect();

        let balances: HashMap<VehicleId, VehicleBalance> = self
            .engine
            .store()
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|b| (b.vehicle_id, b))
            .collect();

        let views: Vec<BalanceView> = vehicles
            .into_iter()
            .map(|vehicle| {
                let balance = balances.get(&vehicle.id);
                BalanceView::new(vehicle, balance)
            })
            .collect();

        Ok(BalanceReport {
            summary: ReportSummary::from_views(&views),
            vehicles: views,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryVehicleDirectory;
    use crate::event::{EventKind, ExpenseCategory};
    use crate::store::MemoryBalanceStore;
    use dealerbooks_common::{Currency, Money};
    use dealerbooks_fx::{CurrencyNormalizer, MockRateSource, RateProvider, RateProviderConfig, UnknownCurrencyPolicy};
    use rust_decimal_macros::dec;

    struct Fixture {
        tenant: TenantId,
        engine: Arc<ReconciliationEngine>,
        directory: Arc<InMemoryVehicleDirectory>,
        service: BalanceService,
    }

    fn setup() -> Fixture {
        let source = Arc::new(MockRateSource::new("test"));
        let provider = Arc::new(RateProvider::new(source, RateProviderConfig::default()));
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::new(MemoryBalanceStore::new()),
            CurrencyNormalizer::new(provider, UnknownCurrencyPolicy::Lenient),
        ));
        let directory = Arc::new(InMemoryVehicleDirectory::new());
        let service = BalanceService::new(engine.clone(), directory.clone());
        Fixture {
            tenant: TenantId::new(),
            engine,
            directory,
            service,
        }
    }

    impl Fixture {
        fn add_vehicle(&self, model: &str) -> VehicleId {
            let id = VehicleId::new();
            self.directory
                .register(self.tenant, VehicleRef::new(id, "Ford", model));
            id
        }

        async fn event(&self, vehicle: VehicleId, kind: EventKind, value: Decimal) {
            self.engine
                .apply_event(vehicle, kind, &Money::new(value, Currency::ars()))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_balance_without_ledger_renders_zeros() {
        let fx = setup();
        let vehicle = fx.add_vehicle("Focus");

        let view = fx.service.get_balance(fx.tenant, vehicle).await.unwrap();

        assert!(!view.has_ledger);
        assert_eq!(view.purchase_price, Decimal::ZERO);
        assert_eq!(view.investment, Decimal::ZERO);
        assert!(view.sale_price.is_none());
        assert!(view.profit.is_none());
    }

    #[tokio::test]
    async fn test_other_tenant_not_found() {
        let fx = setup();
        let vehicle = fx.add_vehicle("Focus");

        let err = fx.service.get_balance(TenantId::new(), vehicle).await.unwrap_err();
        assert!(err.is_not_found());

        let err = fx
            .service
            .update_balance(TenantId::new(), vehicle, BalanceOverride::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_balance_after_scenario() {
        let fx = setup();
        let vehicle = fx.add_vehicle("Ranger");
        fx.engine
            .reconcile(
                vehicle,
                ExpenseCategory::VehiclePurchase,
                &Money::new(dec!(1000000), Currency::ars()),
            )
            .await
            .unwrap();

        let view = fx.service.get_balance(fx.tenant, vehicle).await.unwrap();

        assert!(view.has_ledger);
        assert_eq!(view.purchase_price, dec!(1000000));
        assert!(view.profit.is_none());

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("purchasePrice").is_some());
        assert!(json["salePrice"].is_null());
    }

    #[tokio::test]
    async fn test_update_balance_creates_row() {
        let fx = setup();
        let vehicle = fx.add_vehicle("Ka");

        let view = fx
            .service
            .update_balance(
                fx.tenant,
                vehicle,
                BalanceOverride {
                    purchase_price: Some(dec!(800)),
                    sale_price: Some(dec!(1000)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(view.has_ledger);
        assert_eq!(view.profit, Some(dec!(200)));
        assert_eq!(view.profit_margin, Some(dec!(25)));
    }

    #[tokio::test]
    async fn test_report_summary() {
        let fx = setup();
        let sold_a = fx.add_vehicle("Focus");
        let sold_b = fx.add_vehicle("Fiesta");
        let unsold = fx.add_vehicle("Ka");
        fx.add_vehicle("Mustang");

        fx.event(sold_a, EventKind::Purchase, dec!(1000)).await;
        fx.event(sold_a, EventKind::Sale, dec!(1200)).await;
        fx.event(sold_b, EventKind::Purchase, dec!(2000)).await;
        fx.event(sold_b, EventKind::Expense, dec!(500)).await;
        fx.event(sold_b, EventKind::Invoice, dec!(2000)).await;
        fx.event(unsold, EventKind::Purchase, dec!(300)).await;

        let report = fx.service.get_balances_report(fx.tenant).await.unwrap();
        let summary = &report.summary;

        assert_eq!(report.vehicles.len(), 4);
        assert_eq!(summary.total_vehicles, 4);
        assert_eq!(summary.sold_vehicles, 2);
        assert_eq!(summary.total_purchase, dec!(3300));
        assert_eq!(summary.total_investment, dec!(500));
        assert_eq!(summary.total_sales, dec!(3200));
        assert_eq!(summary.total_profit, dec!(-300));
        // (20 + -20) / 2
        assert_eq!(summary.average_profit_margin, dec!(0));
    }

    #[tokio::test]
    async fn test_report_nothing_sold() {
        let fx = setup();
        let vehicle = fx.add_vehicle("Ka");
        fx.event(vehicle, EventKind::Purchase, dec!(300)).await;

        let report = fx.service.get_balances_report(fx.tenant).await.unwrap();

        assert_eq!(report.summary.sold_vehicles, 0);
        assert_eq!(report.summary.average_profit_margin, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_report_empty_tenant() {
        let fx = setup();

        let report = fx.service.get_balances_report(TenantId::new()).await.unwrap();

        assert_eq!(report.summary, ReportSummary::default());
        assert!(report.vehicles.is_empty());
    }
}
