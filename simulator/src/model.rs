//! Sequential reference model of the vehicle ledgers.

use std::collections::BTreeMap;

use dealerbooks_common::{Currency, Money, VehicleId};
use dealerbooks_fx::SECONDARY_RATE_MULTIPLIER;
use dealerbooks_ledger::{EventKind, MergeOutcome, VehicleBalance};
use rust_decimal::Decimal;

use crate::dealer::DealerAction;
use crate::scenario::{AssertCondition, BalanceField, ScenarioStep};

/// Folds actions one at a time, in the order given, with a fixed USD rate.
pub struct LedgerModel {
    usd_rate: Decimal,
    balances: BTreeMap<String, VehicleBalance>,
}

impl LedgerModel {
    pub fn new(usd_rate: Decimal) -> Self {
        Self {
            usd_rate,
            balances: BTreeMap::new(),
        }
    }

    /// Settlement-currency value of an amount.
    pub fn to_settlement(&self, amount: &Money) -> Decimal {
        let value = if amount.currency == Currency::usd() {
            amount.value * self.usd_rate
        } else if amount.currency == Currency::eur() {
            amount.value * self.usd_rate * SECONDARY_RATE_MULTIPLIER
        } else {
            amount.value
        };
        Money::new(value, Currency::ars()).round().value
    }

    /// `None` when the ledger rejects the action; no field changes then.
    pub fn apply(&mut self, vehicle: &str, action: &DealerAction) -> Option<MergeOutcome> {
        let (kind, amount) = match action {
            DealerAction::Transaction { category, amount } => (category.event_kind(), amount),
            DealerAction::Sale { price } => (EventKind::Sale, price),
            DealerAction::Invoice { total } => (EventKind::Invoice, total),
        };
        let mutation = kind.mutation(self.to_settlement(amount));

        self.balances
            .entry(vehicle.to_string())
            .or_insert_with(|| VehicleBalance::new(VehicleId::new()))
            .apply(&mutation)
            .ok()
    }

    pub fn balance(&self, vehicle: &str) -> Option<&VehicleBalance> {
        self.balances.get(vehicle)
    }

    pub fn sold_vehicles(&self) -> usize {
        self.balances.values().filter(|b| b.is_sold()).count()
    }

    /// Assertions that the live ledgers match the model.
    pub fn expectations(&self) -> Vec<ScenarioStep> {
        let mut steps = Vec::new();
        for (vehicle, balance) in &self.balances {
            let expected = [
                (BalanceField::PurchasePrice, Some(balance.purchase_price)),
                (BalanceField::Investment, Some(balance.investment)),
                (BalanceField::SalePrice, balance.sale_price),
                (BalanceField::Profit, balance.profit),
                (BalanceField::ProfitMargin, balance.profit_margin),
            ];
            for (field, value) in expected {
                steps.push(ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals {
                        vehicle: vehicle.clone(),
                        field,
                        expected: value,
                    },
                });
            }
            steps.push(ScenarioStep::Assert {
                condition: AssertCondition::ProfitConsistent {
                    vehicle: vehicle.clone(),
                },
            });
        }
        steps.push(ScenarioStep::Assert {
            condition: AssertCondition::SoldVehicles {
                expected: self.sold_vehicles(),
            },
        });
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealerbooks_ledger::ExpenseCategory;
    use rust_decimal_macros::dec;

    #[test]
    fn test_conversion() {
        let model = LedgerModel::new(dec!(1000));

        assert_eq!(model.to_settlement(&Money::new(dec!(100), Currency::usd())), dec!(100000));
        assert_eq!(model.to_settlement(&Money::new(dec!(10), Currency::eur())), dec!(11000));
        assert_eq!(model.to_settlement(&Money::new(dec!(5.5), Currency::ars())), dec!(5.5));
        assert_eq!(model.to_settlement(&Money::new(dec!(5.556), Currency::ars())), dec!(5.56));
    }

    #[test]
    fn test_sale_first_write_wins() {
        let mut model = LedgerModel::new(dec!(1000));
        model.apply(
            "v1",
            &DealerAction::Transaction {
                category: ExpenseCategory::VehiclePurchase,
                amount: Money::new(dec!(1000), Currency::ars()),
            },
        );
        model.apply("v1", &DealerAction::Invoice { total: Money::new(dec!(1500), Currency::ars()) });
        model.apply("v1", &DealerAction::Sale { price: Money::new(dec!(9999), Currency::ars()) });

        let balance = model.balance("v1").unwrap();
        assert_eq!(balance.sale_price, Some(dec!(1500)));
        assert_eq!(balance.profit, Some(dec!(500)));
        assert_eq!(model.sold_vehicles(), 1);
    }
}
