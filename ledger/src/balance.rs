//! Per-vehicle balance and its merge rules.

use chrono::{DateTime, Utc};
use dealerbooks_common::{DealerBooksError, Result, VehicleId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Decimal places kept for the profit margin percentage.
pub const MARGIN_DECIMAL_PLACES: u32 = 2;

/// Financial ledger of one vehicle, all amounts in the settlement currency.
///
/// `profit` and `profit_margin` are present exactly when `sale_price` is, and
/// are recomputed on every applied mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleBalance {
    /// Vehicle this ledger belongs to.
    pub vehicle_id: VehicleId,
    /// Cost basis; replaced by every purchase event.
    pub purchase_price: Decimal,
    /// Accumulated expenses.
    pub investment: Decimal,
    /// Realized sale price; first write wins.
    pub sale_price: Option<Decimal>,
    /// `sale_price - purchase_price - investment`.
    pub profit: Option<Decimal>,
    /// `profit / (purchase_price + investment) * 100`, or zero without cost basis.
    pub profit_margin: Option<Decimal>,
    /// When the ledger row was created.
    pub created_at: DateTime<Utc>,
    /// When the ledger was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl VehicleBalance {
    /// Create an untouched ledger.
    pub fn new(vehicle_id: VehicleId) -> Self {
        let now = Utc::now();
        Self {
            vehicle_id,
            purchase_price: Decimal::ZERO,
            investment: Decimal::ZERO,
            sale_price: None,
            profit: None,
            profit_margin: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if a sale has been recorded.
    pub fn is_sold(&self) -> bool {
        self.sale_price.is_some()
    }

    /// Apply a mutation under its merge policy.
    ///
    /// Fails without touching the ledger if a field or a derived value
    /// would overflow.
    pub fn apply(&mut self, mutation: &BalanceMutation) -> Result<MergeOutcome> {
        let mut next = self.clone();
        let outcome = match mutation {
            BalanceMutation::ReplacePurchasePrice(amount) => {
                next.purchase_price = *amount;
                MergeOutcome::Applied
            }
            BalanceMutation::AddInvestment(amount) => {
                next.investment = self
                    .investment
                    .checked_add(*amount)
                    .ok_or_else(|| overflow("investment", *amount))?;
                MergeOutcome::Applied
            }
            BalanceMutation::SetSalePriceIfAbsent(amount) => {
                if self.sale_price.is_some() {
                    MergeOutcome::Ignored
                } else {
                    next.sale_price = Some(*amount);
                    MergeOutcome::Applied
                }
            }
            BalanceMutation::Override(fields) => {
                if fields.is_empty() {
                    MergeOutcome::Ignored
                } else {
                    if let Some(purchase_price) = fields.purchase_price {
                        next.purchase_price = purchase_price;
                    }
                    if let Some(investment) = fields.investment {
                        next.investment = investment;
                    }
                    if let Some(sale_price) = fields.sale_price {
                        next.sale_price = Some(sale_price);
                    }
                    MergeOutcome::Applied
                }
            }
        };

        if outcome == MergeOutcome::Applied {
            next.recompute_derived()?;
            next.updated_at = Utc::now();
            *self = next;
        }

        Ok(outcome)
    }

    /// Recompute profit and margin from the current fields.
    pub fn recompute_derived(&mut self) -> Result<()> {
        match self.sale_price {
            Some(sale_price) => {
                let (profit, margin) = compute_profit(self.purchase_price, self.investment, sale_price)
                    .ok_or_else(|| overflow("profit", sale_price))?;
                self.profit = Some(profit);
                self.profit_margin = Some(margin);
            }
            None => {
                self.profit = None;
                self.profit_margin = None;
            }
        }
        Ok(())
    }
}

fn overflow(field: &str, amount: Decimal) -> DealerBooksError {
    DealerBooksError::InvalidAmount {
        field: field.to_string(),
        amount: format!("{} (overflow)", amount),
    }
}

/// Profit and margin percentage for a sold vehicle, `None` on overflow.
pub fn compute_profit(purchase_price: Decimal, investment: Decimal, sale_price: Decimal) -> Option<(Decimal, Decimal)> {
    let cost_basis = purchase_price.checked_add(investment)?;
    let profit = sale_price.checked_sub(cost_basis)?;
    let margin = if cost_basis.is_zero() {
        Decimal::ZERO
    } else {
        profit
            .checked_div(cost_basis)?
            .checked_mul(Decimal::ONE_HUNDRED)?
            .round_dp(MARGIN_DECIMAL_PLACES)
    };
    Some((profit, margin))
}

/// A change to a vehicle ledger, already normalized to the settlement currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceMutation {
    /// Latest write wins.
    ReplacePurchasePrice(Decimal),
    /// Accumulate.
    AddInvestment(Decimal),
    /// First write wins.
    SetSalePriceIfAbsent(Decimal),
    /// Manual replacement of the given fields.
    Override(BalanceOverride),
}

/// Whether a mutation changed the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    Applied,
    /// The merge policy made this mutation a no-op.
    Ignored,
}

/// Fields replaced by a manual admin override. Absent fields are untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceOverride {
    #[serde(default)]
    pub purchase_price: Option<Decimal>,
    #[serde(default)]
    pub investment: Option<Decimal>,
    #[serde(default)]
    pub sale_price: Option<Decimal>,
}

impl BalanceOverride {
    pub fn is_empty(&self) -> bool {
        self.purchase_price.is_none() && self.investment.is_none() && self.sale_price.is_none()
    }

    /// Fields paired with their names, for validation messages.
    pub fn fields(&self) -> [(&'static str, Option<Decimal>); 3] {
        [
            ("purchasePrice", self.purchase_price),
            ("investment", self.investment),
            ("salePrice", self.sale_price),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_balance_is_zeroed() {
        let balance = VehicleBalance::new(VehicleId::new());

        assert_eq!(balance.purchase_price, Decimal::ZERO);
        assert_eq!(balance.investment, Decimal::ZERO);
        assert!(!balance.is_sold());
        assert!(balance.profit.is_none());
        assert!(balance.profit_margin.is_none());
    }

    #[test]
    fn test_purchase_replaces() {
        let mut balance = VehicleBalance::new(VehicleId::new());

        balance.apply(&BalanceMutation::ReplacePurchasePrice(dec!(100))).unwrap();
        balance.apply(&BalanceMutation::ReplacePurchasePrice(dec!(150))).unwrap();

        assert_eq!(balance.purchase_price, dec!(150));
    }

    #[test]
    fn test_sale_first_write_wins() {
        let mut balance = VehicleBalance::new(VehicleId::new());

        assert_eq!(
            balance.apply(&BalanceMutation::SetSalePriceIfAbsent(dec!(1000))).unwrap(),
            MergeOutcome::Applied
        );
        let updated_at = balance.updated_at;
        assert_eq!(
            balance.apply(&BalanceMutation::SetSalePriceIfAbsent(dec!(1200))).unwrap(),
            MergeOutcome::Ignored
        );

        assert_eq!(balance.sale_price, Some(dec!(1000)));
        assert_eq!(balance.updated_at, updated_at);
    }

    #[test]
    fn test_derived_fields_follow_every_mutation() {
        let mut balance = VehicleBalance::new(VehicleId::new());
        balance.apply(&BalanceMutation::ReplacePurchasePrice(dec!(1000000))).unwrap();
        balance.apply(&BalanceMutation::AddInvestment(dec!(80000))).unwrap();
        assert!(balance.profit.is_none());

        balance.apply(&BalanceMutation::SetSalePriceIfAbsent(dec!(1300000))).unwrap();
        assert_eq!(balance.profit, Some(dec!(220000)));
        assert_eq!(balance.profit_margin, Some(dec!(20.37)));

        // A later expense is reflected immediately.
        balance.apply(&BalanceMutation::AddInvestment(dec!(20000))).unwrap();
        assert_eq!(balance.profit, Some(dec!(200000)));
        assert_eq!(balance.profit_margin, Some(dec!(18.18)));
    }

    #[test]
    fn test_margin_zero_without_cost_basis() {
        let (profit, margin) = compute_profit(Decimal::ZERO, Decimal::ZERO, dec!(500)).unwrap();
        assert_eq!(profit, dec!(500));
        assert_eq!(margin, Decimal::ZERO);
    }

    #[test]
    fn test_negative_profit() {
        let (profit, margin) = compute_profit(dec!(1000), dec!(0), dec!(750)).unwrap();
        assert_eq!(profit, dec!(-250));
        assert_eq!(margin, dec!(-25));
    }

    #[test]
    fn test_override_replaces_fields() {
        let mut balance = VehicleBalance::new(VehicleId::new());
        balance.apply(&BalanceMutation::AddInvestment(dec!(300))).unwrap();
        balance.apply(&BalanceMutation::SetSalePriceIfAbsent(dec!(2000))).unwrap();

        let outcome = balance.apply(&BalanceMutation::Override(BalanceOverride {
            investment: Some(dec!(100)),
            sale_price: Some(dec!(2500)),
            ..Default::default()
        })).unwrap();

        assert_eq!(outcome, MergeOutcome::Applied);
        assert_eq!(balance.investment, dec!(100));
        assert_eq!(balance.sale_price, Some(dec!(2500)));
        assert_eq!(balance.profit, Some(dec!(2400)));
    }

    #[test]
    fn test_empty_override_ignored() {
        let mut balance = VehicleBalance::new(VehicleId::new());
        let outcome = balance.apply(&BalanceMutation::Override(BalanceOverride::default())).unwrap();
        assert_eq!(outcome, MergeOutcome::Ignored);
    }

    #[test]
    fn test_investment_overflow_leaves_ledger_untouched() {
        let mut balance = VehicleBalance::new(VehicleId::new());
        balance.apply(&BalanceMutation::AddInvestment(Decimal::MAX)).unwrap();
        let before = balance.clone();

        let err = balance
            .apply(&BalanceMutation::AddInvestment(Decimal::MAX))
            .unwrap_err();

        assert!(matches!(err, DealerBooksError::InvalidAmount { ref field, .. } if field == "investment"));
        assert!(!err.is_retryable());
        assert_eq!(balance, before);
    }

    #[test]
    fn test_profit_overflow_rejects_sale() {
        assert!(compute_profit(Decimal::MAX, Decimal::ONE, dec!(10)).is_none());
        assert!(compute_profit(dec!(1), Decimal::ZERO, Decimal::MIN).is_none());

        let mut balance = VehicleBalance::new(VehicleId::new());
        balance.apply(&BalanceMutation::ReplacePurchasePrice(Decimal::MAX)).unwrap();
        balance.apply(&BalanceMutation::AddInvestment(Decimal::MAX)).unwrap();

        let err = balance
            .apply(&BalanceMutation::SetSalePriceIfAbsent(dec!(1)))
            .unwrap_err();

        assert!(matches!(err, DealerBooksError::InvalidAmount { ref field, .. } if field == "profit"));
        assert!(balance.sale_price.is_none());
        assert!(balance.profit.is_none());
    }
}
