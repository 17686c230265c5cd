//! Events emitted by the transaction, sale and invoice modules.

use std::fmt;
use std::str::FromStr;

use dealerbooks_common::{Money, VehicleId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::balance::BalanceMutation;

/// Kind of ledger event; decides the merge policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Replaces the purchase price.
    Purchase,
    /// Adds to investment.
    Expense,
    /// Sets the sale price if none is set.
    Sale,
    /// Competes with `Sale` for the same sale price slot.
    Invoice,
}

impl EventKind {
    /// Mutation this event applies with an already-normalized amount.
    pub fn mutation(self, amount: Decimal) -> BalanceMutation {
        match self {
            EventKind::Purchase => BalanceMutation::ReplacePurchasePrice(amount),
            EventKind::Expense => BalanceMutation::AddInvestment(amount),
            EventKind::Sale | EventKind::Invoice => BalanceMutation::SetSalePriceIfAbsent(amount),
        }
    }

    /// Whether applying the same event twice leaves the ledger as applying it once.
    pub fn is_idempotent(self) -> bool {
        !matches!(self, EventKind::Expense)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Purchase => "purchase",
            EventKind::Expense => "expense",
            EventKind::Sale => "sale",
            EventKind::Invoice => "invoice",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a recorded vehicle transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    VehiclePurchase,
    Service,
    Maintenance,
    Other,
}

impl ExpenseCategory {
    /// Purchases set the cost basis, everything else is investment.
    pub fn event_kind(self) -> EventKind {
        match self {
            ExpenseCategory::VehiclePurchase => EventKind::Purchase,
            ExpenseCategory::Service | ExpenseCategory::Maintenance | ExpenseCategory::Other => {
                EventKind::Expense
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExpenseCategory::VehiclePurchase => "vehicle_purchase",
            ExpenseCategory::Service => "service",
            ExpenseCategory::Maintenance => "maintenance",
            ExpenseCategory::Other => "other",
        }
    }
}

impl fmt::Display for ExpenseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown transaction category string.
#[derive(Debug, Clone, Error)]
#[error("Unknown expense category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for ExpenseCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vehicle_purchase" => Ok(ExpenseCategory::VehiclePurchase),
            "service" => Ok(ExpenseCategory::Service),
            "maintenance" => Ok(ExpenseCategory::Maintenance),
            "other" => Ok(ExpenseCategory::Other),
            _ => Err(UnknownCategory(s.to_string())),
        }
    }
}

/// A ledger event in its source currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub vehicle_id: VehicleId,
    pub kind: EventKind,
    pub amount: Money,
}

impl BalanceEvent {
    pub fn new(vehicle_id: VehicleId, kind: EventKind, amount: Money) -> Self {
        Self {
            vehicle_id,
            kind,
            amount,
        }
    }

    /// Event for a recorded transaction of the given category.
    pub fn from_category(vehicle_id: VehicleId, category: ExpenseCategory, amount: Money) -> Self {
        Self::new(vehicle_id, category.event_kind(), amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_category_mapping() {
        assert_eq!(ExpenseCategory::VehiclePurchase.event_kind(), EventKind::Purchase);
        assert_eq!(ExpenseCategory::Service.event_kind(), EventKind::Expense);
        assert_eq!(ExpenseCategory::Maintenance.event_kind(), EventKind::Expense);
        assert_eq!(ExpenseCategory::Other.event_kind(), EventKind::Expense);
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(
            "vehicle_purchase".parse::<ExpenseCategory>().unwrap(),
            ExpenseCategory::VehiclePurchase
        );
        assert_eq!(" Service ".parse::<ExpenseCategory>().unwrap(), ExpenseCategory::Service);
        assert!("fuel".parse::<ExpenseCategory>().is_err());
    }

    #[test]
    fn test_sale_and_invoice_share_slot() {
        assert_eq!(
            EventKind::Sale.mutation(dec!(10)),
            EventKind::Invoice.mutation(dec!(10))
        );
        assert!(!EventKind::Expense.is_idempotent());
        assert!(EventKind::Invoice.is_idempotent());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ExpenseCategory::VehiclePurchase).unwrap();
        assert_eq!(json, "\"vehicle_purchase\"");
        let kind: EventKind = serde_json::from_str("\"invoice\"").unwrap();
        assert_eq!(kind, EventKind::Invoice);
    }
}
