//! Simulation scenarios.

use std::fmt;

use clap::ValueEnum;
use dealerbooks_common::{Currency, Money};
use dealerbooks_ledger::{BalanceView, ExpenseCategory};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::dealer::DealerAction;
use crate::model::LedgerModel;

/// Most consecutive expenses of one vehicle fired together in a random round.
const MAX_EXPENSE_BURST: usize = 3;

/// Scenarios the simulator can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioKind {
    /// Purchase, expenses, sale and a USD purchase, with known results.
    Lifecycle,
    /// Many concurrent expenses and a sale/invoice race on one vehicle.
    Contention,
    /// Random interleavings on many vehicles checked against a sequential model.
    Random,
}

/// Knobs shared by the generated scenarios.
#[derive(Debug, Clone)]
pub struct ScenarioParams {
    pub vehicles: usize,
    pub events: usize,
    pub usd_rate: Decimal,
}

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// One action recorded against a vehicle, named by its scenario label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub vehicle: String,
    pub action: DealerAction,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Publish a new USD rate and refresh.
    SetRate { usd_rate: Decimal },
    /// Record one action and wait for its reconciliation.
    Record(Record),
    /// Record several actions at once.
    Concurrent { records: Vec<Record> },
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// A balance field that can be asserted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceField {
    PurchasePrice,
    Investment,
    SalePrice,
    Profit,
    ProfitMargin,
}

impl BalanceField {
    pub fn read(self, view: &BalanceView) -> Option<Decimal> {
        match self {
            BalanceField::PurchasePrice => Some(view.purchase_price),
            BalanceField::Investment => Some(view.investment),
            BalanceField::SalePrice => view.sale_price,
            BalanceField::Profit => view.profit,
            BalanceField::ProfitMargin => view.profit_margin,
        }
    }
}

impl fmt::Display for BalanceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BalanceField::PurchasePrice => "purchasePrice",
            BalanceField::Investment => "investment",
            BalanceField::SalePrice => "salePrice",
            BalanceField::Profit => "profit",
            BalanceField::ProfitMargin => "profitMargin",
        };
        f.write_str(name)
    }
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// A balance field has the given value (`None` means absent).
    BalanceEquals {
        vehicle: String,
        field: BalanceField,
        expected: Option<Decimal>,
    },
    /// The sale price is one of the candidates.
    SalePriceOneOf {
        vehicle: String,
        candidates: Vec<Decimal>,
    },
    /// Profit and margin agree with the stored amounts.
    ProfitConsistent { vehicle: String },
    /// The tenant report counts this many sold vehicles.
    SoldVehicles { expected: usize },
    /// Every reconciliation so far succeeded.
    NoFailedReconciliations,
}

fn ars(value: Decimal) -> Money {
    Money::new(value, Currency::ars())
}

fn record(vehicle: &str, action: DealerAction) -> ScenarioStep {
    ScenarioStep::Record(Record {
        vehicle: vehicle.to_string(),
        action,
    })
}

fn expect(vehicle: &str, field: BalanceField, expected: Option<Decimal>) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::BalanceEquals {
            vehicle: vehicle.to_string(),
            field,
            expected,
        },
    }
}

fn transaction(category: ExpenseCategory, amount: Money) -> DealerAction {
    DealerAction::Transaction { category, amount }
}

impl Scenario {
    /// Build a scenario. Generated scenarios draw from `rng`.
    pub fn build<R: Rng>(kind: ScenarioKind, params: &ScenarioParams, rng: &mut R) -> Self {
        match kind {
            ScenarioKind::Lifecycle => Self::lifecycle(),
            ScenarioKind::Contention => Self::contention(params, rng),
            ScenarioKind::Random => Self::random(params, rng),
        }
    }

    /// The end-to-end vehicle lifecycle with hand-computed results.
    pub fn lifecycle() -> Self {
        let car = "lifecycle";
        let import = "usd-purchase";

        let steps = vec![
            ScenarioStep::SetRate {
                usd_rate: Decimal::from(1000),
            },
            record(
                car,
                transaction(ExpenseCategory::VehiclePurchase, ars(Decimal::from(1_000_000))),
            ),
            expect(car, BalanceField::PurchasePrice, Some(Decimal::from(1_000_000))),
            expect(car, BalanceField::Investment, Some(Decimal::ZERO)),
            expect(car, BalanceField::SalePrice, None),
            expect(car, BalanceField::Profit, None),
            record(car, transaction(ExpenseCategory::Service, ars(Decimal::from(50_000)))),
            record(car, transaction(ExpenseCategory::Maintenance, ars(Decimal::from(30_000)))),
            expect(car, BalanceField::Investment, Some(Decimal::from(80_000))),
            record(
                car,
                DealerAction::Sale {
                    price: ars(Decimal::from(1_300_000)),
                },
            ),
            expect(car, BalanceField::SalePrice, Some(Decimal::from(1_300_000))),
            expect(car, BalanceField::Profit, Some(Decimal::from(220_000))),
            expect(car, BalanceField::ProfitMargin, Some(Decimal::new(2037, 2))),
            // A later invoice must not move the recorded sale price.
            record(
                car,
                DealerAction::Invoice {
                    total: ars(Decimal::from(1_250_000)),
                },
            ),
            expect(car, BalanceField::SalePrice, Some(Decimal::from(1_300_000))),
            record(
                import,
                transaction(
                    ExpenseCategory::VehiclePurchase,
                    Money::new(Decimal::from(100), Currency::usd()),
                ),
            ),
            expect(import, BalanceField::PurchasePrice, Some(Decimal::from(100_000))),
            ScenarioStep::Assert {
                condition: AssertCondition::SoldVehicles { expected: 1 },
            },
            ScenarioStep::Assert {
                condition: AssertCondition::NoFailedReconciliations,
            },
        ];

        Self {
            name: "lifecycle".to_string(),
            description: "Purchase, expenses and sale of one vehicle plus a USD purchase".to_string(),
            steps,
        }
    }

    /// Concurrent expenses on one vehicle, then a sale racing an invoice.
    pub fn contention<R: Rng>(params: &ScenarioParams, rng: &mut R) -> Self {
        let car = "contended";
        let mut model = LedgerModel::new(params.usd_rate);
        let mut steps = vec![ScenarioStep::SetRate {
            usd_rate: params.usd_rate,
        }];

        let purchase = transaction(
            ExpenseCategory::VehiclePurchase,
            ars(Decimal::new(rng.gen_range(50_000_000..500_000_000), 2)),
        );
        model.apply(car, &purchase);
        steps.push(record(car, purchase));

        let records = (0..params.events.max(1))
            .map(|_| {
                let action = transaction(random_expense_category(rng), random_amount(rng, 100, 200_000));
                model.apply(car, &action);
                Record {
                    vehicle: car.to_string(),
                    action,
                }
            })
            .collect();
        steps.push(ScenarioStep::Concurrent { records });
        steps.push(expect(
            car,
            BalanceField::Investment,
            model.balance(car).map(|b| b.investment),
        ));

        let sale = ars(Decimal::new(rng.gen_range(60_000_000..600_000_000), 2));
        let invoice = ars(Decimal::new(rng.gen_range(60_000_000..600_000_000), 2));
        steps.push(ScenarioStep::Concurrent {
            records: vec![
                Record {
                    vehicle: car.to_string(),
                    action: DealerAction::Sale { price: sale.clone() },
                },
                Record {
                    vehicle: car.to_string(),
                    action: DealerAction::Invoice {
                        total: invoice.clone(),
                    },
                },
            ],
        });
        steps.push(ScenarioStep::Assert {
            condition: AssertCondition::SalePriceOneOf {
                vehicle: car.to_string(),
                candidates: vec![sale.value, invoice.value],
            },
        });
        steps.push(ScenarioStep::Assert {
            condition: AssertCondition::ProfitConsistent {
                vehicle: car.to_string(),
            },
        });
        steps.push(ScenarioStep::Assert {
            condition: AssertCondition::NoFailedReconciliations,
        });

        Self {
            name: "contention".to_string(),
            description: format!("{} concurrent expenses on one vehicle", params.events),
            steps,
        }
    }

    /// Random event streams on many vehicles.
    ///
    /// Each vehicle's stream keeps its order; rounds take the next event of
    /// every vehicle at once, and a run of consecutive expenses on a vehicle
    /// may share a round since expenses commute.
    pub fn random<R: Rng>(params: &ScenarioParams, rng: &mut R) -> Self {
        let vehicles: Vec<String> = (0..params.vehicles.max(1))
            .map(|i| format!("vehicle-{}", i + 1))
            .collect();

        let mut streams: Vec<Vec<DealerAction>> = vec![Vec::new(); vehicles.len()];
        for _ in 0..params.events {
            let idx = rng.gen_range(0..vehicles.len());
            streams[idx].push(random_action(rng));
        }

        let mut model = LedgerModel::new(params.usd_rate);
        let mut steps = vec![ScenarioStep::SetRate {
            usd_rate: params.usd_rate,
        }];
        let mut cursors = vec![0usize; vehicles.len()];

        loop {
            let mut records = Vec::new();
            for (idx, stream) in streams.iter().enumerate() {
                let mut taken = 0;
                while cursors[idx] < stream.len() {
                    let action = &stream[cursors[idx]];
                    if taken > 0 && (!is_expense(action) || taken >= MAX_EXPENSE_BURST) {
                        break;
                    }
                    model.apply(&vehicles[idx], action);
                    records.push(Record {
                        vehicle: vehicles[idx].clone(),
                        action: action.clone(),
                    });
                    cursors[idx] += 1;
                    taken += 1;
                    if !is_expense(action) {
                        break;
                    }
                }
            }
            if records.is_empty() {
                break;
            }
            steps.push(ScenarioStep::Concurrent { records });
        }

        steps.extend(model.expectations());
        steps.push(ScenarioStep::Assert {
            condition: AssertCondition::NoFailedReconciliations,
        });

        Self {
            name: "random".to_string(),
            description: format!(
                "{} random events across {} vehicles",
                params.events,
                vehicles.len()
            ),
            steps,
        }
    }

    /// Number of actions the scenario records.
    pub fn event_count(&self) -> usize {
        self.steps
            .iter()
            .map(|step| match step {
                ScenarioStep::Record(_) => 1,
                ScenarioStep::Concurrent { records } => records.len(),
                _ => 0,
            })
            .sum()
    }
}

fn is_expense(action: &DealerAction) -> bool {
    matches!(
        action,
        DealerAction::Transaction { category, .. }
            if *category != ExpenseCategory::VehiclePurchase
    )
}

fn random_expense_category<R: Rng>(rng: &mut R) -> ExpenseCategory {
    match rng.gen_range(0..3) {
        0 => ExpenseCategory::Service,
        1 => ExpenseCategory::Maintenance,
        _ => ExpenseCategory::Other,
    }
}

/// Settlement-currency amount between `min` and `max` with cents, or a
/// foreign amount a thousand times smaller.
fn random_amount<R: Rng>(rng: &mut R, min: i64, max: i64) -> Money {
    let cents = rng.gen_range(min * 100..=max * 100);
    match rng.gen_range(0..10) {
        0..=6 => ars(Decimal::new(cents, 2)),
        7 | 8 => Money::new(Decimal::new(cents.max(1000), 5), Currency::usd()).round(),
        _ => Money::new(Decimal::new(cents.max(1000), 5), Currency::eur()).round(),
    }
}

fn random_action<R: Rng>(rng: &mut R) -> DealerAction {
    match rng.gen_range(0..100) {
        0..=14 => transaction(
            ExpenseCategory::VehiclePurchase,
            random_amount(rng, 500_000, 5_000_000),
        ),
        15..=79 => transaction(random_expense_category(rng), random_amount(rng, 1_000, 200_000)),
        80..=89 => DealerAction::Sale {
            price: random_amount(rng, 600_000, 6_000_000),
        },
        _ => DealerAction::Invoice {
            total: random_amount(rng, 600_000, 6_000_000),
        },
    }
}
