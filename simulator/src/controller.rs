//! Simulation controller.

use std::collections::HashMap;
use std::time::Instant;

use anyhow::Context;
use dealerbooks_common::VehicleId;
use dealerbooks_ledger::{compute_profit, BalanceView};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::dealer::SimulatedDealer;
use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, Record, Scenario, ScenarioKind, ScenarioParams, ScenarioStep};

/// Controls the simulation.
pub struct SimulationController {
    /// The dealership under test.
    dealer: SimulatedDealer,
    /// Random number generator.
    rng: StdRng,
    /// Scenario labels to registered vehicles.
    vehicles: HashMap<String, VehicleId>,
    /// Simulation metrics.
    metrics: SimulationMetrics,
    /// Descriptions of the checks that did not hold.
    failures: Vec<String>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(usd_rate: Decimal, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            dealer: SimulatedDealer::new(usd_rate),
            rng,
            vehicles: HashMap::new(),
            metrics: SimulationMetrics::new(),
            failures: Vec::new(),
        }
    }

    /// Initialize the simulation.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        self.dealer.open().await?;
        info!(tenant_id = %self.dealer.tenant_id, "Dealer opened");
        Ok(())
    }

    /// Stop the simulated dealer.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.dealer.close().await
    }

    /// Build a scenario from the controller's random stream.
    pub fn scenario(&mut self, kind: ScenarioKind, params: &ScenarioParams) -> Scenario {
        Scenario::build(kind, params, &mut self.rng)
    }

    /// Run a scenario.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        info!(
            name = %scenario.name,
            description = %scenario.description,
            events = scenario.event_count(),
            "Running scenario"
        );

        for step in &scenario.steps {
            self.execute_step(step).await?;
        }

        Ok(())
    }

    async fn execute_step(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::SetRate { usd_rate } => {
                self.dealer.set_usd_rate(*usd_rate).await?;
                debug!(usd_rate = %usd_rate, "USD rate published");
            }
            ScenarioStep::Record(record) => {
                let vehicle_id = self.vehicle(&record.vehicle);
                let start = Instant::now();
                let outcome = self.dealer.record(vehicle_id, &record.action).await;
                self.metrics
                    .record_event(outcome.as_ref(), start.elapsed().as_micros() as u64);
            }
            ScenarioStep::Concurrent { records } => self.execute_concurrent(records).await?,
            ScenarioStep::Assert { condition } => {
                let failure = self.check(condition).await?;
                self.metrics.record_check(failure.is_none());
                if let Some(message) = failure {
                    warn!(condition = ?condition, "Property check failed: {}", message);
                    self.failures.push(message);
                }
            }
        }
        Ok(())
    }

    /// Spawn every record on the runtime and wait for all of them.
    async fn execute_concurrent(&mut self, records: &[Record]) -> anyhow::Result<()> {
        let handles: Vec<_> = records
            .iter()
            .map(|record| {
                let vehicle_id = self.vehicle(&record.vehicle);
                let hook = self.dealer.hook().clone();
                let action = record.action.clone();
                tokio::spawn(async move {
                    let start = Instant::now();
                    let outcome = action.perform(&hook, vehicle_id).await;
                    (outcome, start.elapsed().as_micros() as u64)
                })
            })
            .collect();

        for result in join_all(handles).await {
            let (outcome, latency_us) = result.context("Reconciliation task panicked")?;
            self.metrics.record_event(outcome.as_ref(), latency_us);
        }
        Ok(())
    }

    /// Registered vehicle for a label, registering it on first use.
    fn vehicle(&mut self, label: &str) -> VehicleId {
        if let Some(id) = self.vehicles.get(label) {
            return *id;
        }
        let id = self.dealer.register_vehicle(&mut self.rng);
        self.vehicles.insert(label.to_string(), id);
        id
    }

    /// `None` when the condition holds, otherwise what was observed.
    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<Option<String>> {
        let failure = match condition {
            AssertCondition::BalanceEquals {
                vehicle,
                field,
                expected,
            } => {
                let Some(view) = self.view(vehicle).await? else {
                    return Ok(Some(format!("{}: vehicle never recorded", vehicle)));
                };
                let actual = field.read(&view);
                (actual != *expected).then(|| {
                    format!(
                        "{}: {} is {:?}, expected {:?}",
                        vehicle, field, actual, expected
                    )
                })
            }
            AssertCondition::SalePriceOneOf {
                vehicle,
                candidates,
            } => {
                let Some(view) = self.view(vehicle).await? else {
                    return Ok(Some(format!("{}: vehicle never recorded", vehicle)));
                };
                match view.sale_price {
                    Some(price) if candidates.contains(&price) => None,
                    other => Some(format!(
                        "{}: salePrice is {:?}, expected one of {:?}",
                        vehicle, other, candidates
                    )),
                }
            }
            AssertCondition::ProfitConsistent { vehicle } => {
                let Some(view) = self.view(vehicle).await? else {
                    return Ok(Some(format!("{}: vehicle never recorded", vehicle)));
                };
                let expected = view
                    .sale_price
                    .and_then(|sale| compute_profit(view.purchase_price, view.investment, sale));
                let consistent = view.profit == expected.map(|(profit, _)| profit)
                    && view.profit_margin == expected.map(|(_, margin)| margin);
                (!consistent).then(|| {
                    format!(
                        "{}: profit/margin {:?}/{:?} inconsistent with purchase {} investment {} sale {:?}",
                        vehicle,
                        view.profit,
                        view.profit_margin,
                        view.purchase_price,
                        view.investment,
                        view.sale_price
                    )
                })
            }
            AssertCondition::SoldVehicles { expected } => {
                let report = self.dealer.report().await?;
                (report.summary.sold_vehicles != *expected).then(|| {
                    format!(
                        "report counts {} sold vehicles, expected {}",
                        report.summary.sold_vehicles, expected
                    )
                })
            }
            AssertCondition::NoFailedReconciliations => {
                let snapshot = self.dealer.service().metrics_snapshot();
                let lost = snapshot.events_failed + snapshot.events_timed_out;
                (lost > 0 || snapshot.backlog_size > 0).then(|| {
                    format!(
                        "{} reconciliations failed, {} in backlog",
                        lost, snapshot.backlog_size
                    )
                })
            }
        };
        Ok(failure)
    }

    async fn view(&self, label: &str) -> anyhow::Result<Option<BalanceView>> {
        match self.vehicles.get(label) {
            Some(id) => Ok(Some(self.dealer.balance(*id).await?)),
            None => Ok(None),
        }
    }

    /// Get current metrics.
    pub fn get_metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    /// Failed property checks so far.
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    /// The reconciler's metrics in Prometheus text format.
    pub fn reconciler_metrics(&self) -> String {
        self.dealer.service().metrics_report()
    }
}
