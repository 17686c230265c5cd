//! DealerBooks Simulator
//!
//! Drives the reconciliation hook the way the transaction, sale and invoice
//! modules do, against an in-memory ledger, and checks the resulting
//! balances.

use std::time::Instant;

use clap::Parser;
use rust_decimal::Decimal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod dealer;
mod metrics;
mod model;
mod scenario;

use controller::SimulationController;
use scenario::{ScenarioKind, ScenarioParams};

/// DealerBooks Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "dealerbooks-simulator")]
#[command(about = "DealerBooks reconciliation simulation environment")]
struct Args {
    /// Number of simulated vehicles
    #[arg(short, long, default_value = "10")]
    vehicles: usize,

    /// Scenario to run
    #[arg(short, long, value_enum, default_value = "lifecycle")]
    scenario: ScenarioKind,

    /// Number of events generated by the contention and random scenarios
    #[arg(short, long, default_value = "1000")]
    events: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// USD rate served by the simulated feed
    #[arg(long, default_value = "1000")]
    usd_rate: Decimal,

    /// Print the reconciler metrics when done
    #[arg(long)]
    print_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if args.usd_rate <= Decimal::ZERO {
        anyhow::bail!("--usd-rate must be positive");
    }

    info!(
        scenario = ?args.scenario,
        vehicles = args.vehicles,
        events = args.events,
        seed = ?args.seed,
        "Starting DealerBooks simulator"
    );

    let mut controller = SimulationController::new(args.usd_rate, args.seed);
    controller.initialize().await?;

    let params = ScenarioParams {
        vehicles: args.vehicles,
        events: args.events,
        usd_rate: args.usd_rate,
    };
    let scenario = controller.scenario(args.scenario, &params);

    let started = Instant::now();
    controller.run_scenario(&scenario).await?;
    let elapsed = started.elapsed().as_secs_f64();
    controller.shutdown().await?;

    let metrics = controller.get_metrics();
    info!("Simulation complete");
    info!("Events: {}", metrics.total_events);
    info!("Applied: {}", metrics.applied_events);
    info!("Ignored: {}", metrics.ignored_events);
    info!("Failed: {}", metrics.failed_events);
    info!(
        "Latency avg/p50/p99: {}/{}/{}µs",
        metrics.average_latency_us(),
        metrics.p50_latency_us(),
        metrics.p99_latency_us()
    );
    info!("Throughput: {:.0} events/s", metrics.throughput(elapsed));
    info!(
        "Checks passed: {}, failed: {}",
        metrics.checks_passed, metrics.checks_failed
    );

    if args.print_metrics {
        println!("{}", controller.reconciler_metrics());
    }

    if !controller.failures().is_empty() {
        for failure in controller.failures() {
            error!("{}", failure);
        }
        anyhow::bail!("{} property checks failed", controller.failures().len());
    }

    Ok(())
}
