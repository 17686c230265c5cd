//! DealerBooks Ledger
//!
//! Per-vehicle balance ledger. Every transaction, sale and invoice event is
//! normalized to the settlement currency and merged into the vehicle's
//! balance with an atomic read-modify-write.

pub mod balance;
pub mod directory;
pub mod engine;
pub mod event;
pub mod postgres;
pub mod service;
pub mod store;

pub use balance::{compute_profit, BalanceMutation, BalanceOverride, MergeOutcome, VehicleBalance};
pub use directory::{InMemoryVehicleDirectory, VehicleDirectory, VehicleRef};
pub use engine::{ReconcileOutcome, ReconciliationEngine};
pub use event::{BalanceEvent, EventKind, ExpenseCategory, UnknownCategory};
pub use postgres::{connect, run_migrations, PgBalanceStore, PgVehicleDirectory};
pub use service::{BalanceReport, BalanceService, BalanceView, ReportSummary};
pub use store::{BalanceMutator, BalanceStore, MemoryBalanceStore, UpsertResult};
