//! DealerBooks Reconciler
//!
//! Wires the rate provider, ledger store and reconciliation engine into a
//! running service, and provides the best-effort hook the transaction, sale
//! and invoice modules call after their own writes succeed.

pub mod backlog;
pub mod config;
pub mod hook;
pub mod metrics;
pub mod service;
pub mod state;

pub use backlog::{FailedReconciliation, FailureReason, ReconciliationBacklog};
pub use config::ServiceConfig;
pub use hook::{ReconciliationHook, ReplaySummary};
pub use metrics::{ReconciliationMetrics, SharedMetrics};
pub use service::ReconcilerService;
pub use state::ServiceState;
