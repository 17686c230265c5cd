//! Process-wide rate snapshot.
//!
//! Readers take a cheap `Arc` clone of the current snapshot; the refresh task
//! builds a complete new snapshot and swaps it in under a short write lock, so
//! a conversion never observes a half-updated rate table.

use std::collections::HashMap;
use std::sync::Arc;

use dealerbooks_common::{Currency, Timestamp};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;

/// Where the rates in a snapshot came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateOrigin {
    /// Hardcoded start-up default; no fetch has succeeded yet.
    Default,
    /// Fetched from the named source.
    Fetched { source: String },
}

/// Immutable set of rates valid as of one instant.
#[derive(Debug, Clone)]
pub struct RateSnapshot {
    settlement: Currency,
    rates: HashMap<Currency, Decimal>,
    as_of: Timestamp,
    origin: RateOrigin,
}

impl RateSnapshot {
    /// Create a new snapshot.
    pub fn new(
        settlement: Currency,
        rates: HashMap<Currency, Decimal>,
        as_of: Timestamp,
        origin: RateOrigin,
    ) -> Self {
        Self {
            settlement,
            rates,
            as_of,
            origin,
        }
    }

    /// Rate for a currency. The settlement currency always converts at one.
    pub fn rate(&self, currency: &Currency) -> Option<Decimal> {
        if *currency == self.settlement {
            return Some(Decimal::ONE);
        }
        self.rates.get(currency).copied()
    }

    pub fn settlement(&self) -> &Currency {
        &self.settlement
    }

    /// When the rates were obtained.
    pub fn as_of(&self) -> Timestamp {
        self.as_of
    }

    pub fn origin(&self) -> &RateOrigin {
        &self.origin
    }

    /// Foreign currencies with a known rate, sorted by code.
    pub fn currencies(&self) -> Vec<Currency> {
        let mut currencies: Vec<Currency> = self.rates.keys().cloned().collect();
        currencies.sort();
        currencies
    }
}

/// Holder of the current rate snapshot.
pub struct RateCache {
    current: RwLock<Arc<RateSnapshot>>,
}

impl RateCache {
    /// Create a cache seeded with an initial snapshot.
    pub fn new(seed: RateSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(seed)),
        }
    }

    /// Get the current snapshot.
    pub fn snapshot(&self) -> Arc<RateSnapshot> {
        self.current.read().clone()
    }

    /// Replace the current snapshot, returning the previous one.
    pub fn replace(&self, snapshot: RateSnapshot) -> Arc<RateSnapshot> {
        let next = Arc::new(snapshot);
        let previous = std::mem::replace(&mut *self.current.write(), next);
        debug!(previous_as_of = %previous.as_of, "Rate snapshot replaced");
        previous
    }

    /// When the current snapshot was obtained.
    pub fn last_updated(&self) -> Timestamp {
        self.current.read().as_of
    }
}

/// Shared rate cache.
pub type SharedRateCache = Arc<RateCache>;
