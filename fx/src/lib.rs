//! DealerBooks FX
//!
//! Exchange rate provider and currency normalizer. Every amount that reaches
//! the vehicle ledger is converted into the single settlement currency here.
//!
//! # Features
//!
//! - Pluggable rate sources (HTTP feed, mock for tests)
//! - Process-wide rate snapshot swapped atomically on refresh
//! - Scheduled refresh that keeps the last known good rate on failure
//! - Derived rate for a secondary currency by fixed multiplier
//!
//! # Example
//!
//! ```rust,ignore
//! use dealerbooks_fx::{CurrencyNormalizer, RateProvider, RateProviderConfig};
//! use dealerbooks_common::{Currency, Money};
//!
//! let provider = Arc::new(RateProvider::new(source, RateProviderConfig::default()));
//! provider.spawn_refresh_task();
//!
//! let normalizer = CurrencyNormalizer::new(provider, UnknownCurrencyPolicy::Lenient);
//! let ars = normalizer.normalize(&Money::from_str("100", Currency::usd())?)?;
//! ```

pub mod engine;
pub mod provider;
pub mod cache;
pub mod conversion;
pub mod error;

pub use engine::{
    DerivedRate, RateProvider, RateProviderConfig, RateProviderStats, RefreshOutcome,
    SECONDARY_RATE_MULTIPLIER,
};
pub use provider::{HttpRateSource, HttpRateSourceConfig, RateSource};
pub use cache::{RateCache, RateOrigin, RateSnapshot};
pub use conversion::{Conversion, CurrencyNormalizer, UnknownCurrencyPolicy};
pub use error::{FxError, FxResult};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateSource;
