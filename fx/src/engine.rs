//! Rate provider: owns the rate snapshot and its scheduled refresh.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dealerbooks_common::{constants, now, Currency, DurationExt, Timestamp};
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, instrument, warn};

use crate::cache::{RateCache, RateOrigin, RateSnapshot};
use crate::error::FxError;
use crate::provider::RateSource;

/// Multiplier applied to the primary rate to approximate a secondary
/// currency that has no feed of its own. This is not a live rate.
pub const SECONDARY_RATE_MULTIPLIER: Decimal = Decimal::from_parts(11, 0, 0, false, 1);

/// A currency priced as a fixed multiple of the primary rate.
#[derive(Debug, Clone)]
pub struct DerivedRate {
    pub currency: Currency,
    pub multiplier: Decimal,
}

/// Configuration for the rate provider.
#[derive(Debug, Clone)]
pub struct RateProviderConfig {
    /// Currency every ledger amount is stored in.
    pub settlement: Currency,
    /// Foreign currency fetched from the rate source.
    pub primary: Currency,
    /// Rate served before the first successful fetch.
    pub default_rate: Decimal,
    /// Currencies derived from the primary rate.
    pub derived: Vec<DerivedRate>,
    /// Refresh period.
    pub refresh_interval: Duration,
    /// Whether the refresh loop fetches immediately on start.
    pub refresh_on_start: bool,
}

impl Default for RateProviderConfig {
    fn default() -> Self {
        Self {
            settlement: Currency::ars(),
            primary: Currency::usd(),
            default_rate: Decimal::from(1000),
            derived: vec![DerivedRate {
                currency: Currency::eur(),
                multiplier: SECONDARY_RATE_MULTIPLIER,
            }],
            refresh_interval: constants::rate_refresh_interval().as_std(),
            refresh_on_start: true,
        }
    }
}

/// Result of one refresh attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// A new snapshot was installed.
    Updated { rate: Decimal },
    /// The fetch failed; the previous snapshot is still served.
    Retained { reason: String },
}

/// Supplies settlement-currency conversion rates.
///
/// Fetch failures are logged and counted but never surfaced to callers; the
/// last known good snapshot keeps serving conversions.
pub struct RateProvider {
    source: Arc<dyn RateSource>,
    cache: RateCache,
    config: RateProviderConfig,
    refresh_successes: AtomicU64,
    refresh_failures: AtomicU64,
}

impl RateProvider {
    /// Create a provider seeded with the configured default rate.
    pub fn new(source: Arc<dyn RateSource>, config: RateProviderConfig) -> Self {
        let seed = build_snapshot(&config, config.default_rate, now(), RateOrigin::Default);
        Self {
            source,
            cache: RateCache::new(seed),
            config,
            refresh_successes: AtomicU64::new(0),
            refresh_failures: AtomicU64::new(0),
        }
    }

    pub fn settlement_currency(&self) -> &Currency {
        &self.config.settlement
    }

    /// Current rate for a currency, `None` when unsupported.
    pub fn get_rate(&self, currency: &Currency) -> Option<Decimal> {
        self.cache.snapshot().rate(currency)
    }

    /// Current snapshot, for callers that need several rates consistently.
    pub fn snapshot(&self) -> Arc<RateSnapshot> {
        self.cache.snapshot()
    }

    /// When the served rates were obtained (start-up time until the first
    /// successful fetch).
    pub fn last_updated(&self) -> Timestamp {
        self.cache.last_updated()
    }

    /// Fetch the primary rate once and install it if valid.
    #[instrument(skip(self), fields(source = self.source.name(), currency = %self.config.primary))]
    pub async fn refresh(&self) -> RefreshOutcome {
        let error = match self.source.fetch_rate(&self.config.primary).await {
            Ok(rate) if rate > Decimal::ZERO => {
                let origin = RateOrigin::Fetched {
                    source: self.source.name().to_string(),
                };
                self.cache
                    .replace(build_snapshot(&self.config, rate, now(), origin));
                self.refresh_successes.fetch_add(1, Ordering::Relaxed);

                info!(rate = %rate, "Exchange rate refreshed");
                return RefreshOutcome::Updated { rate };
            }
            Ok(rate) => FxError::NonPositiveRate {
                currency: self.config.primary.clone(),
                rate,
            },
            Err(e) => e,
        };

        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
        let served = self.cache.snapshot();
        warn!(
            error = %error,
            served_as_of = %served.as_of(),
            "Exchange rate refresh failed, keeping last known rate"
        );

        RefreshOutcome::Retained {
            reason: error.to_string(),
        }
    }

    /// Refresh on the configured schedule until the task is aborted.
    pub async fn run_refresh_loop(&self) {
        let mut ticker = tokio::time::interval(self.config.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately.
        if !self.config.refresh_on_start {
            ticker.tick().await;
        }

        loop {
            ticker.tick().await;
            self.refresh().await;
        }
    }

    /// Spawn the refresh loop on the current runtime.
    pub fn spawn_refresh_task(self: &Arc<Self>) -> JoinHandle<()> {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            provider.run_refresh_loop().await;
        })
    }

    /// Get provider statistics.
    pub fn stats(&self) -> RateProviderStats {
        let snapshot = self.cache.snapshot();
        RateProviderStats {
            refresh_successes: self.refresh_successes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            primary_rate: snapshot.rate(&self.config.primary),
            last_updated: snapshot.as_of(),
            using_default: *snapshot.origin() == RateOrigin::Default,
        }
    }
}

/// Provider statistics.
#[derive(Debug, Clone)]
pub struct RateProviderStats {
    pub refresh_successes: u64,
    pub refresh_failures: u64,
    pub primary_rate: Option<Decimal>,
    pub last_updated: Timestamp,
    pub using_default: bool,
}

fn build_snapshot(
    config: &RateProviderConfig,
    primary_rate: Decimal,
    as_of: Timestamp,
    origin: RateOrigin,
) -> RateSnapshot {
    let mut rates = HashMap::with_capacity(1 + config.derived.len());
    rates.insert(config.primary.clone(), primary_rate);
    for derived in &config.derived {
        rates.insert(derived.currency.clone(), primary_rate * derived.multiplier);
    }
    RateSnapshot::new(config.settlement.clone(), rates, as_of, origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockRateSource;
    use rust_decimal_macros::dec;

    fn setup_provider() -> (Arc<MockRateSource>, RateProvider) {
        let source = Arc::new(MockRateSource::new("test"));
        let provider = RateProvider::new(source.clone(), RateProviderConfig::default());
        (source, provider)
    }

    #[test]
    fn test_multiplier_constant() {
        assert_eq!(SECONDARY_RATE_MULTIPLIER, dec!(1.1));
    }

    #[test]
    fn test_seeded_with_default() {
        let (_, provider) = setup_provider();

        assert_eq!(provider.get_rate(&Currency::usd()), Some(dec!(1000)));
        assert_eq!(provider.get_rate(&Currency::eur()), Some(dec!(1100)));
        assert_eq!(provider.get_rate(&Currency::ars()), Some(Decimal::ONE));
        assert_eq!(provider.get_rate(&Currency::new("BRL")), None);
        assert!(provider.stats().using_default);
    }

    #[tokio::test]
    async fn test_refresh_replaces_rate_and_derived() {
        let (source, provider) = setup_provider();
        source.set_rate(Currency::usd(), dec!(1200));
        let before = provider.last_updated();

        let outcome = provider.refresh().await;

        assert_eq!(outcome, RefreshOutcome::Updated { rate: dec!(1200) });
        assert_eq!(provider.get_rate(&Currency::usd()), Some(dec!(1200)));
        assert_eq!(provider.get_rate(&Currency::eur()), Some(dec!(1320)));
        assert!(provider.last_updated() >= before);
        assert!(!provider.stats().using_default);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_good_rate() {
        let (source, provider) = setup_provider();
        source.set_rate(Currency::usd(), dec!(1200));
        provider.refresh().await;
        let as_of = provider.last_updated();

        source.set_failing(true);
        let outcome = provider.refresh().await;

        assert!(matches!(outcome, RefreshOutcome::Retained { .. }));
        assert_eq!(provider.get_rate(&Currency::usd()), Some(dec!(1200)));
        assert_eq!(provider.last_updated(), as_of);

        let stats = provider.stats();
        assert_eq!(stats.refresh_successes, 1);
        assert_eq!(stats.refresh_failures, 1);
    }

    #[tokio::test]
    async fn test_non_positive_rate_rejected() {
        let (source, provider) = setup_provider();

        source.set_rate(Currency::usd(), Decimal::ZERO);
        assert!(matches!(provider.refresh().await, RefreshOutcome::Retained { .. }));

        source.set_rate(Currency::usd(), dec!(-5));
        assert!(matches!(provider.refresh().await, RefreshOutcome::Retained { .. }));

        assert_eq!(provider.get_rate(&Currency::usd()), Some(dec!(1000)));
        assert!(provider.stats().using_default);
    }

    #[tokio::test]
    async fn test_missing_rate_before_first_fetch_serves_default() {
        let (_, provider) = setup_provider();

        // Source has no USD rate configured yet.
        assert!(matches!(provider.refresh().await, RefreshOutcome::Retained { .. }));
        assert_eq!(provider.get_rate(&Currency::usd()), Some(dec!(1000)));
    }

    #[tokio::test]
    async fn test_refresh_loop_fetches_on_start() {
        let source = Arc::new(MockRateSource::new("test"));
        source.set_rate(Currency::usd(), dec!(1500));
        let config = RateProviderConfig {
            refresh_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let provider = Arc::new(RateProvider::new(source.clone(), config));

        let handle = provider.spawn_refresh_task();
        for _ in 0..50 {
            if source.call_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(source.call_count(), 1);
        assert_eq!(provider.get_rate(&Currency::usd()), Some(dec!(1500)));
    }
}
