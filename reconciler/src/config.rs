//! Reconciler configuration.

use std::str::FromStr;
use std::time::Duration;

use dealerbooks_common::{constants, Currency, DurationExt};
use dealerbooks_fx::{
    DerivedRate, HttpRateSourceConfig, RateProviderConfig, UnknownCurrencyPolicy,
    SECONDARY_RATE_MULTIPLIER,
};
use rust_decimal::Decimal;

/// Exchange rate configuration.
#[derive(Debug, Clone)]
pub struct RateConfig {
    /// Currency all ledger amounts are stored in.
    pub settlement_currency: Currency,
    /// Currency fetched from the rate feed.
    pub primary_currency: Currency,
    /// Rate feed endpoint.
    pub source_url: String,
    /// JSON field of the feed holding the sell rate.
    pub rate_field: String,
    /// Rate served until the first successful fetch.
    pub default_rate: Decimal,
    /// Refresh period.
    pub refresh_interval: Duration,
    /// Feed request timeout.
    pub request_timeout: Duration,
    /// Reject currencies without a rate instead of passing them through.
    pub strict_currencies: bool,
}

impl Default for RateConfig {
    fn default() -> Self {
        let source = HttpRateSourceConfig::default();
        Self {
            settlement_currency: Currency::ars(),
            primary_currency: Currency::usd(),
            source_url: source.url,
            rate_field: source.rate_field,
            default_rate: Decimal::from(1000),
            refresh_interval: constants::rate_refresh_interval().as_std(),
            request_timeout: constants::rate_request_timeout().as_std(),
            strict_currencies: false,
        }
    }
}

/// Best-effort reconciliation configuration.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Upper bound on one reconciliation at the call site.
    pub timeout: Duration,
    /// Maximum failed reconciliations kept for replay.
    pub backlog_capacity: usize,
    /// Automatic backlog replay period; `None` disables it.
    pub replay_interval: Option<Duration>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            timeout: constants::reconcile_timeout().as_std(),
            backlog_capacity: 10_000,
            replay_interval: Some(Duration::from_secs(300)),
        }
    }
}

/// Main service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Database URL.
    pub database_url: String,
    /// Connection pool size.
    pub max_connections: u32,
    /// Exchange rate configuration.
    pub rate_config: RateConfig,
    /// Reconciliation configuration.
    pub reconcile_config: ReconcileConfig,
    /// Log level.
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/dealerbooks".to_string(),
            max_connections: 10,
            rate_config: RateConfig::default(),
            reconcile_config: ReconcileConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Some(max) = env_parse("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = max;
        }

        let rates = &mut config.rate_config;

        if let Ok(code) = std::env::var("SETTLEMENT_CURRENCY") {
            rates.settlement_currency = Currency::new(code);
        }

        if let Ok(code) = std::env::var("FX_PRIMARY_CURRENCY") {
            rates.primary_currency = Currency::new(code);
        }

        if let Ok(url) = std::env::var("FX_SOURCE_URL") {
            rates.source_url = url;
        }

        if let Ok(field) = std::env::var("FX_RATE_FIELD") {
            rates.rate_field = field;
        }

        if let Some(rate) = env_parse("FX_DEFAULT_RATE") {
            rates.default_rate = rate;
        }

        if let Some(secs) = env_parse("FX_REFRESH_INTERVAL_SECS") {
            rates.refresh_interval = Duration::from_secs(secs);
        }

        if let Ok(strict) = std::env::var("FX_STRICT_CURRENCIES") {
            rates.strict_currencies = matches!(strict.trim(), "1" | "true" | "yes");
        }

        let reconcile = &mut config.reconcile_config;

        if let Some(ms) = env_parse("RECONCILE_TIMEOUT_MS") {
            reconcile.timeout = Duration::from_millis(ms);
        }

        if let Some(capacity) = env_parse("RECONCILE_BACKLOG_CAPACITY") {
            reconcile.backlog_capacity = capacity;
        }

        if let Some(secs) = env_parse::<u64>("RECONCILE_REPLAY_INTERVAL_SECS") {
            reconcile.replay_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.max_connections == 0 {
            return Err("Connection pool size cannot be 0".to_string());
        }

        let rates = &self.rate_config;

        if rates.default_rate <= Decimal::ZERO {
            return Err("Default exchange rate must be positive".to_string());
        }

        if rates.settlement_currency == rates.primary_currency {
            return Err("Primary currency must differ from the settlement currency".to_string());
        }

        if rates.refresh_interval.is_zero() {
            return Err("Rate refresh interval cannot be 0".to_string());
        }

        if rates.source_url.is_empty() {
            return Err("Rate source URL cannot be empty".to_string());
        }

        if self.reconcile_config.timeout.is_zero() {
            return Err("Reconcile timeout cannot be 0".to_string());
        }

        if self.reconcile_config.backlog_capacity == 0 {
            return Err("Backlog capacity cannot be 0".to_string());
        }

        Ok(())
    }

    /// Rate provider settings. EUR is derived from the primary rate when
    /// the primary is USD.
    pub fn rate_provider_config(&self) -> RateProviderConfig {
        let rates = &self.rate_config;
        let derived = if rates.primary_currency == Currency::usd() {
            vec![DerivedRate {
                currency: Currency::eur(),
                multiplier: SECONDARY_RATE_MULTIPLIER,
            }]
        } else {
            Vec::new()
        };

        RateProviderConfig {
            settlement: rates.settlement_currency.clone(),
            primary: rates.primary_currency.clone(),
            default_rate: rates.default_rate,
            derived,
            refresh_interval: rates.refresh_interval,
            refresh_on_start: true,
        }
    }

    /// HTTP rate feed settings.
    pub fn http_source_config(&self) -> HttpRateSourceConfig {
        let rates = &self.rate_config;
        HttpRateSourceConfig {
            url: rates.source_url.clone(),
            currency: rates.primary_currency.clone(),
            rate_field: rates.rate_field.clone(),
            timeout: rates.request_timeout,
        }
    }

    pub fn currency_policy(&self) -> UnknownCurrencyPolicy {
        if self.rate_config.strict_currencies {
            UnknownCurrencyPolicy::Strict
        } else {
            UnknownCurrencyPolicy::Lenient
        }
    }
}
