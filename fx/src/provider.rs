//! Rate source trait and implementations.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use dealerbooks_common::{constants, Currency, DurationExt};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use crate::error::{FxError, FxResult};

/// An external feed of exchange rates.
///
/// A rate is expressed as settlement-currency units per one unit of the
/// foreign currency.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// Fetch the current rate for a foreign currency.
    async fn fetch_rate(&self, currency: &Currency) -> FxResult<Decimal>;

    /// Check if this source quotes the given currency.
    fn supports(&self, currency: &Currency) -> bool;
}

/// Configuration for [`HttpRateSource`].
#[derive(Debug, Clone)]
pub struct HttpRateSourceConfig {
    /// Endpoint returning a JSON object with the rate.
    pub url: String,
    /// The one currency this endpoint quotes.
    pub currency: Currency,
    /// JSON field holding the sell rate.
    pub rate_field: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for HttpRateSourceConfig {
    fn default() -> Self {
        Self {
            url: "https://dolarapi.com/v1/dolares/oficial".to_string(),
            currency: Currency::usd(),
            rate_field: "venta".to_string(),
            timeout: constants::rate_request_timeout().as_std(),
        }
    }
}

/// Rate source backed by a JSON HTTP endpoint quoting a single currency.
pub struct HttpRateSource {
    client: reqwest::Client,
    config: HttpRateSourceConfig,
}

impl HttpRateSource {
    /// Create a new HTTP rate source.
    pub fn new(config: HttpRateSourceConfig) -> FxResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FxError::SourceUnavailable {
                provider: config.url.clone(),
                message: e.to_string(),
            })?;

        Ok(Self { client, config })
    }

    fn unavailable(&self, message: impl Into<String>) -> FxError {
        FxError::SourceUnavailable {
            provider: self.name().to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    fn name(&self) -> &str {
        &self.config.url
    }

    async fn fetch_rate(&self, currency: &Currency) -> FxResult<Decimal> {
        if !self.supports(currency) {
            return Err(FxError::UnsupportedCurrency(currency.clone()));
        }

        let response = self
            .client
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.unavailable(format!("HTTP {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FxError::MalformedPayload {
                provider: self.name().to_string(),
                message: e.to_string(),
            })?;

        let rate = parse_rate(&body, &self.config.rate_field).map_err(|message| {
            FxError::MalformedPayload {
                provider: self.name().to_string(),
                message,
            }
        })?;

        debug!(source = self.name(), currency = %currency, rate = %rate, "Fetched rate");
        Ok(rate)
    }

    fn supports(&self, currency: &Currency) -> bool {
        *currency == self.config.currency
    }
}

/// Extract a decimal rate from `body[field]`, accepting a JSON number or a
/// numeric string.
fn parse_rate(body: &Value, field: &str) -> Result<Decimal, String> {
    match body.get(field) {
        Some(Value::Number(n)) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map_err(|e| format!("field '{}' is not a decimal: {}", field, e))
        }
        Some(Value::String(s)) => Decimal::from_str(s.trim())
            .map_err(|e| format!("field '{}' is not a decimal: {}", field, e)),
        Some(other) => Err(format!("field '{}' has unexpected type: {}", field, other)),
        None => Err(format!("field '{}' missing", field)),
    }
}

/// Mock rate source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateSource {
    name: String,
    rates: dashmap::DashMap<Currency, Decimal>,
    failing: std::sync::atomic::AtomicBool,
    calls: std::sync::atomic::AtomicU64,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateSource {
    /// Create a new mock source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: dashmap::DashMap::new(),
            failing: std::sync::atomic::AtomicBool::new(false),
            calls: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Set the rate returned for a currency.
    pub fn set_rate(&self, currency: Currency, rate: Decimal) {
        self.rates.insert(currency, rate);
    }

    /// Make every fetch fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of fetches attempted.
    pub fn call_count(&self) -> u64 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateSource for MockRateSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rate(&self, currency: &Currency) -> FxResult<Decimal> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(FxError::SourceUnavailable {
                provider: self.name.clone(),
                message: "connection refused".to_string(),
            });
        }

        self.rates
            .get(currency)
            .map(|r| *r)
            .ok_or_else(|| FxError::UnsupportedCurrency(currency.clone()))
    }

    fn supports(&self, currency: &Currency) -> bool {
        self.rates.contains_key(currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_rate_number() {
        let body = json!({ "compra": 1000.5, "venta": 1050.25 });
        assert_eq!(parse_rate(&body, "venta").unwrap(), dec!(1050.25));
    }

    #[test]
    fn test_parse_rate_string() {
        let body = json!({ "venta": " 1234.50 " });
        assert_eq!(parse_rate(&body, "venta").unwrap(), dec!(1234.50));
    }

    #[test]
    fn test_parse_rate_malformed() {
        assert!(parse_rate(&json!({ "compra": 1 }), "venta").is_err());
        assert!(parse_rate(&json!({ "venta": null }), "venta").is_err());
        assert!(parse_rate(&json!({ "venta": "abc" }), "venta").is_err());
    }

    #[tokio::test]
    async fn test_mock_source() {
        let source = MockRateSource::new("test");
        source.set_rate(Currency::usd(), dec!(1000));

        assert!(source.supports(&Currency::usd()));
        assert_eq!(source.fetch_rate(&Currency::usd()).await.unwrap(), dec!(1000));

        source.set_failing(true);
        assert!(matches!(
            source.fetch_rate(&Currency::usd()).await,
            Err(FxError::SourceUnavailable { .. })
        ));
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn test_http_source_rejects_other_currencies() {
        let source = HttpRateSource::new(HttpRateSourceConfig::default()).unwrap();
        let result = source.fetch_rate(&Currency::eur()).await;
        assert!(matches!(result, Err(FxError::UnsupportedCurrency(_))));
    }
}
