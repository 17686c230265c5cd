//! Conversion of amounts into the settlement currency.

use std::sync::Arc;

use dealerbooks_common::{Currency, Money, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::RateProvider;
use crate::error::{FxError, FxResult};

/// Represents a completed conversion into the settlement currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    /// Input amount.
    pub input: Money,
    /// Output amount, in the settlement currency.
    pub output: Money,
    /// Rate applied.
    pub rate: Decimal,
    /// When the applied rate was obtained.
    pub rate_as_of: Timestamp,
    /// True when the input currency was unknown and passed through unchanged.
    pub fallback: bool,
}

/// What to do with a currency the provider has no rate for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownCurrencyPolicy {
    /// Treat the amount as already being in the settlement currency.
    #[default]
    Lenient,
    /// Reject the amount.
    Strict,
}

/// Converts amounts into the settlement currency using the provider's
/// current snapshot. Has no side effects besides logging.
#[derive(Clone)]
pub struct CurrencyNormalizer {
    provider: Arc<RateProvider>,
    policy: UnknownCurrencyPolicy,
}

impl CurrencyNormalizer {
    /// Create a new normalizer.
    pub fn new(provider: Arc<RateProvider>, policy: UnknownCurrencyPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn settlement_currency(&self) -> &Currency {
        self.provider.settlement_currency()
    }

    pub fn policy(&self) -> UnknownCurrencyPolicy {
        self.policy
    }

    /// Convert an amount into the settlement currency.
    ///
    /// Settlement-currency input is returned unchanged. Converted amounts are
    /// rounded to the settlement currency's decimal places.
    pub fn normalize(&self, amount: &Money) -> FxResult<Conversion> {
        let snapshot = self.provider.snapshot();
        let settlement = snapshot.settlement().clone();

        if amount.currency == settlement {
            return Ok(Conversion {
                input: amount.clone(),
                output: amount.clone(),
                rate: Decimal::ONE,
                rate_as_of: snapshot.as_of(),
                fallback: false,
            });
        }

        match snapshot.rate(&amount.currency) {
            Some(rate) => {
                let value = amount.value.checked_mul(rate).ok_or_else(|| FxError::Overflow {
                    amount: amount.value,
                    currency: amount.currency.clone(),
                    rate,
                })?;
                Ok(Conversion {
                    input: amount.clone(),
                    output: Money::new(value, settlement).round(),
                    rate,
                    rate_as_of: snapshot.as_of(),
                    fallback: false,
                })
            }
            None => match self.policy {
                UnknownCurrencyPolicy::Strict => {
                    Err(FxError::UnsupportedCurrency(amount.currency.clone()))
                }
                UnknownCurrencyPolicy::Lenient => {
                    warn!(
                        currency = %amount.currency,
                        amount = %amount.value,
                        "No rate for currency, passing amount through unconverted"
                    );
                    Ok(Conversion {
                        input: amount.clone(),
                        output: Money::new(amount.value, settlement),
                        rate: Decimal::ONE,
                        rate_as_of: snapshot.as_of(),
                        fallback: true,
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RateProviderConfig;
    use crate::provider::MockRateSource;
    use rust_decimal_macros::dec;

    fn normalizer(policy: UnknownCurrencyPolicy) -> CurrencyNormalizer {
        let source = Arc::new(MockRateSource::new("test"));
        let provider = Arc::new(RateProvider::new(source, RateProviderConfig::default()));
        CurrencyNormalizer::new(provider, policy)
    }

    #[test]
    fn test_settlement_identity() {
        let normalizer = normalizer(UnknownCurrencyPolicy::Strict);
        let amount = Money::new(dec!(1234.5678), Currency::ars());

        let conversion = normalizer.normalize(&amount).unwrap();

        // Identity is exact, even beyond the currency's decimal places.
        assert_eq!(conversion.output, amount);
        assert_eq!(conversion.rate, Decimal::ONE);
    }

    #[test]
    fn test_usd_converted_at_current_rate() {
        let normalizer = normalizer(UnknownCurrencyPolicy::Lenient);

        let conversion = normalizer
            .normalize(&Money::new(dec!(100), Currency::usd()))
            .unwrap();

        assert_eq!(conversion.output, Money::new(dec!(100000), Currency::ars()));
        assert_eq!(conversion.rate, dec!(1000));
        assert!(!conversion.fallback);
    }

    #[test]
    fn test_derived_currency_and_rounding() {
        let normalizer = normalizer(UnknownCurrencyPolicy::Lenient);

        let conversion = normalizer
            .normalize(&Money::new(dec!(0.333), Currency::eur()))
            .unwrap();

        // 0.333 * 1100 = 366.3
        assert_eq!(conversion.output.value, dec!(366.30));
    }

    #[test]
    fn test_unknown_currency_lenient() {
        let normalizer = normalizer(UnknownCurrencyPolicy::Lenient);

        let conversion = normalizer
            .normalize(&Money::new(dec!(500), Currency::new("BRL")))
            .unwrap();

        assert!(conversion.fallback);
        assert_eq!(conversion.output, Money::new(dec!(500), Currency::ars()));
    }

    #[test]
    fn test_unknown_currency_strict() {
        let normalizer = normalizer(UnknownCurrencyPolicy::Strict);

        let result = normalizer.normalize(&Money::new(dec!(500), Currency::new("BRL")));

        assert!(matches!(result, Err(FxError::UnsupportedCurrency(c)) if c.code() == "BRL"));
    }

    #[test]
    fn test_conversion_overflow_is_an_error() {
        let normalizer = normalizer(UnknownCurrencyPolicy::Lenient);

        let err = normalizer
            .normalize(&Money::new(Decimal::MAX / dec!(10), Currency::usd()))
            .unwrap_err();

        assert!(matches!(err, FxError::Overflow { rate, .. } if rate == dec!(1000)));
        let err = dealerbooks_common::DealerBooksError::from(err);
        assert_eq!(err.error_code(), "CONVERSION_ERROR");
        assert!(!err.is_retryable());
    }
}
