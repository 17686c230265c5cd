//! FX error types.

use dealerbooks_common::{Currency, DealerBooksError};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur while fetching rates or converting amounts.
#[derive(Debug, Error)]
pub enum FxError {
    /// No rate is known for the currency.
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(Currency),

    /// The rate source could not be reached or answered with an error status.
    #[error("Rate source {provider} unavailable: {message}")]
    SourceUnavailable { provider: String, message: String },

    /// The rate source answered with something that is not a rate.
    #[error("Malformed payload from {provider}: {message}")]
    MalformedPayload { provider: String, message: String },

    /// The rate source answered with zero or a negative rate.
    #[error("Non-positive rate {rate} for {currency}")]
    NonPositiveRate { currency: Currency, rate: Decimal },

    /// The converted amount does not fit in a decimal.
    #[error("Converting {amount} {currency} at {rate} overflows")]
    Overflow {
        amount: Decimal,
        currency: Currency,
        rate: Decimal,
    },
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;

impl From<FxError> for DealerBooksError {
    fn from(err: FxError) -> Self {
        match err {
            FxError::UnsupportedCurrency(currency) => DealerBooksError::UnsupportedCurrency(currency),
            other => DealerBooksError::ConversionError(other.to_string()),
        }
    }
}
