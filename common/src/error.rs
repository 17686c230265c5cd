//! Error types for DealerBooks.

use crate::{Currency, TenantId, VehicleId};
use thiserror::Error;

/// Main error type for DealerBooks operations.
#[derive(Error, Debug)]
pub enum DealerBooksError {
    /// Vehicle does not exist or does not belong to the caller's tenant.
    #[error("Vehicle {vehicle_id} not found for tenant {tenant_id}")]
    VehicleNotFound {
        tenant_id: TenantId,
        vehicle_id: VehicleId,
    },

    /// Event amount rejected before touching the ledger.
    #[error("Invalid amount {amount} for {field}")]
    InvalidAmount { field: String, amount: String },

    /// Currency the rate provider has no rate for (strict policy only).
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(Currency),

    /// Currency conversion failed.
    #[error("Conversion error: {0}")]
    ConversionError(String),

    /// Ledger store could not be reached.
    #[error("Ledger store unavailable: {0}")]
    StoreUnavailable(String),

    /// Database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Timeout.
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl DealerBooksError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DealerBooksError::StoreUnavailable(_)
                | DealerBooksError::DatabaseError(_)
                | DealerBooksError::Timeout(_)
        )
    }

    /// Whether the error is a not-found surfaced to query callers.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DealerBooksError::VehicleNotFound { .. })
    }

    /// Get a stable error code for logs and API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            DealerBooksError::VehicleNotFound { .. } => "VEHICLE_NOT_FOUND",
            DealerBooksError::InvalidAmount { .. } => "INVALID_AMOUNT",
            DealerBooksError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            DealerBooksError::ConversionError(_) => "CONVERSION_ERROR",
            DealerBooksError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            DealerBooksError::DatabaseError(_) => "DATABASE_ERROR",
            DealerBooksError::Timeout(_) => "TIMEOUT",
        }
    }
}

/// Result type alias for DealerBooks operations.
pub type Result<T> = std::result::Result<T, DealerBooksError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(DealerBooksError::StoreUnavailable("down".into()).is_retryable());
        assert!(DealerBooksError::Timeout("reconcile".into()).is_retryable());
        assert!(!DealerBooksError::UnsupportedCurrency(Currency::new("BRL")).is_retryable());
    }

    #[test]
    fn test_not_found_code() {
        let err = DealerBooksError::VehicleNotFound {
            tenant_id: TenantId::new(),
            vehicle_id: VehicleId::new(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.error_code(), "VEHICLE_NOT_FOUND");
    }
}
