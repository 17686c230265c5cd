//! Time utilities and constants for DealerBooks.

use chrono::{DateTime, Duration, Utc};

/// Scheduling constants.
pub mod constants {
    use super::Duration;

    /// Exchange rate refresh period (once a day).
    pub fn rate_refresh_interval() -> Duration {
        Duration::hours(24)
    }

    /// Timeout for a single rate source request (10 seconds).
    pub fn rate_request_timeout() -> Duration {
        Duration::seconds(10)
    }

    /// Upper bound for one best-effort reconciliation call (5 seconds).
    pub fn reconcile_timeout() -> Duration {
        Duration::seconds(5)
    }
}

/// A timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Duration extensions for convenient conversion.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_std() {
        assert_eq!(
            constants::reconcile_timeout().as_std(),
            std::time::Duration::from_secs(5)
        );
        assert_eq!(Duration::seconds(-1).as_std(), std::time::Duration::ZERO);
    }

    #[test]
    fn test_daily_refresh() {
        assert_eq!(constants::rate_refresh_interval().num_hours(), 24);
    }
}
