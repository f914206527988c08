//! Domain-level error types.

use std::time::Duration;

use thiserror::Error;

/// Throttle configuration errors - fatal, surfaced at route registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Please set a period and limit: no quota configured")]
    MissingQuota,

    #[error("Please set a period and limit: limit is missing")]
    MissingLimit,

    #[error("Please set a period and limit: period is missing")]
    MissingPeriod,

    #[error("Quota limit must be positive")]
    ZeroLimit,

    #[error("Quota period must be at least one second")]
    ZeroPeriod,

    #[error("Quota period of {secs}s exceeds the {max_secs}s maximum")]
    PeriodTooLong { secs: u64, max_secs: u64 },
}

/// Counter store errors - recoverable, the engine fails open on these.
#[derive(Debug, Error)]
pub enum StoreUnavailable {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Store command failed: {0}")]
    Command(String),

    #[error("Store did not respond within {0:?}")]
    Timeout(Duration),
}
