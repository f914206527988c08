use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::RouteIdentity;
use crate::error::ConfigurationError;

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);
/// One twelfth of a Gregorian year (365.2425 days).
const MONTH: Duration = Duration::from_secs(2_629_746);

/// Per-route throttle configuration as written by the deployer.
///
/// Exactly one of the shorthands (`hourly`, `daily`, `monthly`) or an
/// explicit `period` + `limit` pair is expected. When several are present the
/// first in that order wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThrottleSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly: Option<u64>,
    /// Window length in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl ThrottleSettings {
    pub fn hourly(limit: u64) -> Self {
        Self {
            hourly: Some(limit),
            ..Self::default()
        }
    }

    pub fn daily(limit: u64) -> Self {
        Self {
            daily: Some(limit),
            ..Self::default()
        }
    }

    pub fn monthly(limit: u64) -> Self {
        Self {
            monthly: Some(limit),
            ..Self::default()
        }
    }

    pub fn per_period(limit: u64, period: Duration) -> Self {
        Self {
            period: Some(period.as_secs()),
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Resolve these settings into a [`QuotaSpec`].
    ///
    /// Resolution order is hourly, daily, monthly, then the explicit period.
    pub fn resolve(&self) -> Result<QuotaSpec, ConfigurationError> {
        if let Some(limit) = self.hourly {
            return QuotaSpec::new(limit, HOUR);
        }
        if let Some(limit) = self.daily {
            return QuotaSpec::new(limit, DAY);
        }
        if let Some(limit) = self.monthly {
            return QuotaSpec::new(limit, MONTH);
        }

        match (self.period, self.limit) {
            (Some(period), Some(limit)) => QuotaSpec::new(limit, Duration::from_secs(period)),
            (Some(_), None) => Err(ConfigurationError::MissingLimit),
            (None, Some(_)) => Err(ConfigurationError::MissingPeriod),
            (None, None) => Err(ConfigurationError::MissingQuota),
        }
    }
}

/// A resolved quota: at most `limit` counted requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSpec {
    limit: u64,
    window: Duration,
}

impl QuotaSpec {
    /// Longest accepted window, ten average years. Well inside what both
    /// `Instant` arithmetic and Redis `EXPIRE` accept.
    pub const MAX_WINDOW: Duration = Duration::from_secs(10 * 12 * MONTH.as_secs());

    pub fn new(limit: u64, window: Duration) -> Result<Self, ConfigurationError> {
        if limit == 0 {
            return Err(ConfigurationError::ZeroLimit);
        }
        // Stores count expiry in whole seconds.
        if window.as_secs() == 0 {
            return Err(ConfigurationError::ZeroPeriod);
        }
        if window > Self::MAX_WINDOW {
            return Err(ConfigurationError::PeriodTooLong {
                secs: window.as_secs(),
                max_secs: Self::MAX_WINDOW.as_secs(),
            });
        }
        Ok(Self { limit, window })
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Requests left in the window given `current` counted requests.
    pub fn remaining(&self, current: u64) -> u64 {
        self.limit.saturating_sub(current)
    }
}

/// A route paired with its resolved quota, built once at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    pub route: RouteIdentity,
    pub quota: QuotaSpec,
}

impl RoutePolicy {
    pub fn new(route: RouteIdentity, settings: &ThrottleSettings) -> Result<Self, ConfigurationError> {
        let quota = settings.resolve()?;
        Ok(Self { route, quota })
    }
}
