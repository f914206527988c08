//! Application configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use sluice_core::{DenialStatus, EngineOptions, HeaderConfig, HeaderToggle};

#[cfg(feature = "redis")]
use sluice_infra::RedisConfig;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    #[cfg(feature = "redis")]
    pub redis: Option<RedisConfig>,
    pub throttle: ThrottleConfig,
    pub widgets: WidgetLimits,
}

/// Deployment-wide throttle behaviour.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub headers: HeaderConfig,
    pub options: EngineOptions,
    /// Count callers by this request header instead of their address.
    pub identity_header: Option<String>,
    /// How often the in-memory store drops expired buckets.
    pub purge_interval: Duration,
}

/// Quotas of the widget routes.
#[derive(Debug, Clone)]
pub struct WidgetLimits {
    pub hourly: u64,
    pub create_limit: u64,
    pub create_period: Duration,
}

impl Default for WidgetLimits {
    fn default() -> Self {
        Self {
            hourly: 100,
            create_limit: 10,
            create_period: Duration::from_secs(60),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("PORT").unwrap_or(8080),
            #[cfg(feature = "redis")]
            redis: env::var("REDIS_URL").ok().map(|_| RedisConfig::from_env()),
            throttle: ThrottleConfig::from_env(),
            widgets: WidgetLimits::from_env(),
        }
    }
}

impl ThrottleConfig {
    pub fn from_env() -> Self {
        let defaults = EngineOptions::default();

        Self {
            headers: HeaderConfig {
                remaining: header_toggle("THROTTLE_REMAINING_HEADER"),
                limit: header_toggle("THROTTLE_LIMIT_HEADER"),
                reset: header_toggle("THROTTLE_RESET_HEADER"),
            },
            options: EngineOptions {
                coast_expiry: bool_var("THROTTLE_COAST_EXPIRY").unwrap_or(defaults.coast_expiry),
                denial_status: if flag("THROTTLE_LEGACY_FORBIDDEN") {
                    DenialStatus::Forbidden
                } else {
                    DenialStatus::TooManyRequests
                },
                ..defaults
            },
            identity_header: env::var("THROTTLE_IDENTITY_HEADER")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            purge_interval: Duration::from_secs(
                parse_var("THROTTLE_PURGE_INTERVAL_SECS")
                    .filter(|secs| *secs > 0)
                    .unwrap_or(60),
            ),
        }
    }
}

impl WidgetLimits {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            hourly: parse_var("WIDGETS_HOURLY_LIMIT").unwrap_or(defaults.hourly),
            create_limit: parse_var("WIDGETS_CREATE_LIMIT").unwrap_or(defaults.create_limit),
            create_period: parse_var("WIDGETS_CREATE_PERIOD_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.create_period),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

fn flag(name: &str) -> bool {
    bool_var(name).unwrap_or(false)
}

/// `None` when unset or not a boolean.
fn bool_var(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|v| parse_bool(&v))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Usage headers are on by default; `false` turns one off, any other
/// non-boolean value renames it.
fn header_toggle(name: &str) -> HeaderToggle {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(HeaderToggle::Default)
}
