//! Usage headers rendered from a bucket snapshot.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{QuotaSpec, UsageSnapshot};

pub const DEFAULT_REMAINING_HEADER: &str = "X-Throttle-Remaining";
pub const DEFAULT_LIMIT_HEADER: &str = "X-Throttle-Limit";
pub const DEFAULT_RESET_HEADER: &str = "X-Throttle-Reset";

/// Whether a usage header is emitted, and under which name.
///
/// Deserializes from `false`, `true` or a custom header name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawToggle", into = "RawToggle")]
pub enum HeaderToggle {
    #[default]
    Disabled,
    Default,
    Named(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawToggle {
    Flag(bool),
    Name(String),
}

impl From<RawToggle> for HeaderToggle {
    fn from(raw: RawToggle) -> Self {
        match raw {
            RawToggle::Flag(false) => Self::Disabled,
            RawToggle::Flag(true) => Self::Default,
            RawToggle::Name(name) => name.parse().unwrap_or(Self::Disabled),
        }
    }
}

impl From<HeaderToggle> for RawToggle {
    fn from(toggle: HeaderToggle) -> Self {
        match toggle {
            HeaderToggle::Disabled => Self::Flag(false),
            HeaderToggle::Default => Self::Flag(true),
            HeaderToggle::Named(name) => Self::Name(name),
        }
    }
}

/// Parses environment-style values: `true`/`1`, `false`/`0`/empty, or a name.
impl FromStr for HeaderToggle {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s.to_ascii_lowercase().as_str() {
            "" | "false" | "0" => Self::Disabled,
            "true" | "1" => Self::Default,
            _ => Self::Named(s.to_string()),
        })
    }
}

impl HeaderToggle {
    fn name<'a>(&'a self, default: &'a str) -> Option<&'a str> {
        match self {
            Self::Disabled => None,
            Self::Default => Some(default),
            Self::Named(name) => Some(name.as_str()),
        }
    }
}

/// Which usage headers to emit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderConfig {
    pub remaining: HeaderToggle,
    pub limit: HeaderToggle,
    pub reset: HeaderToggle,
}

impl HeaderConfig {
    /// All three headers under their default names.
    pub fn all() -> Self {
        Self {
            remaining: HeaderToggle::Default,
            limit: HeaderToggle::Default,
            reset: HeaderToggle::Default,
        }
    }
}

/// Header name to value, built fresh for each request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet(BTreeMap<String, String>);

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl ToString) {
        self.0.insert(name.into(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for HeaderSet {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Renders remaining / limit / reset headers.
#[derive(Debug, Clone, Default)]
pub struct HeaderFormatter {
    config: HeaderConfig,
}

impl HeaderFormatter {
    pub fn new(config: HeaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HeaderConfig {
        &self.config
    }

    /// Render the enabled headers for one snapshot.
    ///
    /// `reset` is the Unix time at which the bucket expires. A bucket with no
    /// TTL is reported as if its window had just started.
    pub fn format(&self, usage: &UsageSnapshot, quota: &QuotaSpec, now: DateTime<Utc>) -> HeaderSet {
        let mut headers = HeaderSet::new();

        if let Some(name) = self.config.remaining.name(DEFAULT_REMAINING_HEADER) {
            headers.insert(name, quota.remaining(usage.current));
        }

        if let Some(name) = self.config.limit.name(DEFAULT_LIMIT_HEADER) {
            headers.insert(name, quota.limit());
        }

        if let Some(name) = self.config.reset.name(DEFAULT_RESET_HEADER) {
            let ttl = usage.ttl.remaining().unwrap_or(quota.window());
            let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
            headers.insert(name, now.timestamp().saturating_add(ttl_secs));
        }

        headers
    }
}
