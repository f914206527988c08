use std::time::Duration;

/// Remaining lifetime of a counter bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The bucket does not exist (or has expired).
    Absent,
    /// The bucket exists but carries no expiry.
    Persistent,
    Remaining(Duration),
}

impl Ttl {
    /// Interpret a Redis-style TTL reply: -2 absent, -1 no expiry.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            -1 => Self::Persistent,
            s if s < 0 => Self::Absent,
            s => Self::Remaining(Duration::from_secs(s.unsigned_abs())),
        }
    }

    pub fn as_secs(&self) -> i64 {
        match self {
            Self::Absent => -2,
            Self::Persistent => -1,
            Self::Remaining(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::Remaining(d) => Some(*d),
            _ => None,
        }
    }
}

/// Count and TTL of one bucket, read together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub current: u64,
    pub ttl: Ttl,
}

impl UsageSnapshot {
    pub fn empty() -> Self {
        Self {
            current: 0,
            ttl: Ttl::Absent,
        }
    }
}
