//! # Sluice Core
//!
//! The domain layer of Sluice: fixed-window request throttling.
//! This crate decides whether a request may proceed and what usage headers
//! to report. It performs no I/O itself; counters live behind the
//! [`ports::CounterStore`] port.

pub mod domain;
pub mod engine;
pub mod error;
pub mod headers;
pub mod identity;
pub mod ports;

pub use domain::{
    CounterKey, QuotaSpec, RequestInfo, RouteIdentity, RoutePolicy, ThrottleSettings, Ttl,
    UsageSnapshot,
};
pub use engine::{
    Admission, AdmissionKind, Decision, DenialStatus, EngineOptions, QuotaExceeded, ThrottleEngine,
};
pub use error::{ConfigurationError, StoreUnavailable};
pub use headers::{HeaderConfig, HeaderFormatter, HeaderSet, HeaderToggle};
pub use identity::{HeaderIdentity, IdentityKeyBuilder, SourceAddress};
