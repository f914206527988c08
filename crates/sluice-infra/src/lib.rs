//! # Sluice Infrastructure
//!
//! Concrete implementations of the ports defined in `sluice-core`.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies, in-memory only
//! - `redis` - Redis-backed counter store shared across instances

pub mod counter;

pub use counter::InMemoryCounterStore;

#[cfg(feature = "redis")]
pub use counter::{RedisConfig, RedisCounterStore};
