//! Ports - trait definitions for external dependencies.
//! These are the "interfaces" that infrastructure and hosts implement.

mod clock;
mod counter_store;
mod identity;

pub use crate::error::StoreUnavailable;
pub use clock::{Clock, SystemClock};
pub use counter_store::CounterStore;
pub use identity::IdentityExtractor;
