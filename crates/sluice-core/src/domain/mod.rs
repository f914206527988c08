//! Domain entities - quotas, route and caller identity, usage readings.

mod identity;
mod quota;
mod usage;

pub use identity::{CounterKey, RequestInfo, RouteIdentity};
pub use quota::{QuotaSpec, RoutePolicy, ThrottleSettings};
pub use usage::{Ttl, UsageSnapshot};
