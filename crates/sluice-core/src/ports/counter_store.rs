use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Ttl, UsageSnapshot};
use crate::error::StoreUnavailable;

/// Counter store trait - abstraction over shared atomic counter backends.
///
/// Every method may fail with [`StoreUnavailable`]; slow backends should be
/// bounded by the adapter's own timeout and report `Timeout`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Liveness probe, issued before each throttle check.
    async fn ping(&self) -> Result<(), StoreUnavailable>;

    /// Current count of a bucket, 0 if absent.
    async fn get(&self, key: &str) -> Result<u64, StoreUnavailable>;

    /// Remaining lifetime of a bucket.
    async fn ttl(&self, key: &str) -> Result<Ttl, StoreUnavailable>;

    /// Count and TTL of a bucket.
    ///
    /// Adapters should override this with a single atomic read; the default
    /// issues two queries.
    async fn snapshot(&self, key: &str) -> Result<UsageSnapshot, StoreUnavailable> {
        let current = self.get(key).await?;
        let ttl = self.ttl(key).await?;
        Ok(UsageSnapshot { current, ttl })
    }

    /// Atomically add one to a bucket and return the new count.
    ///
    /// The expiry is (re)set to `window` when `renew_expiry` is true, when
    /// this increment created the bucket, or when the bucket has no expiry.
    /// Otherwise the existing expiry is left untouched.
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        renew_expiry: bool,
    ) -> Result<u64, StoreUnavailable>;
}
