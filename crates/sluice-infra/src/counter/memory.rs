//! In-memory counter store - used as fallback when Redis is unavailable.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use sluice_core::ports::{CounterStore, StoreUnavailable};
use sluice_core::{Ttl, UsageSnapshot};

struct Bucket {
    count: u64,
    expires_at: Option<Instant>,
}

impl Bucket {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    fn ttl(&self, now: Instant) -> Ttl {
        match self.expires_at {
            Some(exp) => Ttl::Remaining(exp.saturating_duration_since(now)),
            None => Ttl::Persistent,
        }
    }
}

/// In-memory counter store using a HashMap behind an async RwLock.
///
/// Expired buckets are dropped lazily on write and by [`purge_expired`].
/// Note: Counts are per-process, not shared across instances.
///
/// [`purge_expired`]: InMemoryCounterStore::purge_expired
pub struct InMemoryCounterStore {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Drop every expired bucket. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| !bucket.is_expired(now));
        before - buckets.len()
    }

    pub async fn len(&self) -> usize {
        self.buckets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buckets.read().await.is_empty()
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn ping(&self) -> Result<(), StoreUnavailable> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<u64, StoreUnavailable> {
        Ok(self.snapshot(key).await?.current)
    }

    async fn ttl(&self, key: &str) -> Result<Ttl, StoreUnavailable> {
        Ok(self.snapshot(key).await?.ttl)
    }

    async fn snapshot(&self, key: &str) -> Result<UsageSnapshot, StoreUnavailable> {
        let now = Instant::now();
        let buckets = self.buckets.read().await;

        let usage = match buckets.get(key) {
            Some(bucket) if !bucket.is_expired(now) => UsageSnapshot {
                current: bucket.count,
                ttl: bucket.ttl(now),
            },
            _ => UsageSnapshot::empty(),
        };

        Ok(usage)
    }

    async fn increment(
        &self,
        key: &str,
        window: Duration,
        renew_expiry: bool,
    ) -> Result<u64, StoreUnavailable> {
        let now = Instant::now();
        let expires_at = now.checked_add(window).ok_or_else(|| {
            StoreUnavailable::Command(format!("expiry of {window:?} is out of range"))
        })?;
        let mut buckets = self.buckets.write().await;

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            expires_at: None,
        });

        if bucket.is_expired(now) {
            bucket.count = 0;
            bucket.expires_at = None;
        }

        bucket.count += 1;

        if renew_expiry || bucket.count == 1 || bucket.expires_at.is_none() {
            bucket.expires_at = Some(expires_at);
        }

        Ok(bucket.count)
    }
}
