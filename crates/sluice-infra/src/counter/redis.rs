//! Redis counter store with bounded command latency.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, RedisResult, Script};

use sluice_core::ports::{CounterStore, StoreUnavailable};
use sluice_core::{QuotaSpec, Ttl, UsageSnapshot};

/// Increment a bucket, starting its expiry on first use.
/// ARGV[1]: window seconds, ARGV[2]: "1" to renew the expiry regardless.
/// Returns the new count.
const INCREMENT_SCRIPT: &str = r#"
local key = KEYS[1]
local window_secs = tonumber(ARGV[1])

local current = redis.call('INCR', key)
if current == 1 or ARGV[2] == '1' or redis.call('TTL', key) == -1 then
    redis.call('EXPIRE', key, window_secs)
end

return current
"#;

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Upper bound on every command round trip
    pub response_timeout: Duration,
    /// Namespace put in front of every bucket key
    pub key_prefix: Option<String>,
    /// Whether to fallback to the in-memory store if Redis is unavailable
    pub fallback_to_memory: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_millis(500),
            key_prefix: None,
            fallback_to_memory: true,
        }
    }
}

impl RedisConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            connect_timeout: Duration::from_secs(
                std::env::var("REDIS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            response_timeout: Duration::from_millis(
                std::env::var("REDIS_RESPONSE_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            key_prefix: std::env::var("THROTTLE_KEY_PREFIX")
                .ok()
                .filter(|s| !s.is_empty()),
            fallback_to_memory: std::env::var("REDIS_FALLBACK_TO_MEMORY")
                .ok()
                .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Some(true),
                    "false" | "0" | "no" | "off" => Some(false),
                    _ => None,
                })
                .unwrap_or(true),
        }
    }
}

/// Redis-backed counter store.
///
/// Uses connection manager for automatic reconnection. Counts are shared by
/// every instance pointing at the same Redis.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    config: RedisConfig,
    increment: Script,
}

impl RedisCounterStore {
    pub async fn new(config: RedisConfig) -> Result<Self, StoreUnavailable> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreUnavailable::Connection(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(config.connect_timeout, conn_manager_fut)
            .await
            .map_err(|_| StoreUnavailable::Timeout(config.connect_timeout))?
            .map_err(|e| StoreUnavailable::Connection(e.to_string()))?;

        tracing::info!(url = %config.url, "Connected to Redis counter store");

        Ok(Self {
            conn,
            config,
            increment: Script::new(INCREMENT_SCRIPT),
        })
    }

    /// Create from environment configuration.
    pub async fn from_env() -> Result<Self, StoreUnavailable> {
        Self::new(RedisConfig::from_env()).await
    }

    fn make_key(&self, key: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_string(),
        }
    }

    async fn bounded<T>(
        &self,
        command: impl Future<Output = RedisResult<T>>,
    ) -> Result<T, StoreUnavailable> {
        let timeout = self.config.response_timeout;
        tokio::time::timeout(timeout, command)
            .await
            .map_err(|_| StoreUnavailable::Timeout(timeout))?
            .map_err(classify)
    }
}

fn classify(e: RedisError) -> StoreUnavailable {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        StoreUnavailable::Connection(e.to_string())
    } else {
        StoreUnavailable::Command(e.to_string())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn ping(&self) -> Result<(), StoreUnavailable> {
        let mut conn = self.conn.clone();
        let _: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<u64, StoreUnavailable> {
        let redis_key = self.make_key(key);
        let mut conn = self.conn.clone();
        let count: Option<u64> = self.bounded(conn.get(&redis_key)).await?;
        Ok(count.unwrap_or(0))
    }

    async fn ttl(&self, key: &str) -> Result<Ttl, StoreUnavailable> {
        let redis_key = self.make_key(key);
        let mut conn = self.conn.clone();
        let secs: i64 = self.bounded(conn.ttl(&redis_key)).await?;
        Ok(Ttl::from_secs(secs))
    }

    async fn snapshot(&self, key: &str) -> Result<UsageSnapshot, StoreUnavailable> {
        let redis_key = self.make_key(key);
        let mut conn = self.conn.clone();

        let (count, ttl): (Option<u64>, i64) = self
            .bounded(
                redis::pipe()
                    .atomic()
                    .get(&redis_key)
                    .ttl(&redis_key)
                    .query_async(&mut conn),
            )
            .await?;

        Ok(UsageSnapshot {
            current: count.unwrap_or(0),
            ttl: Ttl::from_secs(ttl),
        })
    }

    async fn increment(
        &self,
        key: &str,
        window: Duration,
        renew_expiry: bool,
    ) -> Result<u64, StoreUnavailable> {
        // EXPIRE would fail only after INCR ran, leaving a bucket without TTL.
        if window > QuotaSpec::MAX_WINDOW {
            return Err(StoreUnavailable::Command(format!(
                "expiry of {}s exceeds {}s",
                window.as_secs(),
                QuotaSpec::MAX_WINDOW.as_secs()
            )));
        }

        let redis_key = self.make_key(key);
        let mut conn = self.conn.clone();

        let count: u64 = self
            .bounded(
                self.increment
                    .key(&redis_key)
                    .arg(window.as_secs())
                    .arg(u8::from(renew_expiry))
                    .invoke_async(&mut conn),
            )
            .await?;

        Ok(count)
    }
}
