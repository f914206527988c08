//! Throttle decision engine.
//!
//! One call per inbound request: derive the bucket key, read its usage, then
//! either deny or admit and count the request. All contended state lives in
//! the [`CounterStore`]; the engine itself is immutable and shareable.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    QuotaSpec, RequestInfo, RouteIdentity, RoutePolicy, ThrottleSettings, UsageSnapshot,
};
use crate::error::{ConfigurationError, StoreUnavailable};
use crate::headers::{HeaderConfig, HeaderFormatter, HeaderSet};
use crate::identity::IdentityKeyBuilder;
use crate::ports::{Clock, CounterStore, IdentityExtractor, SystemClock};

/// Status code reported when a quota is exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DenialStatus {
    /// 429 Too Many Requests.
    #[default]
    TooManyRequests,
    /// 403 Forbidden, for clients written against older deployments.
    Forbidden,
}

impl DenialStatus {
    pub fn code(&self) -> u16 {
        match self {
            Self::TooManyRequests => 429,
            Self::Forbidden => 403,
        }
    }
}

/// Engine behaviour switches.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Only start a bucket's expiry when the bucket is created. When false,
    /// every counted request pushes the expiry a full window forward.
    pub coast_expiry: bool,
    pub denial_status: DenialStatus,
    pub denial_message: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            coast_expiry: true,
            denial_status: DenialStatus::default(),
            denial_message: "too many requests, please try again later".to_string(),
        }
    }
}

/// How an admitted request got through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionKind {
    /// Counted against the quota.
    Counted,
    /// HEAD request: usage read, nothing counted.
    Inspection,
    /// The counter store was unavailable.
    FailOpen,
}

/// An admitted request and the usage read before admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub kind: AdmissionKind,
    pub quota: QuotaSpec,
    /// `None` when the store could not be read.
    pub usage: Option<UsageSnapshot>,
}

/// A denied request. This is an expected outcome, not a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaExceeded {
    pub message: String,
    pub status: u16,
    pub quota: QuotaSpec,
    pub usage: UsageSnapshot,
    pub headers: HeaderSet,
}

impl QuotaExceeded {
    /// Time until the exhausted bucket expires.
    pub fn retry_after(&self) -> Duration {
        self.usage.ttl.remaining().unwrap_or(self.quota.window())
    }
}

impl fmt::Display for QuotaExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admitted(Admission),
    Denied(QuotaExceeded),
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }
}

/// Fixed-window admission decisions over a shared counter store.
pub struct ThrottleEngine {
    store: Arc<dyn CounterStore>,
    keys: IdentityKeyBuilder,
    formatter: HeaderFormatter,
    clock: Arc<dyn Clock>,
    options: EngineOptions,
}

impl ThrottleEngine {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            keys: IdentityKeyBuilder::new(),
            formatter: HeaderFormatter::default(),
            clock: Arc::new(SystemClock),
            options: EngineOptions::default(),
        }
    }

    pub fn with_identity(mut self, extractor: Arc<dyn IdentityExtractor>) -> Self {
        self.keys = IdentityKeyBuilder::with_extractor(extractor);
        self
    }

    pub fn with_headers(mut self, config: HeaderConfig) -> Self {
        self.formatter = HeaderFormatter::new(config);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Resolve `settings` and check the request in one go.
    ///
    /// Prefer building a [`RoutePolicy`] at registration time so
    /// configuration errors surface before any request is served.
    pub async fn check(
        &self,
        route: &RouteIdentity,
        settings: &ThrottleSettings,
        request: &RequestInfo,
    ) -> Result<Decision, ConfigurationError> {
        let policy = RoutePolicy::new(route.clone(), settings)?;
        Ok(self.check_and_admit(&policy, request).await)
    }

    /// Decide on a request, admitting it if the counter store is unavailable.
    pub async fn check_and_admit(&self, policy: &RoutePolicy, request: &RequestInfo) -> Decision {
        match self.try_check(policy, request).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(route = %policy.route, error = %e, "Counter store unavailable, failing open");
                Decision::Admitted(Admission {
                    kind: AdmissionKind::FailOpen,
                    quota: policy.quota,
                    usage: None,
                })
            }
        }
    }

    /// Decide on a request, surfacing store failures to the caller.
    pub async fn try_check(
        &self,
        policy: &RoutePolicy,
        request: &RequestInfo,
    ) -> Result<Decision, StoreUnavailable> {
        let quota = policy.quota;
        let key = self.keys.build(&policy.route, request);

        self.store.ping().await?;
        let usage = self.store.snapshot(key.as_str()).await?;

        if request.is_inspection() {
            return Ok(Decision::Admitted(Admission {
                kind: AdmissionKind::Inspection,
                quota,
                usage: Some(usage),
            }));
        }

        if usage.current >= quota.limit() {
            tracing::info!(
                key = %key,
                current = usage.current,
                limit = quota.limit(),
                "Quota exceeded"
            );

            return Ok(Decision::Denied(QuotaExceeded {
                message: self.options.denial_message.clone(),
                status: self.options.denial_status.code(),
                quota,
                usage,
                headers: self.formatter.format(&usage, &quota, self.clock.now()),
            }));
        }

        // First use of a bucket always starts its expiry; the store decides
        // that atomically. The flag only forces renewal on every request.
        let renew_expiry = !self.options.coast_expiry;
        let count = self
            .store
            .increment(key.as_str(), quota.window(), renew_expiry)
            .await?;

        tracing::debug!(key = %key, count, limit = quota.limit(), "Request admitted");

        Ok(Decision::Admitted(Admission {
            kind: AdmissionKind::Counted,
            quota,
            usage: Some(usage),
        }))
    }

    /// Usage headers for an admitted request, from the snapshot taken at
    /// decision time. Empty when the store was unavailable.
    pub fn headers(&self, admission: &Admission) -> HeaderSet {
        match &admission.usage {
            Some(usage) => self
                .formatter
                .format(usage, &admission.quota, self.clock.now()),
            None => HeaderSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Ttl;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubStore {
        // key -> (count, ttl seconds or None for no expiry)
        buckets: Mutex<HashMap<String, (u64, Option<u64>)>>,
        down: AtomicBool,
        fail_increment: AtomicBool,
        increments: AtomicUsize,
        expiry_sets: AtomicUsize,
    }

    impl StubStore {
        fn count(&self, key: &str) -> u64 {
            self.buckets.lock().unwrap().get(key).map_or(0, |b| b.0)
        }

        fn ttl_secs(&self, key: &str) -> Option<u64> {
            self.buckets.lock().unwrap().get(key).and_then(|b| b.1)
        }

        fn set_ttl(&self, key: &str, secs: u64) {
            if let Some(bucket) = self.buckets.lock().unwrap().get_mut(key) {
                bucket.1 = Some(secs);
            }
        }
    }

    #[async_trait]
    impl CounterStore for StubStore {
        async fn ping(&self) -> Result<(), StoreUnavailable> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreUnavailable::Connection("connection refused".into()));
            }
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<u64, StoreUnavailable> {
            Ok(self.count(key))
        }

        async fn ttl(&self, key: &str) -> Result<Ttl, StoreUnavailable> {
            let buckets = self.buckets.lock().unwrap();
            Ok(match buckets.get(key) {
                None => Ttl::Absent,
                Some((_, None)) => Ttl::Persistent,
                Some((_, Some(secs))) => Ttl::Remaining(Duration::from_secs(*secs)),
            })
        }

        async fn increment(
            &self,
            key: &str,
            window: Duration,
            renew_expiry: bool,
        ) -> Result<u64, StoreUnavailable> {
            if self.fail_increment.load(Ordering::SeqCst) {
                return Err(StoreUnavailable::Command("READONLY".into()));
            }
            self.increments.fetch_add(1, Ordering::SeqCst);

            let mut buckets = self.buckets.lock().unwrap();
            let bucket = buckets.entry(key.to_string()).or_insert((0, None));
            bucket.0 += 1;
            if renew_expiry || bucket.0 == 1 || bucket.1.is_none() {
                bucket.1 = Some(window.as_secs());
                self.expiry_sets.fetch_add(1, Ordering::SeqCst);
            }
            Ok(bucket.0)
        }
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    const NOW: i64 = 1_700_000_000;
    const KEY: &str = "GET:/widgets:ip:1.2.3.4";

    fn engine(store: Arc<StubStore>) -> ThrottleEngine {
        let clock = FixedClock(DateTime::from_timestamp(NOW, 0).unwrap());
        ThrottleEngine::new(store)
            .with_headers(HeaderConfig::all())
            .with_clock(Arc::new(clock))
    }

    fn widgets_policy(limit: u64) -> RoutePolicy {
        RoutePolicy::new(
            RouteIdentity::new("GET", "/widgets"),
            &ThrottleSettings::per_period(limit, Duration::from_secs(3600)),
        )
        .unwrap()
    }

    fn request(method: &str) -> RequestInfo {
        RequestInfo::new(method, "/widgets").with_remote_addr("1.2.3.4")
    }

    #[tokio::test]
    async fn test_fixed_window_sequence() {
        let store = Arc::new(StubStore::default());
        let engine = engine(store.clone());
        let policy = widgets_policy(2);

        // Request 1: empty bucket, admitted, expiry started
        let decision = engine.check_and_admit(&policy, &request("GET")).await;
        assert!(decision.is_admitted());
        assert_eq!(store.count(KEY), 1);
        assert_eq!(store.ttl_secs(KEY), Some(3600));

        // Time passes inside the window
        store.set_ttl(KEY, 3590);

        // Request 2: admitted, expiry untouched
        let decision = engine.check_and_admit(&policy, &request("GET")).await;
        assert!(decision.is_admitted());
        assert_eq!(store.count(KEY), 2);
        assert_eq!(store.ttl_secs(KEY), Some(3590));
        assert_eq!(store.expiry_sets.load(Ordering::SeqCst), 1);

        // Request 3: over the limit
        let Decision::Denied(denied) = engine.check_and_admit(&policy, &request("GET")).await
        else {
            panic!("third request should be denied");
        };
        assert_eq!(denied.status, 429);
        assert_eq!(denied.message, "too many requests, please try again later");
        assert_eq!(denied.headers.get("X-Throttle-Remaining"), Some("0"));
        assert_eq!(denied.headers.get("X-Throttle-Limit"), Some("2"));
        let reset = (NOW + 3590).to_string();
        assert_eq!(denied.headers.get("X-Throttle-Reset"), Some(reset.as_str()));
        assert_eq!(denied.retry_after(), Duration::from_secs(3590));
        assert_eq!(store.count(KEY), 2);
        assert_eq!(store.increments.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_admission_headers_use_decision_snapshot() {
        let store = Arc::new(StubStore::default());
        let engine = engine(store.clone());
        let policy = widgets_policy(5);

        let Decision::Admitted(admission) = engine.check_and_admit(&policy, &request("GET")).await
        else {
            panic!("expected admission");
        };
        assert_eq!(admission.kind, AdmissionKind::Counted);
        assert_eq!(admission.usage, Some(UsageSnapshot::empty()));

        let headers = engine.headers(&admission);
        assert_eq!(headers.get("X-Throttle-Remaining"), Some("5"));
        assert_eq!(headers.get("X-Throttle-Limit"), Some("5"));
        let reset = (NOW + 3600).to_string();
        assert_eq!(headers.get("X-Throttle-Reset"), Some(reset.as_str()));
    }

    #[tokio::test]
    async fn test_head_is_never_counted_or_denied() {
        let store = Arc::new(StubStore::default());
        let engine = engine(store.clone());
        let policy = widgets_policy(1);

        engine.check_and_admit(&policy, &request("GET")).await;
        assert_eq!(store.count(KEY), 1);

        for _ in 0..3 {
            let Decision::Admitted(admission) =
                engine.check_and_admit(&policy, &request("HEAD")).await
            else {
                panic!("HEAD must not be denied");
            };
            assert_eq!(admission.kind, AdmissionKind::Inspection);
            assert_eq!(admission.usage.map(|u| u.current), Some(1));
        }

        assert_eq!(store.count(KEY), 1);
        assert_eq!(store.increments.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_open() {
        let store = Arc::new(StubStore::default());
        store.down.store(true, Ordering::SeqCst);
        let engine = engine(store.clone());
        let policy = widgets_policy(1);

        for _ in 0..3 {
            let Decision::Admitted(admission) =
                engine.check_and_admit(&policy, &request("GET")).await
            else {
                panic!("store outage must not deny");
            };
            assert_eq!(admission.kind, AdmissionKind::FailOpen);
            assert!(engine.headers(&admission).is_empty());
        }

        assert_eq!(store.increments.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_try_check_surfaces_store_errors() {
        let store = Arc::new(StubStore::default());
        store.down.store(true, Ordering::SeqCst);
        let engine = engine(store);

        let result = engine.try_check(&widgets_policy(1), &request("GET")).await;
        assert!(matches!(result, Err(StoreUnavailable::Connection(_))));
    }

    #[tokio::test]
    async fn test_failed_increment_fails_open() {
        let store = Arc::new(StubStore::default());
        store.fail_increment.store(true, Ordering::SeqCst);
        let engine = engine(store.clone());

        let decision = engine.check_and_admit(&widgets_policy(1), &request("POST")).await;
        assert!(matches!(
            decision,
            Decision::Admitted(Admission {
                kind: AdmissionKind::FailOpen,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_always_renew_override() {
        let store = Arc::new(StubStore::default());
        let engine = engine(store.clone()).with_options(EngineOptions {
            coast_expiry: false,
            ..EngineOptions::default()
        });
        let policy = widgets_policy(5);

        engine.check_and_admit(&policy, &request("GET")).await;
        store.set_ttl(KEY, 10);
        engine.check_and_admit(&policy, &request("GET")).await;

        assert_eq!(store.ttl_secs(KEY), Some(3600));
        assert_eq!(store.expiry_sets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_legacy_forbidden_status() {
        let store = Arc::new(StubStore::default());
        let engine = engine(store).with_options(EngineOptions {
            denial_status: DenialStatus::Forbidden,
            ..EngineOptions::default()
        });
        let policy = widgets_policy(1);

        engine.check_and_admit(&policy, &request("GET")).await;
        let Decision::Denied(denied) = engine.check_and_admit(&policy, &request("GET")).await
        else {
            panic!("expected denial");
        };
        assert_eq!(denied.status, 403);
    }

    #[tokio::test]
    async fn test_callers_have_separate_buckets() {
        let store = Arc::new(StubStore::default());
        let engine = engine(store.clone());
        let policy = widgets_policy(1);
        let other = RequestInfo::new("GET", "/widgets").with_remote_addr("5.6.7.8");

        assert!(engine.check_and_admit(&policy, &request("GET")).await.is_admitted());
        assert!(engine.check_and_admit(&policy, &other).await.is_admitted());
        assert!(!engine.check_and_admit(&policy, &request("GET")).await.is_admitted());

        assert_eq!(store.count(KEY), 1);
        assert_eq!(store.count("GET:/widgets:ip:5.6.7.8"), 1);
    }

    #[tokio::test]
    async fn test_check_rejects_incomplete_settings() {
        let store = Arc::new(StubStore::default());
        let engine = engine(store.clone());
        let settings = ThrottleSettings {
            period: Some(60),
            ..ThrottleSettings::default()
        };

        let result = engine
            .check(&RouteIdentity::new("GET", "/widgets"), &settings, &request("GET"))
            .await;

        assert_eq!(result, Err(ConfigurationError::MissingLimit));
        assert_eq!(store.increments.load(Ordering::SeqCst), 0);
    }
}
