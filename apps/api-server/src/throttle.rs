//! Route-level throttle registry.

use std::collections::HashMap;

use sluice_core::{ConfigurationError, RouteIdentity, RoutePolicy, ThrottleEngine, ThrottleSettings};

/// Throttled routes keyed by method and route pattern.
#[derive(Debug, Default)]
pub struct RouteTable {
    policies: HashMap<(String, String), RoutePolicy>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a quota to a route. Incomplete settings are rejected here so
    /// that a misconfigured route never starts serving.
    pub fn register(
        &mut self,
        method: &str,
        pattern: &str,
        settings: &ThrottleSettings,
    ) -> Result<(), ConfigurationError> {
        let route = RouteIdentity::new(method.to_ascii_uppercase(), pattern);
        let policy = RoutePolicy::new(route, settings)?;

        tracing::debug!(
            route = %policy.route,
            limit = policy.quota.limit(),
            window_secs = policy.quota.window().as_secs(),
            "Registered throttled route"
        );

        self.policies
            .insert((policy.route.method.clone(), pattern.to_string()), policy);
        Ok(())
    }

    /// Policy for a request. HEAD requests are checked against the GET route.
    pub fn lookup(&self, method: &str, pattern: &str) -> Option<&RoutePolicy> {
        let method = if method.eq_ignore_ascii_case("HEAD") {
            "GET".to_string()
        } else {
            method.to_ascii_uppercase()
        };
        self.policies.get(&(method, pattern.to_string()))
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Engine plus the routes it guards, shared by every worker.
pub struct Throttle {
    pub engine: ThrottleEngine,
    pub routes: RouteTable,
}

impl Throttle {
    pub fn new(engine: ThrottleEngine, routes: RouteTable) -> Self {
        Self { engine, routes }
    }
}
