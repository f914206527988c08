//! Caller identification and counter key derivation.

use std::sync::Arc;

use crate::domain::{CounterKey, RequestInfo, RouteIdentity};
use crate::ports::IdentityExtractor;

/// Default identity: the request's source address, tagged `ip:`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceAddress;

impl SourceAddress {
    fn identity(request: &RequestInfo) -> String {
        let addr = request.remote_addr.as_deref().unwrap_or("unknown");
        format!("ip:{addr}")
    }
}

impl IdentityExtractor for SourceAddress {
    fn extract(&self, request: &RequestInfo) -> Option<String> {
        Some(Self::identity(request))
    }
}

/// Identity read from a request header, e.g. an API key.
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    header: String,
    prefix: String,
}

impl HeaderIdentity {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            prefix: "key".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl IdentityExtractor for HeaderIdentity {
    fn extract(&self, request: &RequestInfo) -> Option<String> {
        let value = request.header(&self.header)?.trim();
        if value.is_empty() {
            return None;
        }
        Some(format!("{}:{}", self.prefix, value))
    }
}

/// Builds the bucket key for a (route, caller) pair.
#[derive(Clone, Default)]
pub struct IdentityKeyBuilder {
    extractor: Option<Arc<dyn IdentityExtractor>>,
}

impl IdentityKeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extractor(extractor: Arc<dyn IdentityExtractor>) -> Self {
        Self {
            extractor: Some(extractor),
        }
    }

    pub fn caller_identity(&self, request: &RequestInfo) -> String {
        self.extractor
            .as_ref()
            .and_then(|extractor| extractor.extract(request))
            .filter(|identity| !identity.is_empty())
            .unwrap_or_else(|| SourceAddress::identity(request))
    }

    pub fn build(&self, route: &RouteIdentity, request: &RequestInfo) -> CounterKey {
        CounterKey::new(route, &self.caller_identity(request))
    }
}

impl std::fmt::Debug for IdentityKeyBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyBuilder")
            .field("custom_extractor", &self.extractor.is_some())
            .finish()
    }
}
