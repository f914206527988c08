use crate::domain::RequestInfo;

/// Strategy for naming the caller a request is counted against.
///
/// Returning `None` (or an empty string) defers to the source address.
pub trait IdentityExtractor: Send + Sync {
    fn extract(&self, request: &RequestInfo) -> Option<String>;
}

impl<F> IdentityExtractor for F
where
    F: Fn(&RequestInfo) -> Option<String> + Send + Sync,
{
    fn extract(&self, request: &RequestInfo) -> Option<String> {
        self(request)
    }
}
