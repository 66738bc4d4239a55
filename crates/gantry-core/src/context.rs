//! Request context types.
//!
//! The [`RequestContext`] is the read-only view of a call that handlers
//! receive once the pipeline has run its inbound stages.

use crate::identity::CallerIdentity;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A unique identifier for each call, using UUID v7.
///
/// UUID v7 is time-ordered, which keeps log lines for one service roughly
/// sorted by arrival.
///
/// # Example
///
/// ```
/// use gantry_core::RequestId;
///
/// let id = RequestId::new();
/// println!("Request ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parses a request ID sent by the caller (`x-request-id`).
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-call context handed to the [`RpcHandler`](crate::RpcHandler).
///
/// Carries the request ID, the caller identity established by the auth
/// stage, the trace/span IDs opened by the tracing stage, and the method
/// being invoked.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,
    identity: CallerIdentity,
    trace_id: Option<String>,
    span_id: Option<String>,
    method: Option<String>,
    started_at: Instant,
}

impl RequestContext {
    /// Creates a new context with a fresh request ID and anonymous caller.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(RequestId::new())
    }

    /// Creates a new context with the specified request ID.
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            identity: CallerIdentity::Anonymous,
            trace_id: None,
            span_id: None,
            method: None,
            started_at: Instant::now(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the caller identity.
    #[must_use]
    pub const fn identity(&self) -> &CallerIdentity {
        &self.identity
    }

    /// Returns a new context with the specified identity.
    #[must_use]
    pub fn with_identity(mut self, identity: CallerIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Returns the trace ID if set.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Returns a new context with the specified trace ID.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Returns the span ID if set.
    #[must_use]
    pub fn span_id(&self) -> Option<&str> {
        self.span_id.as_deref()
    }

    /// Returns a new context with the specified span ID.
    #[must_use]
    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    /// Returns the full method name if set.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Returns a new context with the specified method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Returns a new context whose clock starts at `started_at`.
    #[must_use]
    pub const fn with_started_at(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    /// Time elapsed since the call arrived.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_new_generates_unique_ids() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_request_id_parse() {
        let id = RequestId::new();
        assert_eq!(RequestId::parse(&id.to_string()), Some(id));
        assert_eq!(RequestId::parse("not-a-uuid"), None);
    }

    #[test]
    fn test_request_context_new() {
        let ctx = RequestContext::new();
        assert!(ctx.identity().is_anonymous());
        assert!(ctx.trace_id().is_none());
        assert!(ctx.method().is_none());
    }

    #[test]
    fn test_request_context_builder_pattern() {
        let ctx = RequestContext::new()
            .with_trace_id("abc123")
            .with_span_id("def456")
            .with_method("/helloworld.Greeter/SayHello");

        assert_eq!(ctx.trace_id(), Some("abc123"));
        assert_eq!(ctx.span_id(), Some("def456"));
        assert_eq!(ctx.method(), Some("/helloworld.Greeter/SayHello"));
    }

    #[test]
    fn test_request_context_elapsed() {
        let ctx = RequestContext::new();
        std::thread::sleep(Duration::from_millis(10));
        assert!(ctx.elapsed() >= Duration::from_millis(10));
    }
}
