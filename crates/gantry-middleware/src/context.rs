//! Per-call interceptor context.
//!
//! The [`MiddlewareContext`] carries state through the pipeline. Stages
//! enrich it (trace IDs, caller identity, rejection marks) and the handler
//! receives a read-only [`RequestContext`] built from it.

use gantry_core::{Call, CallerIdentity, RequestContext, RequestId};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Metadata key carrying a caller-supplied request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Context that flows through the interceptor pipeline.
///
/// # Example
///
/// ```
/// use gantry_middleware::context::MiddlewareContext;
/// use gantry_core::CallerIdentity;
///
/// let mut ctx = MiddlewareContext::new();
/// ctx.set_identity(CallerIdentity::user("billing", vec!["reader".to_string()]));
///
/// assert_eq!(ctx.identity().log_id(), "user:billing");
/// ```
#[derive(Debug)]
pub struct MiddlewareContext {
    request_id: RequestId,
    identity: CallerIdentity,
    trace_id: Option<String>,
    span_id: Option<String>,
    method: String,
    started_at: Instant,
    rejected_by: Option<&'static str>,
    admitted: bool,
    admission_hooks: AdmissionHooks,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

type AdmissionHook = Box<dyn FnOnce(&mut MiddlewareContext) + Send + Sync>;

#[derive(Default)]
struct AdmissionHooks(Vec<AdmissionHook>);

impl fmt::Debug for AdmissionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pending", self.0.len())
    }
}

impl MiddlewareContext {
    /// Creates a context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(RequestId::new())
    }

    /// Creates a context with a specific request ID.
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            identity: CallerIdentity::Anonymous,
            trace_id: None,
            span_id: None,
            method: String::new(),
            started_at: Instant::now(),
            rejected_by: None,
            admitted: false,
            admission_hooks: AdmissionHooks::default(),
            extensions: HashMap::new(),
        }
    }

    /// Creates the context for an incoming call.
    ///
    /// A well-formed `x-request-id` in the call metadata is kept; otherwise a
    /// new ID is generated.
    #[must_use]
    pub fn for_call(call: &Call) -> Self {
        let request_id = call
            .header(REQUEST_ID_HEADER)
            .and_then(RequestId::parse)
            .unwrap_or_default();
        let mut ctx = Self::with_request_id(request_id);
        ctx.method = call.method().to_string();
        ctx
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Full method name of the call.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the caller identity.
    #[must_use]
    pub fn identity(&self) -> &CallerIdentity {
        &self.identity
    }

    /// Sets the caller identity. Only the auth stage does this.
    pub fn set_identity(&mut self, identity: CallerIdentity) {
        self.identity = identity;
    }

    /// Returns the trace ID, if set.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Sets the trace ID.
    pub fn set_trace_id(&mut self, trace_id: String) {
        self.trace_id = Some(trace_id);
    }

    /// Returns the span ID, if set.
    #[must_use]
    pub fn span_id(&self) -> Option<&str> {
        self.span_id.as_deref()
    }

    /// Sets the span ID.
    pub fn set_span_id(&mut self, span_id: String) {
        self.span_id = Some(span_id);
    }

    /// Returns when the call arrived.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the call arrived.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Marks the call as rejected by `stage` before it reached the handler.
    ///
    /// Outer stages that only account for admitted calls check
    /// [`rejected_by`](Self::rejected_by) on the way out.
    pub fn mark_rejected(&mut self, stage: &'static str) {
        self.rejected_by = Some(stage);
    }

    /// The stage that rejected the call, if any.
    #[must_use]
    pub fn rejected_by(&self) -> Option<&'static str> {
        self.rejected_by
    }

    /// Runs `hook` once the call has passed every stage and is about to
    /// reach the handler. Hooks never run for short-circuited calls.
    pub fn on_admitted(&mut self, hook: impl FnOnce(&mut Self) + Send + Sync + 'static) {
        self.admission_hooks.0.push(Box::new(hook));
    }

    /// Whether the call reached the handler.
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        self.admitted
    }

    pub(crate) fn admit(&mut self) {
        self.admitted = true;
        for hook in std::mem::take(&mut self.admission_hooks.0) {
            hook(self);
        }
    }

    /// Stores a typed extension value.
    ///
    /// ```
    /// use gantry_middleware::context::MiddlewareContext;
    ///
    /// struct Attempt(u32);
    ///
    /// let mut ctx = MiddlewareContext::new();
    /// ctx.set_extension(Attempt(2));
    /// assert_eq!(ctx.get_extension::<Attempt>().unwrap().0, 2);
    /// ```
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Checks if an extension of the given type exists.
    #[must_use]
    pub fn has_extension<T: Send + Sync + 'static>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<T>())
    }

    /// Builds the context handed to the handler.
    #[must_use]
    pub fn to_request_context(&self) -> RequestContext {
        let mut ctx = RequestContext::with_request_id(self.request_id)
            .with_identity(self.identity.clone())
            .with_method(self.method.clone())
            .with_started_at(self.started_at);

        if let Some(trace_id) = &self.trace_id {
            ctx = ctx.with_trace_id(trace_id.clone());
        }
        if let Some(span_id) = &self.span_id {
            ctx = ctx.with_span_id(span_id.clone());
        }
        ctx
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_has_anonymous_identity() {
        let ctx = MiddlewareContext::new();
        assert!(ctx.identity().is_anonymous());
        assert!(ctx.rejected_by().is_none());
    }

    #[test]
    fn test_for_call_keeps_valid_request_id() {
        let id = RequestId::new();
        let call = Call::new("/helloworld.Greeter/SayHello", "")
            .with_header(REQUEST_ID_HEADER, &id.to_string());

        let ctx = MiddlewareContext::for_call(&call);
        assert_eq!(ctx.request_id(), id);
        assert_eq!(ctx.method(), "/helloworld.Greeter/SayHello");
    }

    #[test]
    fn test_for_call_replaces_malformed_request_id() {
        let call = Call::new("/a.B/C", "").with_header(REQUEST_ID_HEADER, "not-a-uuid");
        let ctx = MiddlewareContext::for_call(&call);
        assert_ne!(ctx.request_id().to_string(), "not-a-uuid");
    }

    #[test]
    fn test_mark_rejected() {
        let mut ctx = MiddlewareContext::new();
        ctx.mark_rejected("auth");
        assert_eq!(ctx.rejected_by(), Some("auth"));
    }

    #[test]
    fn test_admission_hooks_run_once_on_admit() {
        struct Seen(u32);

        let mut ctx = MiddlewareContext::new();
        ctx.on_admitted(|ctx| {
            let seen = ctx.remove_extension::<Seen>().map_or(0, |s| s.0);
            ctx.set_extension(Seen(seen + 1));
        });
        assert!(!ctx.is_admitted());

        ctx.admit();
        ctx.admit();
        assert!(ctx.is_admitted());
        assert_eq!(ctx.get_extension::<Seen>().map(|s| s.0), Some(1));
    }

    #[test]
    fn test_extensions() {
        #[derive(Debug, PartialEq)]
        struct Marker(i32);

        let mut ctx = MiddlewareContext::new();
        assert!(!ctx.has_extension::<Marker>());

        ctx.set_extension(Marker(42));
        assert_eq!(ctx.get_extension::<Marker>(), Some(&Marker(42)));

        assert_eq!(ctx.remove_extension::<Marker>(), Some(Marker(42)));
        assert!(!ctx.has_extension::<Marker>());
    }

    #[test]
    fn test_to_request_context() {
        let call = Call::new("/a.B/C", "");
        let mut ctx = MiddlewareContext::for_call(&call);
        ctx.set_identity(CallerIdentity::user("u123", vec![]));
        ctx.set_trace_id("trace-123".to_string());
        ctx.set_span_id("span-456".to_string());

        let req_ctx = ctx.to_request_context();
        assert_eq!(req_ctx.request_id(), ctx.request_id());
        assert_eq!(req_ctx.trace_id(), Some("trace-123"));
        assert_eq!(req_ctx.span_id(), Some("span-456"));
        assert_eq!(req_ctx.method(), Some("/a.B/C"));
        assert_eq!(req_ctx.identity().log_id(), "user:u123");
    }
}
