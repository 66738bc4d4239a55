//! The ordered interceptor pipeline.
//!
//! A [`Pipeline`] is immutable once built. Calls flow through its stages in
//! insertion order on the way in and in reverse order on the way out, then
//! reach the handler at the centre.

use crate::context::MiddlewareContext;
use crate::middleware::{terminal, BoxFuture, Middleware, Next};
use gantry_core::{Call, Code, Reply, RpcHandler};
use std::sync::Arc;
use std::time::Duration;

/// A type-erased interceptor that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// The composed interceptor pipeline.
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::builder()
///     .add_stage(tracing_stage)
///     .add_stage(logging_stage)
///     .build();
///
/// let reply = pipeline.invoke(&mut ctx, call, &handler).await;
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Runs a call through every stage and then `handler`.
    pub async fn process<H>(&self, ctx: &mut MiddlewareContext, call: Call, handler: H) -> Reply
    where
        H: FnOnce(&mut MiddlewareContext, Call) -> BoxFuture<'static, Reply> + Send + 'static,
    {
        let next = self.build_chain(handler);
        next.run(ctx, call).await
    }

    /// Runs a call through every stage and then the service handler.
    pub async fn invoke(
        &self,
        ctx: &mut MiddlewareContext,
        call: Call,
        handler: &Arc<dyn RpcHandler>,
    ) -> Reply {
        let handler = Arc::clone(handler);
        self.process(ctx, call, move |ctx, call| {
            let request_ctx = ctx.to_request_context();
            terminal(async move { handler.call(&request_ctx, call).await.into() })
        })
        .await
    }

    /// Like [`invoke`](Self::invoke), but the handler gets at most `deadline`.
    ///
    /// Only the handler is cancelled when the deadline passes. Every stage
    /// still sees the call complete with `DEADLINE_EXCEEDED`.
    pub async fn invoke_with_deadline(
        &self,
        ctx: &mut MiddlewareContext,
        call: Call,
        handler: &Arc<dyn RpcHandler>,
        deadline: Duration,
    ) -> Reply {
        let handler = Arc::clone(handler);
        self.process(ctx, call, move |ctx, call| {
            let request_ctx = ctx.to_request_context();
            terminal(async move {
                match tokio::time::timeout(deadline, handler.call(&request_ctx, call)).await {
                    Ok(result) => result.into(),
                    Err(_) => {
                        tracing::warn!(
                            method = request_ctx.method().unwrap_or_default(),
                            request_id = %request_ctx.request_id(),
                            ?deadline,
                            "handler exceeded request timeout"
                        );
                        Reply::error(Code::DeadlineExceeded, "request timeout exceeded")
                    }
                }
            })
        })
        .await
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Call) -> BoxFuture<'static, Reply> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for middleware in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Names of the interceptor stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|mw| mw.name()).collect()
    }

    /// Returns the number of interceptor stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an interceptor. Earlier stages wrap later ones.
    #[must_use]
    pub fn add_stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Appends an already-shared interceptor.
    #[must_use]
    pub fn add_boxed(mut self, middleware: BoxedMiddleware) -> Self {
        self.stages.push(middleware);
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use gantry_core::{CallError, Code, FnHandler, RequestContext};
    use std::sync::Mutex;

    struct OrderTracking {
        name: &'static str,
        order: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for OrderTracking {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut MiddlewareContext,
            call: Call,
            next: Next<'a>,
        ) -> BoxFuture<'a, Reply> {
            Box::pin(async move {
                self.order.lock().unwrap().push(format!("in:{}", self.name));
                let reply = next.run(ctx, call).await;
                self.order.lock().unwrap().push(format!("out:{}", self.name));
                reply
            })
        }
    }

    #[tokio::test]
    async fn test_pipeline_is_an_onion() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .add_stage(OrderTracking { name: "first", order: order.clone() })
            .add_stage(OrderTracking { name: "second", order: order.clone() })
            .build();

        let mut ctx = MiddlewareContext::new();
        let log = order.clone();
        let reply = pipeline
            .process(&mut ctx, Call::new("/a.B/C", ""), move |_ctx, _call| {
                log.lock().unwrap().push("handler".to_string());
                terminal(async { Reply::ok("OK") })
            })
            .await;

        assert!(reply.is_ok());
        assert_eq!(
            *order.lock().unwrap(),
            vec!["in:first", "in:second", "handler", "out:second", "out:first"]
        );
        assert_eq!(pipeline.stage_names(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_empty_pipeline_invokes_handler() {
        let pipeline = Pipeline::builder().build();
        assert_eq!(pipeline.stage_count(), 0);

        let handler: Arc<dyn RpcHandler> = Arc::new(FnHandler::new(
            |ctx: RequestContext, call: Call| async move {
                assert_eq!(ctx.method(), Some("/a.B/Echo"));
                Ok::<Bytes, CallError>(call.into_payload())
            },
        ));
        let call = Call::new("/a.B/Echo", "ping");
        let mut ctx = MiddlewareContext::for_call(&call);
        let reply = pipeline.invoke(&mut ctx, call, &handler).await;
        assert_eq!(reply.payload().as_ref(), b"ping");
    }

    #[tokio::test]
    async fn test_handler_error_becomes_reply() {
        let handler: Arc<dyn RpcHandler> = Arc::new(FnHandler::new(
            |_ctx: RequestContext, _call: Call| async move {
                Err::<Bytes, CallError>(CallError::not_found("no such greeting"))
            },
        ));
        let call = Call::new("/a.B/C", "");
        let mut ctx = MiddlewareContext::for_call(&call);
        let reply = Pipeline::default().invoke(&mut ctx, call, &handler).await;
        assert_eq!(reply.code(), Code::NotFound);
        assert_eq!(reply.message(), Some("no such greeting"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_only_the_handler() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .add_stage(OrderTracking { name: "logging", order: order.clone() })
            .build();

        let handler: Arc<dyn RpcHandler> = Arc::new(FnHandler::new(
            |_ctx: RequestContext, _call: Call| async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok::<Bytes, CallError>(Bytes::from_static(b"late"))
            },
        ));
        let call = Call::new("/a.B/Slow", "");
        let mut ctx = MiddlewareContext::for_call(&call);
        let reply = pipeline
            .invoke_with_deadline(&mut ctx, call, &handler, Duration::from_secs(1))
            .await;

        assert_eq!(reply.code(), Code::DeadlineExceeded);
        assert_eq!(*order.lock().unwrap(), vec!["in:logging", "out:logging"]);
    }

    #[tokio::test]
    async fn test_deadline_not_reached() {
        let handler: Arc<dyn RpcHandler> = Arc::new(FnHandler::new(
            |_ctx: RequestContext, call: Call| async move {
                Ok::<Bytes, CallError>(call.into_payload())
            },
        ));
        let call = Call::new("/a.B/Echo", "fast");
        let mut ctx = MiddlewareContext::for_call(&call);
        let reply = Pipeline::default()
            .invoke_with_deadline(&mut ctx, call, &handler, Duration::from_secs(5))
            .await;
        assert_eq!(reply.payload().as_ref(), b"fast");
    }
}
