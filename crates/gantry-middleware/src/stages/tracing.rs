//! Tracing stage.
//!
//! Opens one server span per call with the injected [`TracerClient`]. A W3C
//! `traceparent` in the call metadata makes the span a child of the caller's
//! span. The span's trace and span IDs are stored in the context, and the
//! span context is injected into the reply metadata.
//!
//! ## Span Attributes
//!
//! - `rpc.system` - always `gantry`
//! - `rpc.service` - `package.Service`
//! - `rpc.method` - `Method`
//! - `rpc.grpc.status_code` - numeric status code (added on completion)

use crate::catalog::PipelineUnit;
use crate::compose::Dependencies;
use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use gantry_config::Configuration;
use gantry_core::{Call, Code, Reply};
use gantry_telemetry::logging::fields;
use gantry_telemetry::TracerClient;
use opentelemetry::trace::{Span, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::KeyValue;
use std::sync::Arc;

/// The W3C Trace Context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// What the tracing stage recorded for a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanRecord {
    /// Span name (the full method).
    pub name: String,
    /// Trace ID (32 hex chars).
    pub trace_id: String,
    /// Span ID (16 hex chars).
    pub span_id: String,
    /// Whether the span continues a caller's trace.
    pub remote_parent: bool,
    /// Final status code.
    pub code: Code,
}

/// Interceptor that wraps each call in a server span.
#[derive(Debug, Clone)]
pub struct TracingStage {
    tracer: TracerClient,
}

impl TracingStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(tracer: TracerClient) -> Self {
        Self { tracer }
    }
}

pub(crate) fn build(_config: &Configuration, deps: &Dependencies) -> Result<PipelineUnit, String> {
    Ok(PipelineUnit::Interceptor(Arc::new(TracingStage::new(
        deps.tracer().clone(),
    ))))
}

impl Middleware for TracingStage {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        call: Call,
        next: Next<'a>,
    ) -> BoxFuture<'a, Reply> {
        Box::pin(async move {
            let parent = self.tracer.extract_parent(call.metadata());
            let remote_parent = parent.span().span_context().is_valid();

            let tracer = self.tracer.tracer();
            let mut span = tracer
                .span_builder(call.method().to_string())
                .with_kind(SpanKind::Server)
                .with_attributes(vec![
                    KeyValue::new("rpc.system", "gantry"),
                    KeyValue::new(fields::RPC_SERVICE, call.service().to_string()),
                    KeyValue::new(fields::RPC_METHOD, call.method_name().to_string()),
                ])
                .start_with_context(tracer, &parent);

            let span_context = span.span_context().clone();
            let trace_id = span_context.trace_id().to_string();
            let span_id = span_context.span_id().to_string();
            ctx.set_trace_id(trace_id.clone());
            ctx.set_span_id(span_id.clone());

            let name = call.method().to_string();
            let mut reply = next.run(ctx, call).await;

            span.set_attribute(KeyValue::new(
                "rpc.grpc.status_code",
                i64::from(reply.code() as u8),
            ));
            if !reply.is_ok() {
                span.set_status(Status::error(
                    reply.message().unwrap_or(reply.code().as_str()).to_string(),
                ));
            }
            span.end();

            let cx = parent.with_remote_span_context(span_context);
            self.tracer.inject(&cx, reply.metadata_mut());

            ctx.set_extension(SpanRecord {
                name,
                trace_id,
                span_id,
                remote_parent,
                code: reply.code(),
            });
            reply
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::middleware::terminal;

    const PARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    fn pipeline() -> Pipeline {
        Pipeline::builder()
            .add_stage(TracingStage::new(TracerClient::local("greeter")))
            .build()
    }

    #[tokio::test]
    async fn test_assigns_ids_and_records_span() {
        let call = Call::new("/helloworld.Greeter/SayHello", "");
        let mut ctx = MiddlewareContext::for_call(&call);
        let reply = pipeline()
            .process(&mut ctx, call, |ctx, _call| {
                assert!(ctx.trace_id().is_some());
                terminal(async { Reply::ok("hi") })
            })
            .await;

        let record = ctx.get_extension::<SpanRecord>().unwrap();
        assert_eq!(record.name, "/helloworld.Greeter/SayHello");
        assert_eq!(record.trace_id.len(), 32);
        assert_eq!(record.span_id.len(), 16);
        assert!(!record.remote_parent);
        assert_eq!(ctx.trace_id(), Some(record.trace_id.as_str()));

        let traceparent = reply.metadata().get(TRACEPARENT_HEADER).unwrap().to_str().unwrap();
        assert!(traceparent.contains(&record.trace_id));
        assert!(traceparent.contains(&record.span_id));
    }

    #[tokio::test]
    async fn test_continues_remote_trace() {
        let call = Call::new("/a.B/C", "").with_header(TRACEPARENT_HEADER, PARENT);
        let mut ctx = MiddlewareContext::for_call(&call);
        pipeline()
            .process(&mut ctx, call, |_ctx, _call| terminal(async { Reply::ok("") }))
            .await;

        let record = ctx.get_extension::<SpanRecord>().unwrap();
        assert!(record.remote_parent);
        assert_eq!(record.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_ne!(record.span_id, "b7ad6b7169203331");
    }

    #[tokio::test]
    async fn test_records_error_code() {
        let call = Call::new("/a.B/C", "");
        let mut ctx = MiddlewareContext::for_call(&call);
        pipeline()
            .process(&mut ctx, call, |_ctx, _call| {
                terminal(async { Reply::error(Code::Internal, "boom") })
            })
            .await;
        assert_eq!(ctx.get_extension::<SpanRecord>().unwrap().code, Code::Internal);
    }
}
