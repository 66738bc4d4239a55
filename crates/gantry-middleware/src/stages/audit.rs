//! Payload audit stage.
//!
//! Writes each audited call's request and response payloads to the
//! [`AuditSink`]. Which calls are audited is up to an [`AuditDecider`]:
//! every call by default, or the `log.access.methods` allow-list when set.
//! Calls rejected by an inner stage never reached the handler and are not
//! audited.

use crate::catalog::PipelineUnit;
use crate::compose::Dependencies;
use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use gantry_config::{AccessLogSection, Configuration};
use gantry_core::{Call, Reply};
use gantry_telemetry::{AuditEntry, AuditSink};
use std::collections::HashSet;
use std::sync::Arc;

/// Decides whether a call's payloads are captured.
pub trait AuditDecider: Send + Sync {
    /// Returns `true` to audit a call to `method`.
    fn should_audit(&self, method: &str) -> bool;
}

/// Audits every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAudit;

impl AuditDecider for AlwaysAudit {
    fn should_audit(&self, _method: &str) -> bool {
        true
    }
}

/// Audits only the listed methods.
#[derive(Debug, Clone)]
pub struct MethodAllowList {
    methods: HashSet<String>,
}

impl MethodAllowList {
    /// Creates an allow-list of full method names.
    pub fn new(methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            methods: methods.into_iter().map(Into::into).collect(),
        }
    }
}

impl AuditDecider for MethodAllowList {
    fn should_audit(&self, method: &str) -> bool {
        self.methods.contains(method)
    }
}

/// Interceptor that audits call payloads.
#[derive(Clone)]
pub struct PayloadAuditStage {
    sink: AuditSink,
    decider: Arc<dyn AuditDecider>,
}

impl PayloadAuditStage {
    /// Creates the stage.
    pub fn new(sink: AuditSink, decider: Arc<dyn AuditDecider>) -> Self {
        Self { sink, decider }
    }
}

pub(crate) fn build(config: &Configuration, deps: &Dependencies) -> Result<PipelineUnit, String> {
    let section = config
        .section::<AccessLogSection>()
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "log.access section is missing".to_string())?;
    let sink = deps
        .audit_sink()
        .cloned()
        .ok_or_else(|| "audit sink was not acquired".to_string())?;

    let decider: Arc<dyn AuditDecider> = match (deps.audit_decider(), section.methods) {
        (Some(decider), _) => Arc::clone(decider),
        (None, Some(methods)) => Arc::new(MethodAllowList::new(methods)),
        (None, None) => Arc::new(AlwaysAudit),
    };

    Ok(PipelineUnit::Interceptor(Arc::new(PayloadAuditStage::new(
        sink, decider,
    ))))
}

impl Middleware for PayloadAuditStage {
    fn name(&self) -> &'static str {
        "payload_audit"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        call: Call,
        next: Next<'a>,
    ) -> BoxFuture<'a, Reply> {
        Box::pin(async move {
            if !self.decider.should_audit(call.method()) {
                return next.run(ctx, call).await;
            }

            let method = call.method().to_string();
            let request = call.payload().clone();
            let reply = next.run(ctx, call).await;

            if let Some(stage) = ctx.rejected_by() {
                tracing::debug!(method = %method, stage, "call rejected, not audited");
                return reply;
            }

            let entry = AuditEntry {
                timestamp: chrono::Utc::now(),
                method,
                request_id: ctx.request_id().to_string(),
                trace_id: ctx.trace_id().map(str::to_string),
                caller: ctx.identity().log_id(),
                code: reply.code(),
                duration_ms: ctx.elapsed().as_secs_f64() * 1000.0,
                request: self.sink.render_payload(&request),
                response: self.sink.render_payload(reply.payload()),
            };
            if let Err(e) = self.sink.record(&entry) {
                tracing::warn!(error = %e, "failed to write audit record");
            }
            reply
        })
    }
}
