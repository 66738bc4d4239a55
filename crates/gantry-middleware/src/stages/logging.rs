//! Logging stage.
//!
//! Emits one structured record per call through the injected [`Logger`],
//! including calls that inner stages rejected. When a database was acquired
//! and the service is not in debug mode, building the stage also installs a
//! [`DbLogAdapter`] so database events arrive as structured records too.

use crate::catalog::PipelineUnit;
use crate::compose::Dependencies;
use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use gantry_config::Configuration;
use gantry_core::{Call, Code, Reply};
use gantry_telemetry::logging::fields;
use gantry_telemetry::{DbLogAdapter, Logger, StructuredRecord};
use std::sync::Arc;
use tracing::Level;

/// Message of every per-call record.
pub const CALL_RECORD_MESSAGE: &str = "rpc call";

/// Interceptor that logs every call.
#[derive(Debug, Clone)]
pub struct LoggingStage {
    logger: Logger,
}

impl LoggingStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

pub(crate) fn build(config: &Configuration, deps: &Dependencies) -> Result<PipelineUnit, String> {
    let debug = config
        .get_bool("debug")
        .map_err(|e| e.to_string())?
        .unwrap_or(false);

    if let Some(database) = deps.database() {
        if debug {
            tracing::debug!("debug mode, database keeps verbose statement logging");
        } else {
            database.set_log_sink(Arc::new(DbLogAdapter::new(
                deps.logger().clone(),
                Arc::clone(deps.log_translator()),
            )));
            tracing::debug!("database log translation installed");
        }
    }

    Ok(PipelineUnit::Interceptor(Arc::new(LoggingStage::new(
        deps.logger().clone(),
    ))))
}

/// Record level for a final status code.
#[must_use]
pub const fn level_for(code: Code) -> Level {
    match code {
        Code::Ok
        | Code::Cancelled
        | Code::InvalidArgument
        | Code::NotFound
        | Code::AlreadyExists
        | Code::Unauthenticated => Level::INFO,
        Code::DeadlineExceeded
        | Code::PermissionDenied
        | Code::ResourceExhausted
        | Code::FailedPrecondition
        | Code::Aborted
        | Code::OutOfRange
        | Code::Unavailable => Level::WARN,
        Code::Unknown | Code::Unimplemented | Code::Internal | Code::DataLoss => Level::ERROR,
    }
}

impl Middleware for LoggingStage {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        call: Call,
        next: Next<'a>,
    ) -> BoxFuture<'a, Reply> {
        Box::pin(async move {
            let service = call.service().to_string();
            let method = call.method_name().to_string();

            let reply = next.run(ctx, call).await;

            let code = reply.code();
            let record = StructuredRecord::new(level_for(code), CALL_RECORD_MESSAGE)
                .with_field(fields::REQUEST_ID, ctx.request_id().to_string())
                .with_optional_field(fields::TRACE_ID, ctx.trace_id())
                .with_optional_field(fields::SPAN_ID, ctx.span_id())
                .with_field(fields::RPC_SERVICE, service)
                .with_field(fields::RPC_METHOD, method)
                .with_field(fields::RPC_CODE, code.as_str())
                .with_field(fields::DURATION_MS, ctx.elapsed().as_secs_f64() * 1000.0)
                .with_field(fields::CALLER, ctx.identity().log_id())
                .with_optional_field(fields::ERROR, reply.message().filter(|_| !reply.is_ok()))
                .with_optional_field(fields::REJECTED_BY, ctx.rejected_by());
            self.logger.log(&record);
            reply
        })
    }
}
