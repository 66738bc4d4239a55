//! Metrics stage.
//!
//! Counts calls and observes their latency into a [`CallMetrics`] recorder
//! owned by the stage. A call is counted as started, and held in the
//! in-flight gauge, from the moment every stage has admitted it. Calls an
//! inner stage rejects never appear in any series.

use crate::catalog::PipelineUnit;
use crate::compose::Dependencies;
use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use gantry_config::{Configuration, MetricsSection};
use gantry_core::{Call, Reply};
use gantry_telemetry::{CallMetrics, InFlightGuard};
use std::sync::Arc;

/// Interceptor that records call metrics.
#[derive(Debug, Clone)]
pub struct MetricsStage {
    metrics: CallMetrics,
}

impl MetricsStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(metrics: CallMetrics) -> Self {
        Self { metrics }
    }
}

pub(crate) fn build(config: &Configuration, _deps: &Dependencies) -> Result<PipelineUnit, String> {
    let section = config
        .section::<MetricsSection>()
        .map_err(|e| e.to_string())?
        .unwrap_or_default();
    let metrics = CallMetrics::new(&section).map_err(|e| e.to_string())?;
    let scrape = metrics.handle();

    Ok(PipelineUnit::Metered {
        interceptor: Arc::new(MetricsStage::new(metrics)),
        scrape,
    })
}

impl Middleware for MetricsStage {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        call: Call,
        next: Next<'a>,
    ) -> BoxFuture<'a, Reply> {
        Box::pin(async move {
            let method = call.method().to_string();
            let metrics = self.metrics.clone();
            let admitted_method = method.clone();
            ctx.on_admitted(move |ctx| {
                metrics.call_started(&admitted_method);
                ctx.set_extension(metrics.in_flight());
            });

            let reply = next.run(ctx, call).await;

            if let Some(in_flight) = ctx.remove_extension::<InFlightGuard>() {
                drop(in_flight);
                self.metrics.call_finished(&method, reply.code(), ctx.elapsed());
            }
            reply
        })
    }
}
