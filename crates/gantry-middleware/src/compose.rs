//! Pipeline composition.
//!
//! [`compose`] walks the [`CATALOG`] once in rank order. Stages whose
//! predicate rejects the configuration are skipped; the first builder error
//! aborts composition and names the stage.

use crate::catalog::{PipelineUnit, Stage, TransportOptions, CATALOG};
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::stages::audit::AuditDecider;
use gantry_config::Configuration;
use gantry_core::{BootstrapError, BootstrapResult, DatabaseHandle};
use gantry_telemetry::{AuditSink, LogTranslator, Logger, SqlLogTranslator, TracerClient};
use metrics_exporter_prometheus::PrometheusHandle;
use std::fmt;
use std::sync::Arc;

/// Everything stage builders may need beyond the configuration.
///
/// Resources are acquired by the lifecycle coordinator and passed in here;
/// stages never reach for process-wide state.
#[derive(Clone)]
pub struct Dependencies {
    service_name: String,
    tracer: TracerClient,
    logger: Logger,
    database: Option<DatabaseHandle>,
    audit_sink: Option<AuditSink>,
    audit_decider: Option<Arc<dyn AuditDecider>>,
    log_translator: Arc<dyn LogTranslator>,
}

impl Dependencies {
    /// Dependencies with the always-present resources.
    pub fn new(service_name: impl Into<String>, tracer: TracerClient, logger: Logger) -> Self {
        Self {
            service_name: service_name.into(),
            tracer,
            logger,
            database: None,
            audit_sink: None,
            audit_decider: None,
            log_translator: Arc::new(SqlLogTranslator),
        }
    }

    /// Adds the acquired database.
    #[must_use]
    pub fn with_database(mut self, database: DatabaseHandle) -> Self {
        self.database = Some(database);
        self
    }

    /// Adds the opened audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: AuditSink) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Overrides which calls are audited.
    #[must_use]
    pub fn with_audit_decider(mut self, decider: Arc<dyn AuditDecider>) -> Self {
        self.audit_decider = Some(decider);
        self
    }

    /// Overrides how database log events are translated.
    #[must_use]
    pub fn with_log_translator(mut self, translator: Arc<dyn LogTranslator>) -> Self {
        self.log_translator = translator;
        self
    }

    /// Service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Tracing client.
    pub const fn tracer(&self) -> &TracerClient {
        &self.tracer
    }

    /// Structured logger.
    pub const fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Database, when one was acquired.
    pub const fn database(&self) -> Option<&DatabaseHandle> {
        self.database.as_ref()
    }

    /// Audit sink, when one was opened.
    pub const fn audit_sink(&self) -> Option<&AuditSink> {
        self.audit_sink.as_ref()
    }

    /// Explicit audit decider, if any.
    pub const fn audit_decider(&self) -> Option<&Arc<dyn AuditDecider>> {
        self.audit_decider.as_ref()
    }

    /// Database log translator.
    pub const fn log_translator(&self) -> &Arc<dyn LogTranslator> {
        &self.log_translator
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("service_name", &self.service_name)
            .field("tracer", &self.tracer)
            .field("database", &self.database.is_some())
            .field("audit_sink", &self.audit_sink)
            .finish_non_exhaustive()
    }
}

/// The result of composition.
pub struct ComposedPipeline {
    stages: Vec<Stage>,
    pipeline: Pipeline,
    transport: TransportOptions,
    scrape: Option<PrometheusHandle>,
}

impl ComposedPipeline {
    /// Included stages, outermost first.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Names of the included stages, outermost first.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Whether `stage` was included.
    pub fn contains(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    /// The interceptor pipeline.
    pub const fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Connection settings.
    pub const fn transport(&self) -> TransportOptions {
        self.transport
    }

    /// Metrics scrape handle, when the metrics stage was included.
    pub const fn scrape_handle(&self) -> Option<&PrometheusHandle> {
        self.scrape.as_ref()
    }

    /// Splits into the pieces the server needs.
    pub fn into_parts(self) -> (Pipeline, TransportOptions, Option<PrometheusHandle>) {
        (self.pipeline, self.transport, self.scrape)
    }
}

impl fmt::Debug for ComposedPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposedPipeline")
            .field("stages", &self.stage_names())
            .field("transport", &self.transport)
            .field("metrics", &self.scrape.is_some())
            .finish()
    }
}

/// Builds the pipeline the configuration asks for.
///
/// # Errors
///
/// Returns `BootstrapError::Configuration` naming the first stage whose
/// builder failed. No partial pipeline is returned.
pub fn compose(config: &Configuration, deps: &Dependencies) -> BootstrapResult<ComposedPipeline> {
    let mut builder = PipelineBuilder::new();
    let mut stages = Vec::new();
    let mut transport = TransportOptions::default();
    let mut scrape = None;

    for descriptor in &CATALOG {
        if !(descriptor.applies)(config) {
            tracing::debug!(stage = descriptor.name(), "stage not configured, skipping");
            continue;
        }

        let unit = (descriptor.build)(config, deps)
            .map_err(|message| BootstrapError::stage(descriptor.name(), message))?;

        builder = match unit {
            PipelineUnit::Interceptor(interceptor) => builder.add_boxed(interceptor),
            PipelineUnit::Metered {
                interceptor,
                scrape: handle,
            } => {
                scrape = Some(handle);
                builder.add_boxed(interceptor)
            }
            PipelineUnit::Transport(options) => {
                transport = options;
                builder
            }
        };
        stages.push(descriptor.stage);
    }

    let composed = ComposedPipeline {
        stages,
        pipeline: builder.build(),
        transport,
        scrape,
    };
    tracing::info!(
        service = deps.service_name(),
        stages = ?composed.stage_names(),
        "pipeline composed"
    );
    Ok(composed)
}
