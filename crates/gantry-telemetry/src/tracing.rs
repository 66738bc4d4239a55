//! OpenTelemetry distributed tracing.
//!
//! The tracing stage never touches the global tracer provider. It receives a
//! [`TracerClient`] built by a [`TracerFactory`] during resource acquisition
//! and owned (and eventually shut down) by the lifecycle coordinator.
//!
//! Without a `[tracing]` section the client is local: spans get real trace
//! and span IDs and W3C context still propagates, but nothing is exported.
//!
//! # Example
//!
//! ```rust,ignore
//! use gantry_telemetry::tracing::{OtlpTracerFactory, TracerFactory};
//!
//! let client = OtlpTracerFactory.create(config.section()?.as_ref(), "srv-greeter")?;
//! // ... serve ...
//! client.shutdown()?;
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use gantry_config::TracingSection;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::Resource;
use std::fmt;
use std::sync::Arc;

/// A tracing client: a tracer plus the provider that owns its pipeline.
#[derive(Clone)]
pub struct TracerClient {
    provider: TracerProvider,
    tracer: Tracer,
    service_name: Arc<str>,
    exporting: bool,
}

impl TracerClient {
    /// A client that creates spans but exports nothing.
    #[must_use]
    pub fn local(service_name: &str) -> Self {
        let provider = TracerProvider::builder()
            .with_sampler(Sampler::AlwaysOn)
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(service_resource(service_name, None))
            .build();
        Self::from_provider(provider, service_name, false)
    }

    /// Wraps an already-built provider.
    #[must_use]
    pub fn from_provider(provider: TracerProvider, service_name: &str, exporting: bool) -> Self {
        let tracer = provider.tracer(service_name.to_string());
        Self {
            provider,
            tracer,
            service_name: Arc::from(service_name),
            exporting,
        }
    }

    /// The tracer spans are started from.
    pub const fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Service name attached to every span.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Whether spans leave the process.
    pub const fn is_exporting(&self) -> bool {
        self.exporting
    }

    /// Extracts the caller's W3C trace context from call metadata.
    pub fn extract_parent(&self, headers: &http::HeaderMap) -> Context {
        TraceContextPropagator::new().extract(&HeaderExtractor(headers))
    }

    /// Injects `cx` as W3C trace context into outgoing metadata.
    pub fn inject(&self, cx: &Context, headers: &mut http::HeaderMap) {
        TraceContextPropagator::new().inject_context(cx, &mut HeaderInjector(headers));
    }

    /// Flushes pending spans and shuts the pipeline down.
    ///
    /// May block while the exporter drains; call it off the async executor.
    pub fn shutdown(&self) -> TelemetryResult<()> {
        for result in self.provider.force_flush() {
            result.map_err(|e| TelemetryError::TracingShutdown(e.to_string()))?;
        }
        self.provider
            .shutdown()
            .map_err(|e| TelemetryError::TracingShutdown(e.to_string()))
    }
}

impl fmt::Debug for TracerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerClient")
            .field("service_name", &self.service_name)
            .field("exporting", &self.exporting)
            .finish_non_exhaustive()
    }
}

/// Builds the tracing client during resource acquisition.
pub trait TracerFactory: Send + Sync {
    /// Creates a client for `service_name` from the optional `[tracing]` section.
    fn create(
        &self,
        section: Option<&TracingSection>,
        service_name: &str,
    ) -> TelemetryResult<TracerClient>;
}

/// Default factory: OTLP over gRPC when an endpoint is configured, a local
/// client otherwise.
///
/// Must be called from within a Tokio runtime when exporting, since the batch
/// processor runs as a background task.
#[derive(Debug, Default, Clone, Copy)]
pub struct OtlpTracerFactory;

impl TracerFactory for OtlpTracerFactory {
    fn create(
        &self,
        section: Option<&TracingSection>,
        service_name: &str,
    ) -> TelemetryResult<TracerClient> {
        let Some(section) = section.filter(|s| s.enabled) else {
            return Ok(TracerClient::local(service_name));
        };
        let Some(endpoint) = section.otlp_endpoint.as_deref() else {
            return Ok(TracerClient::local(service_name));
        };

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;

        let sampler = if section.sample_ratio >= 1.0 {
            Sampler::AlwaysOn
        } else if section.sample_ratio <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::TraceIdRatioBased(section.sample_ratio)
        };

        let provider = TracerProvider::builder()
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
            .with_sampler(Sampler::ParentBased(Box::new(sampler)))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(service_resource(service_name, section.environment.as_deref()))
            .build();

        tracing::info!(endpoint, service = service_name, "OTLP span export enabled");
        Ok(TracerClient::from_provider(provider, service_name, true))
    }
}

fn service_resource(service_name: &str, environment: Option<&str>) -> Resource {
    let mut attributes = vec![
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
            service_name.to_string(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ),
    ];
    if let Some(environment) = environment {
        attributes.push(KeyValue::new("deployment.environment", environment.to_string()));
    }
    Resource::new(attributes)
}

/// HTTP header extractor for `http::HeaderMap`.
pub struct HeaderExtractor<'a>(pub &'a http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(http::HeaderName::as_str).collect()
    }
}

/// HTTP header injector for `http::HeaderMap`.
pub struct HeaderInjector<'a>(pub &'a mut http::HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(val)) = (
            http::header::HeaderName::try_from(key),
            http::header::HeaderValue::try_from(&value),
        ) {
            self.0.insert(name, val);
        }
    }
}
