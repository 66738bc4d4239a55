//! Prometheus call metrics.
//!
//! [`CallMetrics`] owns its own Prometheus recorder instead of installing a
//! global one, so several services (or tests) can live in one process. All
//! recording happens through `metrics::with_local_recorder`.
//!
//! # Example
//!
//! ```
//! use gantry_config::MetricsSection;
//! use gantry_core::Code;
//! use gantry_telemetry::CallMetrics;
//! use std::time::Duration;
//!
//! let metrics = CallMetrics::new(&MetricsSection::default()).unwrap();
//! metrics.call_started("/helloworld.Greeter/SayHello");
//! metrics.call_finished("/helloworld.Greeter/SayHello", Code::Ok, Duration::from_millis(4));
//! assert!(metrics.render().contains("gantry_server_handled_total"));
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use gantry_config::MetricsSection;
use gantry_core::Code;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Request counters, latency and in-flight gauge for one service.
#[derive(Clone)]
pub struct CallMetrics {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
    started: String,
    handled: String,
    latency: String,
    in_flight: String,
}

impl CallMetrics {
    /// Builds a recorder from the `[metrics]` section.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::MetricsInit` if the buckets are rejected.
    pub fn new(section: &MetricsSection) -> TelemetryResult<Self> {
        let mut builder = PrometheusBuilder::new();
        if let Some(buckets) = &section.buckets {
            builder = builder
                .set_buckets(buckets)
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        }
        let recorder = builder.build_recorder();
        let handle = recorder.handle();
        let ns = &section.namespace;

        let metrics = Self {
            recorder: Arc::new(recorder),
            handle,
            started: format!("{ns}_server_started_total"),
            handled: format!("{ns}_server_handled_total"),
            latency: format!("{ns}_server_handling_seconds"),
            in_flight: format!("{ns}_server_in_flight"),
        };
        metrics.describe();
        Ok(metrics)
    }

    fn describe(&self) {
        metrics::with_local_recorder(&*self.recorder, || {
            describe_counter!(self.started.clone(), "Total number of calls admitted");
            describe_counter!(
                self.handled.clone(),
                "Total number of calls completed, by status code"
            );
            describe_histogram!(self.latency.clone(), "Call latency in seconds");
            describe_gauge!(self.in_flight.clone(), "Number of calls currently being processed");
        });
    }

    /// Records a received call.
    pub fn call_started(&self, method: &str) {
        metrics::with_local_recorder(&*self.recorder, || {
            counter!(self.started.clone(), "method" => method.to_string()).increment(1);
        });
    }

    /// Raises the in-flight gauge until the returned guard is dropped.
    #[must_use]
    pub fn in_flight(&self) -> InFlightGuard {
        self.adjust_in_flight(1.0);
        InFlightGuard {
            metrics: self.clone(),
        }
    }

    fn adjust_in_flight(&self, delta: f64) {
        metrics::with_local_recorder(&*self.recorder, || {
            gauge!(self.in_flight.clone()).increment(delta);
        });
    }

    /// Records a completed call.
    pub fn call_finished(&self, method: &str, code: Code, elapsed: Duration) {
        metrics::with_local_recorder(&*self.recorder, || {
            counter!(
                self.handled.clone(),
                "method" => method.to_string(),
                "code" => code.as_str()
            )
            .increment(1);
            histogram!(self.latency.clone(), "method" => method.to_string())
                .record(elapsed.as_secs_f64());
        });
    }

    /// Renders everything in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Handle for rendering from elsewhere (the scrape endpoint).
    #[must_use]
    pub fn handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }
}

/// Keeps a call counted in the in-flight gauge.
pub struct InFlightGuard {
    metrics: CallMetrics,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.adjust_in_flight(-1.0);
    }
}

impl fmt::Debug for CallMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallMetrics")
            .field("handled", &self.handled)
            .finish_non_exhaustive()
    }
}
