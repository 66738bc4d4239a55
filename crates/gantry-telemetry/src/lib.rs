//! Observability for Gantry services.
//!
//! Nothing in this crate installs process-wide state except
//! [`init_logging`], which the binary calls once. Everything the request
//! pipeline uses is a value handed to it explicitly:
//!
//! - [`Logger`] - structured per-call records, fanned out to [`RecordSink`]s
//! - [`DbLogAdapter`] - turns raw database log events into structured records
//! - [`TracerClient`] / [`TracerFactory`] - OpenTelemetry spans with OTLP export
//! - [`CallMetrics`] - Prometheus counters and latency histograms
//! - [`AuditSink`] - JSON-lines payload audit file
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `<ns>_server_started_total` | Counter | `method` | Calls admitted to the handler |
//! | `<ns>_server_handled_total` | Counter | `method`, `code` | Calls completed |
//! | `<ns>_server_handling_seconds` | Histogram | `method` | Call latency |
//! | `<ns>_server_in_flight` | Gauge | - | Calls being processed |

#![warn(missing_docs)]

pub mod audit;
pub mod dblog;
pub mod error;
pub mod logger;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use audit::{AuditEntry, AuditSink};
pub use dblog::{DbLogAdapter, LogTranslator, SqlLogTranslator};
pub use error::TelemetryError;
pub use logger::{Logger, MemorySink, RecordSink, StructuredRecord};
pub use logging::{init_logging, LogConfig};
pub use metrics::{CallMetrics, InFlightGuard};
pub use tracing::{OtlpTracerFactory, TracerClient, TracerFactory};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
