//! Pipeline stages, outermost first.
//!
//! 0. [`tracing`] - server span per call
//! 1. [`logging`] - structured record per call, DB log translation
//! 2. [`audit`] - request/response payload audit
//! 3. [`metrics`] - Prometheus counters and latency
//! 4. [`keepalive`] - connection keep-alive (transport option)
//! 5. [`auth`] - bearer credential check

pub mod audit;
pub mod auth;
pub mod keepalive;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use audit::{AlwaysAudit, AuditDecider, MethodAllowList, PayloadAuditStage};
pub use auth::AuthStage;
pub use logging::LoggingStage;
pub use metrics::MetricsStage;
pub use tracing::{SpanRecord, TracingStage};
