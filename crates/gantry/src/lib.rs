//! # Gantry
//!
//! **Configuration-driven bootstrap for RPC services**
//!
//! Gantry turns one configuration document and one handler into a running
//! service:
//!
//! - acquires the configured resources (database, tracing client, audit log)
//! - composes the interceptor pipeline from the sections that are present
//! - binds the listener and publishes the service to discovery
//! - on shutdown drains in-flight calls and releases resources in reverse
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gantry::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new()
//!         .with_defaults()
//!         .with_file("greeter.toml")?
//!         .with_env_prefix("GANTRY")
//!         .load()?;
//!
//!     let handler = FnHandler::new(|_ctx, call: Call| async move { Ok(call.into_payload()) });
//!
//!     Bootstrap::new(config, handler)
//!         .run(wait_for_os_signal())
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Pipeline
//!
//! Stages are included when their section is present and always run in the
//! same order, whatever order the document lists them in:
//!
//! ```text
//! Call → tracing → logging → payload_audit → metrics → auth → Handler
//!                                                              ↓
//! Reply ← tracing ← logging ← payload_audit ← metrics ← auth ←─┘
//! ```
//!
//! `keepalive` has no interceptor; it only sets connection options.

#![doc(html_root_url = "https://docs.rs/gantry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub use gantry_config as config;
pub use gantry_core as core;
pub use gantry_middleware as middleware;
pub use gantry_server as server;
pub use gantry_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// ```rust
/// use gantry::prelude::*;
/// ```
pub mod prelude {
    pub use gantry_config::{ConfigLoader, Configuration, ServiceSettings};
    pub use gantry_core::{
        BootstrapError, BootstrapResult, BoxFuture, Call, CallError, CallerIdentity, Code,
        Database, DatabaseConnector, DatabaseHandle, FnHandler, Registry, RegistrationRecord,
        Reply, RequestContext, RequestId, ResourceKind, RpcHandler,
    };
    pub use gantry_middleware::{AuditDecider, MethodAllowList, Stage};
    pub use gantry_server::{
        wait_for_os_signal, Bootstrap, LifecycleState, RunningService, ShutdownReport,
        ShutdownSignal,
    };
    pub use gantry_telemetry::{init_logging, LogConfig, Logger, TracerFactory};
}
