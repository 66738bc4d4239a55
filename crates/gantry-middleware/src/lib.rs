//! # Gantry Middleware
//!
//! The interceptor pipeline every call runs through, and the catalog that
//! decides which stages a service gets.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Call → tracing → logging → payload_audit → metrics → auth → Handler
//!                                                               ↓
//! Reply ← tracing ← logging ← payload_audit ← metrics ← auth ←──┘
//! ```
//!
//! | Rank | Stage | Included when |
//! |------|-------|---------------|
//! | 0 | `tracing` | always |
//! | 1 | `logging` | always |
//! | 2 | `payload_audit` | `log.access` is configured |
//! | 3 | `metrics` | `metrics` is configured |
//! | 4 | `keepalive` | `keepalive` is configured (transport option) |
//! | 5 | `auth` | `auth` is configured |
//!
//! The order is fixed by rank and never depends on how the configuration
//! document is laid out. Tracing and logging see every call, including calls
//! the auth stage rejects; payload audit and metrics skip rejected calls.
//!
//! ## Example
//!
//! ```
//! use gantry_config::Configuration;
//! use gantry_middleware::{compose, Dependencies};
//! use gantry_telemetry::{Logger, TracerClient};
//!
//! let config = Configuration::from_toml(r#"
//!     appname = "greeter"
//!     listen = ":9090"
//! "#).unwrap();
//! let deps = Dependencies::new("greeter", TracerClient::local("greeter"), Logger::new("greeter"));
//!
//! let composed = compose(&config, &deps).unwrap();
//! assert_eq!(composed.stage_names(), vec!["tracing", "logging"]);
//! ```

#![doc(html_root_url = "https://docs.rs/gantry-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod catalog;
pub mod compose;
pub mod context;
pub mod middleware;
pub mod pipeline;
pub mod stages;

pub use catalog::{PipelineUnit, Stage, StageDescriptor, TransportOptions, CATALOG};
pub use compose::{compose, ComposedPipeline, Dependencies};
pub use context::MiddlewareContext;
pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{BoxedMiddleware, Pipeline, PipelineBuilder};
pub use stages::{AlwaysAudit, AuditDecider, MethodAllowList, SpanRecord};
