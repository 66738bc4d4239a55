//! # Gantry Server
//!
//! Server assembly and lifecycle coordination for Gantry services.
//!
//! - [`ServiceInstance`] - binds the listener and serves calls through the
//!   composed pipeline over HTTP/1.1
//! - [`ResourceHandle`] / [`ResourceStack`] - acquired dependencies and their
//!   reverse-order release
//! - [`Bootstrap`] / [`RunningService`] - the startup sequence, discovery
//!   registration and graceful shutdown
//! - [`ShutdownSignal`] - cloneable shutdown trigger shared by the listener and
//!   every connection
//!
//! ## Example
//!
//! ```rust,no_run
//! use gantry_config::Configuration;
//! use gantry_core::{Call, FnHandler};
//! use gantry_server::Bootstrap;
//!
//! # async fn demo() -> Result<(), gantry_core::BootstrapError> {
//! let config = Configuration::from_toml("appname = \"greeter\"\nlisten = \":9090\"\n")?;
//! let handler = FnHandler::new(|_ctx, call: Call| async move { Ok(call.into_payload()) });
//!
//! let running = Bootstrap::new(config, handler).start().await?;
//! println!("listening on {}", running.local_addr());
//!
//! let report = running.shutdown().await?;
//! assert!(!report.released().is_empty());
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/gantry-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod lifecycle;
pub mod resource;
pub mod server;
pub mod shutdown;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::ServerError;
pub use lifecycle::{Bootstrap, LifecycleState, RunningService, ShutdownReport, REGISTRATION_GRACE};
pub use resource::{acquire, AcquiredResources, Releasable, ResourceHandle, ResourceStack};
pub use server::{ServiceInstance, RPC_STATUS_HEADER};
pub use shutdown::{wait_for_os_signal, ConnectionToken, ConnectionTracker, ShutdownSignal};
