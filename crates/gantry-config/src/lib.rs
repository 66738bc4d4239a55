//! Configuration for Gantry services.
//!
//! A service is described by one hierarchical document. Top-level keys carry
//! the service settings, and optional sections switch pipeline stages and
//! resources on. Absence of a section means "skip", never "error".
//!
//! - [`Configuration`] - the immutable document with dotted-path lookup
//! - [`ConfigLoader`] - layered loading (defaults → files → environment)
//! - [`ServiceSettings`] - `appname`, `listen`, `debug`, `registryListen`, timeouts
//! - [`schema`] - typed, strictly-validated stage sections
//!
//! # Example
//!
//! ```no_run
//! use gantry_config::ConfigLoader;
//!
//! # fn main() -> Result<(), gantry_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_file("greeter.toml")?
//!     .with_env_prefix("GANTRY")
//!     .load()?;
//!
//! println!("listening on {}", config.settings()?.listen);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! appname = "greeter"
//! listen = ":9090"
//! debug = false
//! registryListen = "10.0.0.5:9090"
//! shutdownTimeout = 30
//!
//! [db.default]
//! dialect = "memory"
//!
//! [log.access]
//! path = "/var/log/greeter/access.log"
//!
//! [metrics]
//! namespace = "greeter"
//!
//! [keepalive]
//! idle_timeout_secs = 300
//!
//! [tracing]
//! otlp_endpoint = "http://localhost:4317"
//! sample_ratio = 0.25
//! ```

#![doc(html_root_url = "https://docs.rs/gantry-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
pub mod schema;

pub use config::{Configuration, ServiceSettings};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    AccessLogSection, AuthSection, Credential, KeepAliveSection, MetricsSection, Section,
    TracingSection,
};
