//! Server configuration.
//!
//! ```rust
//! use gantry_server::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .listen(":9090")
//!     .shutdown_timeout(Duration::from_secs(10))
//!     .build();
//!
//! assert_eq!(config.bind_address(), "0.0.0.0:9090");
//! ```

use gantry_config::ServiceSettings;
use std::time::Duration;

/// Default shutdown grace period in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default per-call timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Listener and timeout settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    listen: String,
    shutdown_timeout: Duration,
    request_timeout: Duration,
}

impl ServerConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Takes the listener settings from the service settings.
    #[must_use]
    pub fn from_settings(settings: &ServiceSettings) -> Self {
        Self {
            listen: settings.listen.clone(),
            shutdown_timeout: settings.shutdown_timeout,
            request_timeout: settings.request_timeout,
        }
    }

    /// Listen address as configured.
    #[must_use]
    pub fn listen(&self) -> &str {
        &self.listen
    }

    /// Address to bind. A bare `:port` binds every interface.
    #[must_use]
    pub fn bind_address(&self) -> String {
        normalize_listen(&self.listen)
    }

    /// How long in-flight calls may drain on shutdown.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Per-call deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    listen: String,
    shutdown_timeout: Duration,
    request_timeout: Duration,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:0".to_string(),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl ServerConfigBuilder {
    /// Sets the listen address.
    #[must_use]
    pub fn listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the per-call deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            listen: self.listen,
            shutdown_timeout: self.shutdown_timeout,
            request_timeout: self.request_timeout,
        }
    }
}

/// Expands `:port` to `0.0.0.0:port`; other addresses pass through.
#[must_use]
pub fn normalize_listen(listen: &str) -> String {
    let listen = listen.trim();
    if listen.starts_with(':') {
        format!("0.0.0.0{listen}")
    } else {
        listen.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_listen() {
        assert_eq!(normalize_listen(":9090"), "0.0.0.0:9090");
        assert_eq!(normalize_listen("127.0.0.1:9090"), "127.0.0.1:9090");
        assert_eq!(normalize_listen("localhost:0"), "localhost:0");
        assert_eq!(normalize_listen("[::1]:80"), "[::1]:80");
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_from_settings() {
        let settings = gantry_config::Configuration::from_toml(
            "appname = \"greeter\"\nlisten = \":7000\"\nshutdownTimeout = 5\n",
        )
        .unwrap()
        .settings()
        .unwrap();
        let config = ServerConfig::from_settings(&settings);
        assert_eq!(config.listen(), ":7000");
        assert_eq!(config.bind_address(), "0.0.0.0:7000");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
    }
}
