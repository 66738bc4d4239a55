//! Process-level log output.
//!
//! [`init_logging`] installs the global `tracing` subscriber. It is meant to be
//! called once by the binary; library code only emits events.
//!
//! # Example
//!
//! ```rust,ignore
//! use gantry_telemetry::logging::{LogConfig, init_logging};
//!
//! init_logging(&LogConfig::for_service("srv-greeter", false))?;
//! tracing::info!(listen = ":9090", "starting");
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive (e.g., "info", "gantry_server=debug").
    pub level: String,

    /// Whether to output JSON format.
    pub json_format: bool,

    /// Whether to include span open/close events.
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Service name reported in the startup line.
    pub service_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Human-readable output at debug level.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            json_format: false,
            span_events: true,
            file_line_info: true,
            service_name: "gantry".to_string(),
        }
    }

    /// JSON output at info level.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            span_events: false,
            file_line_info: false,
            service_name: "gantry".to_string(),
        }
    }

    /// Picks the preset from the service's `debug` flag.
    ///
    /// `RUST_LOG`, when set, replaces the preset level.
    #[must_use]
    pub fn for_service(service_name: &str, debug: bool) -> Self {
        let mut config = if debug {
            Self::development()
        } else {
            Self::production()
        };
        config.service_name = service_name.to_string();
        if let Ok(level) = std::env::var("RUST_LOG") {
            if !level.trim().is_empty() {
                config.level = level;
            }
        }
        config
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` for an invalid filter or when a
/// subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(true)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(true)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    tracing::debug!(service = %config.service_name, "logging initialised");
    Ok(())
}

/// Creates an env filter from a directive string.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}

/// Field names shared by every structured record.
pub mod fields {
    /// Request ID.
    pub const REQUEST_ID: &str = "request_id";
    /// Trace ID.
    pub const TRACE_ID: &str = "trace_id";
    /// Span ID.
    pub const SPAN_ID: &str = "span_id";
    /// RPC service (`package.Service`).
    pub const RPC_SERVICE: &str = "rpc.service";
    /// RPC method (`Method`).
    pub const RPC_METHOD: &str = "rpc.method";
    /// RPC status code.
    pub const RPC_CODE: &str = "rpc.code";
    /// Duration in milliseconds.
    pub const DURATION_MS: &str = "duration_ms";
    /// Caller identity (`log_id`).
    pub const CALLER: &str = "caller";
    /// Error message.
    pub const ERROR: &str = "error";
    /// Stage that short-circuited the call.
    pub const REJECTED_BY: &str = "rejected_by";
    /// Code location that issued a database statement.
    pub const SQL_SOURCE: &str = "sql.source";
    /// SQL statement text.
    pub const SQL_STATEMENT: &str = "sql.statement";
    /// Bound statement values.
    pub const SQL_VALUES: &str = "sql.values";
    /// Statement duration in milliseconds.
    pub const SQL_DURATION_MS: &str = "sql.duration_ms";
    /// Rows affected by a statement.
    pub const SQL_ROWS_AFFECTED: &str = "sql.rows_affected";
    /// Free-form database message.
    pub const DB_MESSAGE: &str = "db.message";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_production() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert!(config.json_format);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert!(!config.json_format);
        assert!(config.span_events);
        assert!(config.file_line_info);
    }

    #[test]
    fn test_for_service_sets_name() {
        let config = LogConfig::for_service("srv-greeter", true);
        assert_eq!(config.service_name, "srv-greeter");
        assert!(!config.json_format);
    }

    #[test]
    fn test_create_env_filter() {
        assert!(create_env_filter("info").is_ok());
        assert!(create_env_filter("gantry_server=debug,warn").is_ok());
    }

    #[test]
    fn test_disabled_logging() {
        let config = LogConfig {
            enabled: false,
            ..LogConfig::default()
        };
        assert!(init_logging(&config).is_ok());
    }
}
