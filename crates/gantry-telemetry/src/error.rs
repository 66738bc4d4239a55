//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur during telemetry operations.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize metrics.
    #[error("Failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// Failed to initialize tracing.
    #[error("Failed to initialize tracing: {0}")]
    TracingInit(String),

    /// Failed to shut the tracing client down.
    #[error("Failed to shut down tracing: {0}")]
    TracingShutdown(String),

    /// Failed to initialize logging.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Failed to open or write the audit log.
    #[error("Audit log error ({path}): {source}")]
    Audit {
        /// Audit file path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to encode an audit record.
    #[error("Failed to encode audit record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::MetricsInit("failed".to_string());
        assert_eq!(err.to_string(), "Failed to initialize metrics: failed");
    }

    #[test]
    fn test_audit_error_names_path() {
        let err = TelemetryError::Audit {
            path: "/nope/access.log".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("/nope/access.log"));
    }
}
