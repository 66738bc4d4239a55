//! Configuration error types.

use gantry_core::BootstrapError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or reading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// Failed to read configuration file.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML configuration: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON parsing error.
    #[error("failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Unsupported document format.
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// The document root is not a table.
    #[error("configuration root must be a table")]
    NotATable,

    /// Invalid configuration value.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the field.
        field: String,
        /// Explanation of why the value is invalid.
        reason: String,
    },

    /// Missing required field.
    #[error("missing required configuration field: {field}")]
    MissingField {
        /// Dotted path of the missing field.
        field: String,
    },

    /// A section could not be decoded or failed validation.
    #[error("invalid section '{section}': {message}")]
    InvalidSection {
        /// Dotted path of the section.
        section: String,
        /// What is wrong.
        message: String,
    },

    /// Environment variable parsing error.
    #[error("failed to parse environment variable {var}: {reason}")]
    EnvParseError {
        /// The environment variable name.
        var: String,
        /// Explanation of the parsing error.
        reason: String,
    },
}

impl ConfigError {
    /// Create a new file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Create a new read error.
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    /// Create a new invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a new missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create a new invalid section error.
    pub fn invalid_section(section: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSection {
            section: section.into(),
            message: message.into(),
        }
    }

    /// Create a new environment variable parse error.
    pub fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for BootstrapError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_not_found_error() {
        let err = ConfigError::file_not_found("/path/to/service.toml");
        assert!(err.to_string().contains("/path/to/service.toml"));
    }

    #[test]
    fn test_invalid_value_error() {
        let err = ConfigError::invalid_value("debug", "expected boolean");
        assert!(err.to_string().contains("debug"));
        assert!(err.to_string().contains("expected boolean"));
    }

    #[test]
    fn test_missing_field_error() {
        let err = ConfigError::missing_field("appname");
        assert!(err.to_string().contains("appname"));
    }

    #[test]
    fn test_env_parse_error() {
        let err = ConfigError::env_parse_error("GANTRY__DEBUG", "expected boolean");
        assert!(err.to_string().contains("GANTRY__DEBUG"));
    }

    #[test]
    fn test_converts_into_bootstrap_error() {
        let err: BootstrapError = ConfigError::missing_field("listen").into();
        assert!(matches!(err, BootstrapError::Configuration { stage: None, .. }));
        assert!(err.to_string().contains("listen"));
    }
}
