//! Error taxonomy.
//!
//! Two families of errors exist:
//!
//! - [`BootstrapError`] is fatal to startup. Whoever returns it has already
//!   released every resource acquired before the failure.
//! - [`CallError`] is scoped to one call. It becomes the [`Reply`](crate::Reply)
//!   for that call and never affects the server.
//!
//! | Variant | Raised by | Fatal |
//! |---|---|---|
//! | `Configuration` | config loading, stage builders | yes |
//! | `AcquisitionFailed` | resource acquisition | yes |
//! | `BindFailed` | server assembly | yes |
//! | `RegistrationFailed` | discovery registration | no, logged only |
//! | `Server` | listener failure while serving | yes |

use crate::status::Code;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using [`BootstrapError`].
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Kind of long-lived resource owned by the lifecycle coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Relational database connection.
    Database,
    /// Distributed-tracing client.
    Tracer,
    /// Log sink (payload audit file).
    Logger,
}

impl ResourceKind {
    /// Returns the lowercase kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Tracer => "tracer",
            Self::Logger => "logger",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn stage_suffix(stage: &Option<String>) -> String {
    stage
        .as_ref()
        .map(|s| format!(" in stage '{s}'"))
        .unwrap_or_default()
}

/// Errors that abort bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A configuration value is missing or malformed.
    #[error("configuration error{}: {message}", stage_suffix(.stage))]
    Configuration {
        /// Pipeline stage whose section is at fault, if any.
        stage: Option<String>,
        /// What is wrong.
        message: String,
    },

    /// A resource could not be acquired.
    #[error("failed to acquire {kind} resource: {message}")]
    AcquisitionFailed {
        /// The resource kind.
        kind: ResourceKind,
        /// Underlying failure.
        message: String,
    },

    /// The listener could not bind.
    #[error("failed to bind listener on {address}: {message}")]
    BindFailed {
        /// Address the bind was attempted on.
        address: String,
        /// Underlying failure.
        message: String,
    },

    /// Discovery registration failed.
    #[error("failed to register '{name}' with discovery: {message}")]
    RegistrationFailed {
        /// Service name being registered.
        name: String,
        /// Underlying failure.
        message: String,
    },

    /// The listener failed while serving.
    #[error("server error: {0}")]
    Server(String),
}

impl BootstrapError {
    /// Creates a configuration error not tied to a stage.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            stage: None,
            message: message.into(),
        }
    }

    /// Creates a configuration error attributed to a pipeline stage.
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            stage: Some(stage.into()),
            message: message.into(),
        }
    }

    /// Creates an acquisition error.
    pub fn acquisition(kind: ResourceKind, message: impl Into<String>) -> Self {
        Self::AcquisitionFailed {
            kind,
            message: message.into(),
        }
    }

    /// Creates a bind error.
    pub fn bind(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BindFailed {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates a registration error.
    pub fn registration(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RegistrationFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Returns the offending stage for configuration errors.
    #[must_use]
    pub fn failed_stage(&self) -> Option<&str> {
        match self {
            Self::Configuration { stage, .. } => stage.as_deref(),
            _ => None,
        }
    }

    /// Returns `true` if the error prevents the service from running.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::RegistrationFailed { .. })
    }
}

/// Error returned by a handler or a pipeline stage for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct CallError {
    code: Code,
    message: String,
}

impl CallError {
    /// Creates a call error with an explicit code.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `INVALID_ARGUMENT`.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// `NOT_FOUND`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// `UNAUTHENTICATED`.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    /// `UNIMPLEMENTED`.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    /// `UNAVAILABLE`.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// `DEADLINE_EXCEEDED`.
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// `INTERNAL`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    /// Status code.
    #[must_use]
    pub const fn code(&self) -> Code {
        self.code
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_names_stage() {
        let err = BootstrapError::stage("metrics", "buckets must be ascending");
        assert_eq!(err.failed_stage(), Some("metrics"));
        assert_eq!(
            err.to_string(),
            "configuration error in stage 'metrics': buckets must be ascending"
        );
    }

    #[test]
    fn test_configuration_error_without_stage() {
        let err = BootstrapError::configuration("missing required key 'listen'");
        assert_eq!(err.failed_stage(), None);
        assert_eq!(
            err.to_string(),
            "configuration error: missing required key 'listen'"
        );
    }

    #[test]
    fn test_acquisition_display() {
        let err = BootstrapError::acquisition(ResourceKind::Database, "connection refused");
        assert_eq!(
            err.to_string(),
            "failed to acquire database resource: connection refused"
        );
    }

    #[test]
    fn test_registration_is_not_fatal() {
        assert!(!BootstrapError::registration("srv", "down").is_fatal());
        assert!(BootstrapError::bind(":1", "in use").is_fatal());
    }

    #[test]
    fn test_call_error_display() {
        let err = CallError::unauthenticated("missing credentials");
        assert_eq!(err.code(), Code::Unauthenticated);
        assert_eq!(err.to_string(), "UNAUTHENTICATED: missing credentials");
    }
}
