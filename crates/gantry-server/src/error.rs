//! Server errors.

use gantry_core::BootstrapError;
use thiserror::Error;

/// Errors raised while binding or serving.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address as configured.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The listener stopped accepting connections.
    #[error("listener failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The serve task panicked or was cancelled.
    #[error("serve task ended abnormally: {0}")]
    Task(String),
}

impl From<ServerError> for BootstrapError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Bind { address, source } => Self::bind(address, source.to_string()),
            other => Self::Server(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_maps_to_bind_failed() {
        let err = ServerError::Bind {
            address: "0.0.0.0:1".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(matches!(
            BootstrapError::from(err),
            BootstrapError::BindFailed { ref address, .. } if address == "0.0.0.0:1"
        ));
    }

    #[test]
    fn test_accept_error_maps_to_server() {
        let err = ServerError::Accept(std::io::Error::other("too many open files"));
        assert!(matches!(BootstrapError::from(err), BootstrapError::Server(_)));
    }
}
