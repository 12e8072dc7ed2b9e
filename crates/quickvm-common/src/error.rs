//! Unified error types for the QuickVM workspace.
//!
//! Per-call command failures are not errors: they travel as
//! [`CommandOutcome`](crate::types::CommandOutcome) values. This enum covers
//! configuration, I/O, serialization, and transport failures. Higher-level
//! crates define their own domain-specific enums for their seams.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum QuickVmError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The service connection failed or was closed.
    #[error("service connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// The peer sent a frame that violates the protocol.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// A YAML document could not be parsed.
    #[error("YAML error: {source}")]
    Yaml {
        /// Underlying YAML error.
        #[from]
        source: serde_yaml::Error,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, QuickVmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_render_for_front_ends() {
        let err = QuickVmError::Connection {
            message: "127.0.0.1:47310: connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "service connection error: 127.0.0.1:47310: connection refused"
        );
        let err = QuickVmError::Protocol {
            message: "unexpected reply".to_string(),
        };
        assert_eq!(err.to_string(), "protocol error: unexpected reply");
    }

    #[test]
    fn json_errors_convert() {
        let source = serde_json::from_str::<u32>("nope").unwrap_err();
        let err = QuickVmError::from(source);
        assert!(matches!(err, QuickVmError::Serialization { .. }));
    }
}
