//! Errors raised at the hypervisor seam and during engine startup.

use thiserror::Error;

/// A call into the hypervisor management interface failed.
#[derive(Debug, Error)]
pub enum HypervisorError {
    /// The management interface could not be reached.
    #[error("hypervisor unreachable: {message}")]
    Unreachable {
        /// Description of the failure.
        message: String,
    },

    /// The caller lacks the rights to use the management interface.
    #[error("access to the hypervisor was denied: {message}")]
    AccessDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// The host has no usable hypervisor.
    #[error("hypervisor not supported on this host: {message}")]
    Unsupported {
        /// Description of what is missing.
        message: String,
    },

    /// No machine with this name exists.
    #[error("virtual machine not found: {name}")]
    NotFound {
        /// Name that was looked up.
        name: String,
    },

    /// The query was rejected or returned malformed data.
    #[error("hypervisor query failed: {message}")]
    Query {
        /// Description of the failure.
        message: String,
    },
}

/// The engine could not be brought up.
///
/// Distinct from per-call failures, which never abort the engine.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The host platform cannot run the engine.
    #[error("unsupported platform: {message}")]
    UnsupportedPlatform {
        /// Description of what is missing.
        message: String,
    },

    /// The process lacks the privileges the hypervisor requires.
    #[error("insufficient privilege: {message}")]
    InsufficientPrivilege {
        /// Description of the denied operation.
        message: String,
    },

    /// The hypervisor's state feed could not be opened.
    #[error("state feed unavailable: {message}")]
    FeedUnavailable {
        /// Description of the failure.
        message: String,
    },

    /// The background service could not bind its listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl From<HypervisorError> for StartupError {
    fn from(err: HypervisorError) -> Self {
        match err {
            HypervisorError::AccessDenied { message } => Self::InsufficientPrivilege { message },
            HypervisorError::Unsupported { message } => Self::UnsupportedPlatform { message },
            other => Self::FeedUnavailable {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_becomes_privilege_error() {
        let err = StartupError::from(HypervisorError::AccessDenied {
            message: "not an administrator".into(),
        });
        assert!(matches!(err, StartupError::InsufficientPrivilege { .. }));
    }

    #[test]
    fn unreachable_becomes_feed_error() {
        let err = StartupError::from(HypervisorError::Unreachable {
            message: "service stopped".into(),
        });
        assert!(matches!(err, StartupError::FeedUnavailable { .. }));
        assert!(err.to_string().contains("service stopped"));
    }
}
