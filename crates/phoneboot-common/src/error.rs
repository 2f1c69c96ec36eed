//! Common error types for phoneboot.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`BootError`].
pub type BootResult<T> = Result<T, BootError>;

/// Errors raised by the bootstrap components.
///
/// Components only report these. Whether one aborts the bootstrap is decided
/// by the orchestrator.
#[derive(Error, Diagnostic, Debug)]
pub enum BootError {
    /// Interface roles are missing or ambiguous.
    #[error("Interface classification failed: {message}")]
    #[diagnostic(
        code(phoneboot::classification),
        help("Check that the call interface is attached to the container and its link is up")
    )]
    Classification {
        /// What made the interface set unusable.
        message: String,
    },

    /// An isolation rule was rejected.
    #[error("Failed to isolate interface '{iface}': {message}")]
    #[diagnostic(code(phoneboot::isolation))]
    Isolation {
        /// Interface the rule applies to.
        iface: String,
        /// The rejection reason.
        message: String,
    },

    /// No lease was obtained before the deadline.
    #[error("Timed out after {seconds}s waiting for {family} lease on '{iface}'")]
    #[diagnostic(code(phoneboot::lease::timeout))]
    LeaseTimeout {
        /// Interface the lease was requested on.
        iface: String,
        /// Address family of the request.
        family: String,
        /// The timeout that elapsed.
        seconds: u64,
    },

    /// The DHCP client failed without a lease.
    #[error("Failed to obtain {family} lease on '{iface}': {message}")]
    #[diagnostic(code(phoneboot::lease))]
    Lease {
        /// Interface the lease was requested on.
        iface: String,
        /// Address family of the request.
        family: String,
        /// The failure reason.
        message: String,
    },

    /// A lease event hook failed.
    #[error("Lease hook '{hook}' failed: {message}")]
    #[diagnostic(code(phoneboot::hook))]
    Hook {
        /// Name of the hook.
        hook: String,
        /// The failure reason.
        message: String,
    },

    /// The administrative access service did not come up.
    #[error("Admin service unavailable: {message}")]
    #[diagnostic(code(phoneboot::admin))]
    AdminService {
        /// The failure reason.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(phoneboot::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(phoneboot::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(phoneboot::serialization))]
    Serialization(String),

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(phoneboot::internal),
        help("This is a bug, please report it with the boot log attached")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

impl BootError {
    /// Whether this error is a lease that ran out of time.
    #[must_use]
    pub const fn is_lease_timeout(&self) -> bool {
        matches!(self, Self::LeaseTimeout { .. })
    }
}

impl From<serde_json::Error> for BootError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = BootError::LeaseTimeout {
            iface: "eth1".to_string(),
            family: "ipv4".to_string(),
            seconds: 2,
        };
        assert_eq!(
            err.to_string(),
            "Timed out after 2s waiting for ipv4 lease on 'eth1'"
        );
        assert!(err.is_lease_timeout());
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BootError = io_err.into();
        assert!(matches!(err, BootError::Io(_)));
        assert!(!err.is_lease_timeout());
    }
}
