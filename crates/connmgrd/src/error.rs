//! Error types for connmgrd.

use conn_types::InterfaceId;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in connmgrd.
#[derive(Debug, Error)]
pub enum ConnMgrError {
    /// The interface has no connectivity binding, or its backend does
    /// not implement the requested capability.
    #[error("operation not supported")]
    NotSupported,

    /// A flag id, option name or option value failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A connectivity backend's connect/disconnect/option call failed.
    /// Carries the backend's own error text unmodified.
    #[error("backend error on {iface}: {reason}")]
    Backend {
        iface: InterfaceId,
        reason: String,
    },

    /// The interface registry rejected an admin-state change.
    #[error("interface registry error: {0}")]
    Registry(String),

    /// Name resolution for the online-check target produced no address.
    #[error("name resolution failed for {0}")]
    Resolve(String),

    /// The online-check target string could not be parsed.
    #[error("invalid online check target: {0}")]
    InvalidTarget(String),

    /// A reachability probe did not complete in time.
    #[error("reachability probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    /// A reachability probe ran but did not confirm reachability
    /// (non-2xx/301 HTTP status, no echo reply, connect refused).
    #[error("reachability probe failed: {0}")]
    ProbeFailed(String),

    /// Configuration file error.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP transport error during an online check.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for connmgrd operations.
pub type Result<T> = std::result::Result<T, ConnMgrError>;
