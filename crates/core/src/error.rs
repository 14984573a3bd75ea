//! Error types shared across the pgvault workspace.
//!
//! Each layer defines its own error enum close to the code that raises it
//! (codec, WAL, catalogue, workflow). This module holds the kinds that do not
//! belong to a single layer: configuration and network failures, plus the
//! top-level [`Error`] the binaries report.

use std::io;
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for the pgvault engine.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, sockets)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid or missing configuration; fatal at startup
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Connection-level failure
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cooperative cancellation observed between stages
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Configuration errors, raised while loading or validating the
/// configuration file. All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Cannot read configuration file {path}: {reason}")]
    Unreadable {
        /// Path that was attempted
        path: String,
        /// Underlying reason
        reason: String,
    },

    /// A line did not parse as `key = value` or `[section]`
    #[error("Malformed configuration at line {line}: {content}")]
    Malformed {
        /// 1-based line number
        line: usize,
        /// Offending line content
        content: String,
    },

    /// A key has a value outside its accepted domain
    #[error("Invalid value for {key}: {value}")]
    InvalidValue {
        /// Key name
        key: String,
        /// Rejected value
        value: String,
    },

    /// A required key is absent
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),

    /// No server sections were defined
    #[error("No servers defined in configuration")]
    NoServers,

    /// Two server sections share a name
    #[error("Duplicate server section: {0}")]
    DuplicateServer(String),
}

/// Network errors for the replication stream and the management socket.
///
/// Replication reads are retried with exponential backoff up to a bounded
/// attempt count; everything else is fatal to the current operation.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Could not establish the connection
    #[error("Connection to {endpoint} failed: {reason}")]
    Connect {
        /// host:port or socket path
        endpoint: String,
        /// Underlying reason
        reason: String,
    },

    /// The peer closed the stream mid-message
    #[error("Truncated read: expected {expected} bytes, got {got}")]
    Truncated {
        /// Bytes the frame promised
        expected: usize,
        /// Bytes actually received
        got: usize,
    },

    /// A read or write exceeded its deadline
    #[error("Timeout after {0} attempts")]
    Timeout(u32),

    /// I/O error on the wire
    #[error("Socket error: {0}")]
    Io(#[from] io::Error),
}

impl NetworkError {
    /// Whether the replication stream should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NetworkError::Connect { .. } | NetworkError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Malformed {
            line: 7,
            content: "workers ==".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 7"));
        assert!(msg.contains("workers =="));
    }

    #[test]
    fn test_network_retryable() {
        let err = NetworkError::Connect {
            endpoint: "localhost:5432".to_string(),
            reason: "refused".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!NetworkError::Timeout(5).is_retryable());
    }

    #[test]
    fn test_error_wraps_config() {
        let err: Error = ConfigError::NoServers.into();
        assert!(err.to_string().contains("No servers"));
    }
}
