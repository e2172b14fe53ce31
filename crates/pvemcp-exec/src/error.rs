//! Error types for pvemcp-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running a command over the remote shell
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Failed to connect to remote host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Server presented a host key that does not match `known_hosts`
    #[error("host key mismatch: {0}")]
    HostKeyMismatch(String),

    /// Command did not finish in time
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// SSH key error
    #[error("SSH key error: {0}")]
    SshKeyError(String),

    /// I/O error on an established channel
    #[error("I/O error: {0}")]
    IoError(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl ExecError {
    /// Whether the command never reached the remote side
    ///
    /// Everything except a timeout or a mid-channel I/O error means no
    /// command was started.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed(_)
                | ExecError::AuthenticationFailed(_)
                | ExecError::HostKeyMismatch(_)
                | ExecError::SshKeyError(_)
                | ExecError::ConfigError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failure_classification() {
        assert!(ExecError::ConnectionFailed("refused".into()).is_connection_failure());
        assert!(ExecError::HostKeyMismatch("line 3".into()).is_connection_failure());
        assert!(!ExecError::IoError("reset".into()).is_connection_failure());

        let timeout = ExecError::Timeout {
            timeout: Duration::from_secs(5),
        };
        assert!(!timeout.is_connection_failure());
        assert_eq!(timeout.to_string(), "command timed out after 5s");
    }
}
