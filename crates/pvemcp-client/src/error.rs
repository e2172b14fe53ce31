//! Error types for the Proxmox API client

use thiserror::Error;

/// Errors that can occur when talking to the Proxmox VE API
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Request timeout
    #[error("Request timed out")]
    Timeout,

    /// API returned an error status
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from server
        message: String,
    },

    /// Client could not be built from the given settings
    #[error("Invalid client settings: {0}")]
    Settings(String),

    /// Invalid response format
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Classify a transport error from `reqwest`
    pub(crate) fn from_request(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Http(error)
        }
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_message() {
        let err = ClientError::Api {
            status: 500,
            message: "QEMU guest agent is not running".into(),
        };
        assert_eq!(
            err.to_string(),
            "API error (500): QEMU guest agent is not running"
        );
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(ClientError::Timeout.to_string(), "Request timed out");
    }
}
