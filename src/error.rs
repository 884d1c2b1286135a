//! Error handling for the solo mining client
//!
//! Error types covering node communication, template parsing and
//! configuration, with retry classification for the connection state machine.

use thiserror::Error;

/// Result type alias for solo mining operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the solo mining client
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Block template is missing data or carries malformed fields
    #[error("Invalid block template: {message}")]
    Template { message: String },

    /// Target validation errors
    #[error("Invalid target: {message}")]
    Target { message: String },

    /// Mining or dev address could not be decoded
    #[error("Invalid address: {message}")]
    Address { message: String },

    /// Error object reported by the node in a JSON-RPC reply
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Non-200 HTTP status from the node
    #[error("Node replied with HTTP {status}")]
    HttpStatus { status: u16 },

    /// Network errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Result turned away before reaching the node
    #[error("Result rejected: {0}")]
    Submit(#[from] crate::SubmitRejection),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a template error
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Create a target error
    pub fn target(message: impl Into<String>) -> Self {
        Self::Target {
            message: message.into(),
        }
    }

    /// Create an address error
    pub fn address(message: impl Into<String>) -> Self {
        Self::Address {
            message: message.into(),
        }
    }

    /// Create an RPC error from a node-reported code and message
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16) -> Self {
        Self::HttpStatus { status }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Transport-level failure, as opposed to a problem with the node's data.
    ///
    /// Any non-200 status counts: the node could not be reached in a usable
    /// way, so the connection is retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::HttpStatus { .. } | Error::Network { .. } | Error::Io(_)
        )
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Http(_) => "http",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Io(_) => "io",
            Error::Config { .. } => "config",
            Error::Template { .. } => "template",
            Error::Target { .. } => "target",
            Error::Address { .. } => "address",
            Error::Rpc { .. } => "rpc",
            Error::HttpStatus { .. } => "http_status",
            Error::Network { .. } => "network",
            Error::InvalidState { .. } => "invalid_state",
            Error::Submit(_) => "submit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(Error::network("connection reset").is_retryable());
        assert!(Error::http_status(503).is_retryable());
        assert!(Error::http_status(401).is_retryable());
        assert!(Error::from(std::io::Error::other("broken pipe")).is_retryable());
        assert!(!Error::rpc(-25, "bad-prevblk").is_retryable());
        assert!(!Error::template("missing height").is_retryable());
        assert!(!Error::from(serde_json::from_str::<u8>("x").unwrap_err()).is_retryable());
        assert!(!Error::from(crate::SubmitRejection::NotCurrent).is_retryable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(Error::target("short").category(), "target");
        assert_eq!(Error::rpc(-1, "x").category(), "rpc");
        assert_eq!(
            Error::from(crate::SubmitRejection::NotCurrent).to_string(),
            "Result rejected: job is not current"
        );
        assert_eq!(
            Error::rpc(-8, "Block decode failed").to_string(),
            "RPC error -8: Block decode failed"
        );
    }
}
