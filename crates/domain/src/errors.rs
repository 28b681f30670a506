//! Error types used throughout the extension core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Nimbus
#[derive(Error, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum NimbusError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NimbusError {
    /// Whether this error represents cooperative cancellation rather than a
    /// genuine failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Whether this error is the code-wait timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Result type alias for Nimbus operations
pub type Result<T> = std::result::Result<T, NimbusError>;
