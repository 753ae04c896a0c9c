//! Error types for the content runtime
//!
//! Teardown and relay failures never leave their module; they are logged
//! and swallowed. What is left here is what callers can actually see.

use thiserror::Error;

/// Error type returned by cleanup callbacks and other caller-supplied code
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Session already torn down")]
    TornDown,
}

/// Result type for content runtime operations
pub type Result<T> = std::result::Result<T, ContentError>;

/// Delivery failures of the error relay
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Coordinator unreachable: channel closed")]
    Closed,

    #[error("Delivery failed: {0}")]
    Delivery(String),
}
