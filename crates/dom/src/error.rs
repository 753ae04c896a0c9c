//! Error types for page-host operations
//!
//! Simple, flat error hierarchy. No over-engineering.

use thiserror::Error;

use crate::types::NodeId;

pub type Result<T> = std::result::Result<T, DomError>;

#[derive(Debug, Error)]
pub enum DomError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Failed to detach '{kind}' listener from node {target}: {reason}")]
    ListenerDetach {
        target: NodeId,
        kind: String,
        reason: String,
    },

    #[error("Invalid observer options: {0}")]
    InvalidObserverOptions(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
