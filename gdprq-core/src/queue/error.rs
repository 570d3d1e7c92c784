//! Queue error types

use crate::queue::validation::QueueKeyError;
use thiserror::Error;

/// Errors raised by queue construction, transitions and storage
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Action must have a type")]
    MissingType,

    #[error("Action types must be unique. Found {0}")]
    DuplicateType(String),

    #[error("Only one action can be active. Found {0}")]
    MultipleActive(String),

    #[error("Unable to update item. Item of type {0} not found")]
    NotFound(String),

    #[error("Action {action_type} cannot be updated: {reason}")]
    InvalidTransition { action_type: String, reason: String },

    #[error("Queue is not finished but has no idle action")]
    Inconsistent,

    #[error("Queue storage error: {0}")]
    Storage(String),

    #[error("Invalid queue key: {0}")]
    InvalidKey(#[from] QueueKeyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    pub(crate) fn invalid_transition(action_type: &str, reason: impl Into<String>) -> Self {
        QueueError::InvalidTransition {
            action_type: action_type.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;
