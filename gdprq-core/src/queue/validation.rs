//! Queue storage key validation
//!
//! Keys become file names in [`crate::queue::storage::FileStorage`], so they
//! are restricted to a filesystem-safe alphabet.

use thiserror::Error;

/// Errors that can occur during queue key validation
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueKeyError {
    #[error("Queue key is empty")]
    Empty,

    #[error("Queue key is too long (max 64 characters)")]
    TooLong,

    #[error("Queue key must start with a letter or number")]
    InvalidStart,

    #[error("Queue key contains invalid characters (only letters, numbers, hyphens, and underscores allowed)")]
    InvalidCharacters,
}

const MAX_KEY_LENGTH: usize = 64;

/// Validate a queue storage key
pub fn validate_queue_key(key: &str) -> Result<(), QueueKeyError> {
    let Some(first_char) = key.chars().next() else {
        return Err(QueueKeyError::Empty);
    };

    if key.len() > MAX_KEY_LENGTH {
        return Err(QueueKeyError::TooLong);
    }

    if !first_char.is_ascii_alphanumeric() {
        return Err(QueueKeyError::InvalidStart);
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(QueueKeyError::InvalidCharacters);
    }

    Ok(())
}
