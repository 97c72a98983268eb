//! Error types for cutforest

use thiserror::Error;

/// Result type alias for cutforest operations
pub type Result<T> = std::result::Result<T, ForestError>;

/// Main error type for cutforest
#[derive(Error, Debug)]
pub enum ForestError {
    /// A precondition on the arguments was violated before any state changed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Handle out of range or not currently allocated
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// Point store full even after compaction and resizing
    #[error("capacity exhausted: {0}")]
    Capacity(String),

    /// Serialized payload lengths are incoherent
    #[error("misaligned state: {0}")]
    Misaligned(String),

    /// A required piece of state was absent during restore
    #[error("missing state: {0}")]
    MissingState(String),

    /// State version not recognized by this build
    #[error("unsupported state version: {0}")]
    UnsupportedVersion(String),

    /// Internal consistency assertion failed; indicates a bug
    #[error("illegal state: {0}")]
    IllegalState(String),
}

/// Raises `InvalidArgument` with `message` unless `condition` holds.
pub fn check_argument(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(ForestError::InvalidArgument(message.to_string()))
    }
}
