//! Error types for evaluation.

use thiserror::Error;

/// Errors that can occur during evaluation.
///
/// Data problems inside a flag never surface here; they degrade to the next
/// precedence stage instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested flag key is not registered.
    #[error("flag not found: {0}")]
    NotFound(String),
}

/// Result type alias for evaluation operations.
pub type Result<T> = std::result::Result<T, Error>;
