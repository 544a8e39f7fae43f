//! Error types for store operations.

use thiserror::Error;

/// Errors returned by the registry and the flag service.
#[derive(Debug, Error)]
pub enum Error {
    /// No flag (or rule, override, history) exists under the given key.
    #[error("not found: {0}")]
    NotFound(String),

    /// A flag with the given key is already registered.
    #[error("flag '{0}' already exists")]
    AlreadyExists(String),

    /// The requested change is not allowed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The resulting flag definition is invalid.
    #[error(transparent)]
    Model(#[from] flagstone_model::Error),
}

impl Error {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<flagstone_engine::Error> for Error {
    fn from(err: flagstone_engine::Error) -> Self {
        match err {
            flagstone_engine::Error::NotFound(key) => Self::NotFound(key),
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
