use std::error::Error;
use thiserror::Error;

use crate::dao::models::UnknownVariant;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("stored record is malformed: {message}")]
    Corrupt {
        message: String,
        #[source]
        source: UnknownVariant,
    },
    #[error("unique constraint violated: {0}")]
    Duplicate(String),
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a decoding error for a row that does not map onto the domain model.
    pub fn corrupt(message: impl Into<String>, source: UnknownVariant) -> Self {
        StorageError::Corrupt {
            message: message.into(),
            source,
        }
    }
}
