//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The model is not part of the loaded schema.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// A record did not carry its identifier field(s).
    #[error(transparent)]
    Types(#[from] lagoon_types::Error),

    /// A save condition did not match the stored record.
    #[error("save condition not met for {model}")]
    SaveConditionNotMet { model: String },

    /// A delete condition did not match the stored record.
    #[error("deletion condition not met for {model}")]
    DeleteConditionNotMet { model: String },
}
