//! Shared error types.

/// Errors returned by [`crate::storage::BridgeStorage`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to (de)serialize a stored value.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// Backend error.
    #[error(transparent)]
    Internal(#[from] eyre::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}
