//! Error types for the buck-blockstore crate

use crate::digest::ContentDigest;
use thiserror::Error;

/// Result type alias using `BlockStoreError`
pub type Result<T> = std::result::Result<T, BlockStoreError>;

/// Errors that can occur during blob storage operations
#[derive(Error, Debug)]
pub enum BlockStoreError {
    /// Blob not found
    #[error("blob not found: {0}")]
    NotFound(ContentDigest),

    /// Malformed digest string
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// IO error from the storage medium
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlockStoreError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Only storage-medium failures qualify; a missing blob or a bad digest
    /// is a deterministic outcome.
    pub fn is_transient(&self) -> bool {
        match self {
            BlockStoreError::Io(err) => !matches!(
                err.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::InvalidInput
            ),
            _ => false,
        }
    }
}
