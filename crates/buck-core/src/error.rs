//! Error types for the buck-core crate

use buck_blockstore::{BlockStoreError, ContentDigest};
use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in core storage operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Bucket name fails the naming rules
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    /// Bucket already exists
    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    /// Bucket not found
    #[error("bucket not found: {0}")]
    NoSuchBucket(String),

    /// Bucket still owns live keys
    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    /// Key absent, deleted, or the requested version is not in its ledger
    #[error("object not found: {bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },

    /// Invalid object key
    #[error("invalid object key: {0}")]
    InvalidObjectKey(String),

    /// Range header malformed or not satisfiable
    #[error("requested range not satisfiable")]
    InvalidRange {
        /// Total object length, when known
        length: Option<u64>,
    },

    /// A version references a blob the content store does not have
    #[error("blob not found: {0}")]
    NoSuchBlob(ContentDigest),

    /// Storage medium failure that survived the retry budget
    #[error("storage io failure: {0}")]
    IoFailure(String),

    /// Persisted ledger index is inconsistent
    #[error("index corruption: {0}")]
    IndexCorruption(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Block store error
    #[error("block store error: {0}")]
    BlockStore(BlockStoreError),
}

/// Flat classification of [`CoreError`] for adapters that map outcomes to
/// protocol responses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidBucketName,
    BucketAlreadyExists,
    NoSuchBucket,
    BucketNotEmpty,
    NoSuchKey,
    InvalidObjectKey,
    InvalidRange,
    NoSuchBlob,
    IoFailure,
    Internal,
}

impl CoreError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidBucketName(_) => ErrorKind::InvalidBucketName,
            Self::BucketAlreadyExists(_) => ErrorKind::BucketAlreadyExists,
            Self::NoSuchBucket(_) => ErrorKind::NoSuchBucket,
            Self::BucketNotEmpty(_) => ErrorKind::BucketNotEmpty,
            Self::NoSuchKey { .. } => ErrorKind::NoSuchKey,
            Self::InvalidObjectKey(_) => ErrorKind::InvalidObjectKey,
            Self::InvalidRange { .. } => ErrorKind::InvalidRange,
            Self::NoSuchBlob(_) => ErrorKind::NoSuchBlob,
            Self::IoFailure(_) => ErrorKind::IoFailure,
            Self::IndexCorruption(_) | Self::Serialization(_) | Self::BlockStore(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub(crate) fn no_such_key(bucket: &str, key: &str) -> Self {
        Self::NoSuchKey {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    /// Attach the object length to a range error
    pub fn with_range_length(self, total: u64) -> Self {
        match self {
            Self::InvalidRange { length: None } => Self::InvalidRange {
                length: Some(total),
            },
            other => other,
        }
    }
}

impl From<BlockStoreError> for CoreError {
    fn from(err: BlockStoreError) -> Self {
        match err {
            BlockStoreError::NotFound(digest) => Self::NoSuchBlob(digest),
            BlockStoreError::Io(io) => Self::IoFailure(io.to_string()),
            other => Self::BlockStore(other),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::IoFailure(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
