//! # Buck Blockstore
//!
//! Content-addressed blob storage for the Buck object store.
//!
//! This crate provides:
//! - **Content digests**: CIDv1 identifiers over BLAKE3
//! - **Backends**: in-memory and filesystem blob stores behind one trait
//! - **Deduplication**: identical bytes are written once, however many
//!   versions point at them
//! - **Reference counting**: blobs are reclaimable only once nothing
//!   references them
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             Storage Engine              │
//! ├─────────────────────────────────────────┤
//! │   ContentStore (refcounts, dedup, GC)   │
//! ├─────────────────────────────────────────┤
//! │            BlobStore Trait              │
//! ├────────────────────┬────────────────────┤
//! │  MemoryBlobStore   │    FsBlobStore     │
//! └────────────────────┴────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use buck_blockstore::{ContentStore, MemoryBlobStore};
//!
//! let store = ContentStore::new(MemoryBlobStore::new());
//! let info = store.put(data).await?;
//! let handle = store.get(&info.digest).await?;
//! ```

pub mod blob;
pub mod content;
pub mod digest;
pub mod error;
pub mod fs;
pub mod memory;

pub use blob::{BlobHandle, BlobInfo, BlobLocation, BlobRead};
pub use content::{ContentStore, ContentStoreConfig, GcReport};
pub use digest::ContentDigest;
pub use error::{BlockStoreError, Result};
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use bytes::Bytes;

/// Default number of attempts for a transient backend failure
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Trait for blob storage backends
///
/// Backends are dumb: they store bytes under the digest they are given and
/// know nothing about references. [`ContentStore`] layers deduplication and
/// refcounting on top.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `digest`. Writing a digest that already exists is a no-op.
    async fn write_blob(&self, digest: &ContentDigest, data: Bytes) -> Result<BlobLocation>;

    /// Open a seekable read handle
    async fn open_blob(&self, digest: &ContentDigest) -> Result<BlobHandle>;

    /// Check if a blob exists
    async fn has_blob(&self, digest: &ContentDigest) -> Result<bool>;

    /// Delete a blob; deleting a missing blob is not an error
    async fn delete_blob(&self, digest: &ContentDigest) -> Result<()>;

    /// Get blob size without reading content
    async fn blob_size(&self, digest: &ContentDigest) -> Result<u64>;

    /// Enumerate every stored digest
    async fn list_blobs(&self) -> Result<Vec<ContentDigest>>;

    /// Where a blob with this digest lives (or would live)
    fn location(&self, digest: &ContentDigest) -> BlobLocation;
}

/// Blob store selected at startup
pub enum FlexibleBlobStore {
    /// Files under a data directory
    Fs(FsBlobStore),
    /// In-memory storage
    Memory(MemoryBlobStore),
}

impl FlexibleBlobStore {
    /// Check if blobs survive a restart
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Fs(_))
    }
}

#[async_trait]
impl BlobStore for FlexibleBlobStore {
    async fn write_blob(&self, digest: &ContentDigest, data: Bytes) -> Result<BlobLocation> {
        match self {
            Self::Fs(store) => store.write_blob(digest, data).await,
            Self::Memory(store) => store.write_blob(digest, data).await,
        }
    }

    async fn open_blob(&self, digest: &ContentDigest) -> Result<BlobHandle> {
        match self {
            Self::Fs(store) => store.open_blob(digest).await,
            Self::Memory(store) => store.open_blob(digest).await,
        }
    }

    async fn has_blob(&self, digest: &ContentDigest) -> Result<bool> {
        match self {
            Self::Fs(store) => store.has_blob(digest).await,
            Self::Memory(store) => store.has_blob(digest).await,
        }
    }

    async fn delete_blob(&self, digest: &ContentDigest) -> Result<()> {
        match self {
            Self::Fs(store) => store.delete_blob(digest).await,
            Self::Memory(store) => store.delete_blob(digest).await,
        }
    }

    async fn blob_size(&self, digest: &ContentDigest) -> Result<u64> {
        match self {
            Self::Fs(store) => store.blob_size(digest).await,
            Self::Memory(store) => store.blob_size(digest).await,
        }
    }

    async fn list_blobs(&self) -> Result<Vec<ContentDigest>> {
        match self {
            Self::Fs(store) => store.list_blobs().await,
            Self::Memory(store) => store.list_blobs().await,
        }
    }

    fn location(&self, digest: &ContentDigest) -> BlobLocation {
        match self {
            Self::Fs(store) => store.location(digest),
            Self::Memory(store) => store.location(digest),
        }
    }
}
