//! In-memory blob store for testing and ephemeral gateways

use crate::{BlobHandle, BlobLocation, BlobStore, BlockStoreError, ContentDigest, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An in-memory blob store
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<DashMap<ContentDigest, Bytes>>,
    writes: Arc<AtomicU64>,
}

impl MemoryBlobStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of blobs stored
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Get total size of all blobs
    pub fn total_size(&self) -> u64 {
        self.blobs.iter().map(|entry| entry.value().len() as u64).sum()
    }

    /// Number of physical writes performed (duplicates excluded)
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write_blob(&self, digest: &ContentDigest, data: Bytes) -> Result<BlobLocation> {
        self.blobs.entry(*digest).or_insert_with(|| {
            self.writes.fetch_add(1, Ordering::SeqCst);
            data
        });
        Ok(BlobLocation::Memory)
    }

    async fn open_blob(&self, digest: &ContentDigest) -> Result<BlobHandle> {
        let bytes = self
            .blobs
            .get(digest)
            .map(|entry| entry.value().clone())
            .ok_or(BlockStoreError::NotFound(*digest))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    async fn has_blob(&self, digest: &ContentDigest) -> Result<bool> {
        Ok(self.blobs.contains_key(digest))
    }

    async fn delete_blob(&self, digest: &ContentDigest) -> Result<()> {
        self.blobs.remove(digest);
        Ok(())
    }

    async fn blob_size(&self, digest: &ContentDigest) -> Result<u64> {
        self.blobs
            .get(digest)
            .map(|entry| entry.value().len() as u64)
            .ok_or(BlockStoreError::NotFound(*digest))
    }

    async fn list_blobs(&self) -> Result<Vec<ContentDigest>> {
        let mut digests: Vec<_> = self.blobs.iter().map(|entry| *entry.key()).collect();
        digests.sort();
        Ok(digests)
    }

    fn location(&self, _digest: &ContentDigest) -> BlobLocation {
        BlobLocation::Memory
    }
}
