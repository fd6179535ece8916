//! Deduplicating, reference-counted content store
//!
//! [`ContentStore`] sits between the storage engine and a [`BlobStore`]
//! backend. Each digest owns one slot; the first writer of a digest performs
//! the physical write and every concurrent writer of the same bytes awaits
//! that write and takes a reference instead.

use crate::{
    BlobHandle, BlobInfo, BlobStore, BlockStoreError, ContentDigest, Result, DEFAULT_MAX_RETRIES,
};
use bytes::Bytes;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, instrument, warn};

/// Configuration for the content store
#[derive(Clone, Debug)]
pub struct ContentStoreConfig {
    /// Retries after the first attempt for transient backend failures
    pub max_retries: u32,
    /// Base delay between retries, multiplied by the attempt number
    pub retry_backoff: Duration,
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_millis(10),
        }
    }
}

/// Outcome of a garbage collection pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Blobs physically removed
    pub blobs_reclaimed: usize,
    /// Bytes physically removed
    pub bytes_reclaimed: u64,
}

#[derive(Default)]
struct BlobSlot {
    stored: OnceCell<BlobInfo>,
    refs: AtomicU64,
}

/// Content-addressed blob repository with reference counts
pub struct ContentStore<S: BlobStore> {
    backend: S,
    slots: DashMap<ContentDigest, Arc<BlobSlot>>,
    /// Writers hold this shared; garbage collection holds it exclusively.
    gc_gate: RwLock<()>,
    config: ContentStoreConfig,
}

impl<S: BlobStore> ContentStore<S> {
    /// Create a content store with default configuration
    pub fn new(backend: S) -> Self {
        Self::with_config(backend, ContentStoreConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(backend: S, config: ContentStoreConfig) -> Self {
        Self {
            backend,
            slots: DashMap::new(),
            gc_gate: RwLock::new(()),
            config,
        }
    }

    /// The underlying backend
    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Store `data`, or take another reference if identical bytes are already stored
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn put(&self, data: Bytes) -> Result<BlobInfo> {
        let digest = ContentDigest::of(&data);
        let _gate = self.gc_gate.read().await;

        // Slot creation and the reference bump happen under the shard lock.
        let slot = {
            let entry = self.slots.entry(digest).or_default();
            entry.refs.fetch_add(1, Ordering::SeqCst);
            Arc::clone(entry.value())
        };

        if let Some(info) = slot.stored.get() {
            debug!(%digest, "Content already stored, reusing blob");
            return Ok(info.clone());
        }

        let size = data.len() as u64;
        let stored = slot
            .stored
            .get_or_try_init(|| async {
                let location = self
                    .with_retry("write", &digest, || {
                        self.backend.write_blob(&digest, data.clone())
                    })
                    .await?;
                Ok::<_, BlockStoreError>(BlobInfo::new(digest, size, location))
            })
            .await;

        match stored {
            Ok(info) => Ok(info.clone()),
            Err(err) => {
                slot.refs.fetch_sub(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Open a seekable read handle on a blob
    pub async fn get(&self, digest: &ContentDigest) -> Result<BlobHandle> {
        self.with_retry("open", digest, || self.backend.open_blob(digest))
            .await
    }

    /// Take a reference on a blob that is already physically stored.
    ///
    /// Used when replaying persisted ledgers at startup.
    pub async fn retain(&self, digest: &ContentDigest) -> Result<BlobInfo> {
        let _gate = self.gc_gate.read().await;
        let slot = {
            let entry = self.slots.entry(*digest).or_default();
            entry.refs.fetch_add(1, Ordering::SeqCst);
            Arc::clone(entry.value())
        };

        let stored = slot
            .stored
            .get_or_try_init(|| async {
                let size = self
                    .with_retry("stat", digest, || self.backend.blob_size(digest))
                    .await?;
                let location = self.backend.location(digest);
                Ok::<_, BlockStoreError>(BlobInfo::new(*digest, size, location))
            })
            .await;

        match stored {
            Ok(info) => Ok(info.clone()),
            Err(err) => {
                slot.refs.fetch_sub(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Drop one reference. Storage is only reclaimed by [`collect_garbage`](Self::collect_garbage).
    ///
    /// Returns the remaining reference count.
    pub fn release(&self, digest: &ContentDigest) -> Result<u64> {
        let slot = self
            .slots
            .get(digest)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(BlockStoreError::NotFound(*digest))?;

        match slot
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(previous) => Ok(previous - 1),
            Err(_) => {
                warn!(%digest, "Release of a blob with no references");
                Ok(0)
            }
        }
    }

    /// Current reference count (zero for unknown digests)
    pub fn refcount(&self, digest: &ContentDigest) -> u64 {
        self.slots
            .get(digest)
            .map(|entry| entry.refs.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Bookkeeping for a stored blob
    pub fn blob_info(&self, digest: &ContentDigest) -> Option<BlobInfo> {
        self.slots
            .get(digest)
            .and_then(|entry| entry.stored.get().cloned())
    }

    /// Number of blobs known to be stored
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.stored.initialized())
            .count()
    }

    /// Check if no blobs are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes across stored blobs
    pub fn total_size(&self) -> u64 {
        self.slots
            .iter()
            .filter_map(|entry| entry.stored.get().map(|info| info.size))
            .sum()
    }

    /// Physically remove every blob nothing references.
    ///
    /// This covers released blobs as well as orphans the backend holds
    /// without any slot, such as a blob written just before a crash.
    #[instrument(skip(self))]
    pub async fn collect_garbage(&self) -> Result<GcReport> {
        let _gate = self.gc_gate.write().await;

        self.slots
            .retain(|_, slot| slot.refs.load(Ordering::SeqCst) > 0);

        let mut report = GcReport::default();
        for digest in self.backend.list_blobs().await? {
            if self.slots.contains_key(&digest) {
                continue;
            }
            let size = self.backend.blob_size(&digest).await.unwrap_or(0);
            self.with_retry("delete", &digest, || self.backend.delete_blob(&digest))
                .await?;
            report.blobs_reclaimed += 1;
            report.bytes_reclaimed += size;
        }

        if report.blobs_reclaimed > 0 {
            info!(
                blobs = report.blobs_reclaimed,
                bytes = report.bytes_reclaimed,
                "Reclaimed unreferenced blobs"
            );
        }
        Ok(report)
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, digest: &ContentDigest, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retries < self.config.max_retries => {
                    retries += 1;
                    warn!(%digest, op, attempt = retries, error = %err, "Transient blob store failure, retrying");
                    tokio::time::sleep(self.config.retry_backoff * retries).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
