//! The storage engine: bucket registry over a shared content store

use crate::{
    bucket::{validate_bucket_name, Bucket},
    index::{FsIndex, LedgerIndex, MemoryIndex},
    ledger::VersionLedger,
    metadata::{BucketMetadata, Owner, Region, VersionSequence},
    CoreError, Result,
};
use buck_blockstore::{
    BlobStore, BlockStoreError, ContentStore, ContentStoreConfig, FlexibleBlobStore,
    FsBlobStore, GcReport, MemoryBlobStore,
};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Configuration for a [`StorageEngine`]
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    /// Directory for blobs and the ledger index; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// Retry policy of the content store
    pub content: ContentStoreConfig,
    /// Owner recorded on buckets created without one
    pub default_owner: Owner,
    /// Region recorded on buckets created without one
    pub default_region: Region,
}

impl EngineConfig {
    /// Keep everything in memory
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Persist under `data_dir`
    pub fn persistent(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.content.max_retries = max_retries;
        self
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.default_region = region;
        self
    }

    pub fn with_owner(mut self, owner: Owner) -> Self {
        self.default_owner = owner;
        self
    }
}

/// Point-in-time counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub buckets: usize,
    pub live_keys: usize,
    pub versions: usize,
    pub blobs: usize,
    pub stored_bytes: u64,
}

/// Registry of buckets sharing one content store
pub struct StorageEngine<S: BlobStore = FlexibleBlobStore> {
    content: Arc<ContentStore<S>>,
    index: Arc<dyn LedgerIndex>,
    buckets: DashMap<String, Arc<Bucket<S>>>,
    /// Serializes bucket creation and deletion. Lookups go straight to the map.
    registry: Mutex<()>,
    sequence: Arc<VersionSequence>,
    default_owner: Owner,
    default_region: Region,
}

impl StorageEngine<MemoryBlobStore> {
    /// Engine with nothing persisted
    pub fn in_memory() -> Self {
        Self::with_backend(MemoryBlobStore::new(), Arc::new(MemoryIndex), &EngineConfig::default())
    }
}

impl StorageEngine<FlexibleBlobStore> {
    /// Build an engine from configuration, replaying any persisted state
    pub async fn open(config: &EngineConfig) -> Result<Self> {
        let Some(data_dir) = &config.data_dir else {
            info!("Using in-memory storage");
            return Ok(Self::with_backend(
                FlexibleBlobStore::Memory(MemoryBlobStore::new()),
                Arc::new(MemoryIndex),
                config,
            ));
        };

        let backend = FsBlobStore::open(data_dir).await?;
        let index = FsIndex::open(data_dir).await?;
        let engine = Self::with_backend(FlexibleBlobStore::Fs(backend), Arc::new(index), config);
        engine.replay().await?;

        info!(data_dir = %data_dir.display(), "Using filesystem storage");
        Ok(engine)
    }
}

impl<S: BlobStore> StorageEngine<S> {
    /// Assemble an engine over an existing backend and index.
    ///
    /// Nothing is replayed; see [`StorageEngine::open`].
    pub fn with_backend(backend: S, index: Arc<dyn LedgerIndex>, config: &EngineConfig) -> Self {
        Self {
            content: Arc::new(ContentStore::with_config(backend, config.content.clone())),
            index,
            buckets: DashMap::new(),
            registry: Mutex::new(()),
            sequence: Arc::new(VersionSequence::default()),
            default_owner: config.default_owner.clone(),
            default_region: config.default_region.clone(),
        }
    }

    /// Shared content store
    pub fn content(&self) -> &ContentStore<S> {
        &self.content
    }

    /// Create a bucket owned by the default owner in the default region
    pub async fn create_bucket(&self, name: &str) -> Result<Arc<Bucket<S>>> {
        self.create_bucket_with(name, self.default_owner.clone(), self.default_region.clone())
            .await
    }

    /// Create a bucket
    #[instrument(skip(self, owner, region))]
    pub async fn create_bucket_with(
        &self,
        name: &str,
        owner: Owner,
        region: Region,
    ) -> Result<Arc<Bucket<S>>> {
        validate_bucket_name(name)?;

        let _registry = self.registry.lock().await;
        if self.buckets.contains_key(name) {
            return Err(CoreError::BucketAlreadyExists(name.to_string()));
        }

        let metadata = BucketMetadata::new(name, owner).with_region(region);
        self.index.put_bucket(&metadata).await?;

        let bucket = Arc::new(self.new_bucket(metadata));
        self.buckets.insert(name.to_string(), Arc::clone(&bucket));

        info!(bucket = %name, "Bucket created");
        Ok(bucket)
    }

    /// Check if bucket exists
    pub fn head_bucket(&self, name: &str) -> bool {
        self.buckets.contains_key(name)
    }

    /// Get a bucket handle
    pub fn get_bucket(&self, name: &str) -> Option<Arc<Bucket<S>>> {
        self.buckets.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Get a bucket handle or fail with `NoSuchBucket`
    pub fn bucket(&self, name: &str) -> Result<Arc<Bucket<S>>> {
        self.get_bucket(name)
            .ok_or_else(|| CoreError::NoSuchBucket(name.to_string()))
    }

    /// Delete a bucket that holds no live keys.
    ///
    /// The bucket's history goes with it, so every content reference it held
    /// is released. Blobs are reclaimed by [`collect_garbage`](Self::collect_garbage).
    #[instrument(skip(self))]
    pub async fn delete_bucket(&self, name: &str) -> Result<()> {
        let _registry = self.registry.lock().await;
        let bucket = self.bucket(name)?;

        bucket.close_if_empty().await?;
        if let Err(err) = self.index.remove_bucket(name).await {
            bucket.reopen().await;
            return Err(err);
        }
        self.buckets.remove(name);

        // The bucket is already gone; a bad refcount only delays reclamation.
        let digests = bucket.referenced_digests();
        for digest in &digests {
            if let Err(err) = self.content.release(digest) {
                warn!(bucket = %name, %digest, error = %err, "Failed to release blob reference");
            }
        }

        info!(bucket = %name, released = digests.len(), "Bucket deleted");
        Ok(())
    }

    /// Every bucket, oldest first
    pub fn list_buckets(&self) -> Vec<BucketMetadata> {
        let mut buckets: Vec<BucketMetadata> = self
            .buckets
            .iter()
            .map(|entry| entry.value().metadata().clone())
            .collect();
        buckets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        buckets
    }

    /// Physically remove blobs no version references
    pub async fn collect_garbage(&self) -> Result<GcReport> {
        Ok(self.content.collect_garbage().await?)
    }

    /// Current counters
    pub fn stats(&self) -> EngineStats {
        let mut stats = EngineStats {
            buckets: self.buckets.len(),
            blobs: self.content.len(),
            stored_bytes: self.content.total_size(),
            ..EngineStats::default()
        };
        for entry in self.buckets.iter() {
            stats.live_keys += entry.value().live_key_count();
            stats.versions += entry.value().version_count();
        }
        stats
    }

    fn new_bucket(&self, metadata: BucketMetadata) -> Bucket<S> {
        Bucket::new(
            metadata,
            Arc::clone(&self.content),
            Arc::clone(&self.index),
            Arc::clone(&self.sequence),
        )
    }

    /// Rebuild buckets, ledgers and blob references from the index
    #[instrument(skip(self))]
    async fn replay(&self) -> Result<()> {
        let _registry = self.registry.lock().await;
        let snapshots = self.index.load().await?;
        let mut versions = 0;

        for snapshot in snapshots {
            let name = snapshot.metadata.name.clone();
            let bucket = self.new_bucket(snapshot.metadata);

            for (key, chain) in snapshot.ledgers {
                let ledger = VersionLedger::from_versions(key, chain)?;
                for version in ledger.versions() {
                    self.sequence.observe(version.id);
                    let Some(digest) = version.digest else {
                        continue;
                    };
                    self.content.retain(&digest).await.map_err(|err| match err {
                        BlockStoreError::NotFound(_) => CoreError::IndexCorruption(format!(
                            "{name}/{}: version {} references missing blob {digest}",
                            ledger.key(),
                            version.id
                        )),
                        other => other.into(),
                    })?;
                }
                versions += ledger.len();
                bucket.restore_ledger(ledger);
            }

            self.buckets.insert(name, Arc::new(bucket));
        }

        info!(buckets = self.buckets.len(), versions, "Replayed ledger index");
        Ok(())
    }
}
