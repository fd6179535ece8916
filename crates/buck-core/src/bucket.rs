//! Buckets: a namespace of keys, each backed by a version ledger

use crate::{
    index::LedgerIndex,
    ledger::VersionLedger,
    metadata::{resolve_content_type, BucketMetadata, Version, VersionId, VersionSequence},
    range::{ByteRange, RangeReader},
    CoreError, Result,
};
use buck_blockstore::{BlobHandle, BlobStore, ContentDigest, ContentStore};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// Longest accepted object key, in bytes
pub const MAX_KEY_LEN: usize = 1024;

/// A resolved object version with an open handle on its content
pub struct ObjectRead {
    pub version: Arc<Version>,
    pub handle: BlobHandle,
}

impl std::fmt::Debug for ObjectRead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRead")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// A resolved object version wrapped for (possibly ranged) streaming
#[derive(Debug)]
pub struct ObjectDownload {
    pub version: Arc<Version>,
    pub reader: RangeReader<BlobHandle>,
}

/// A bucket and the ledgers of every key it has ever held
pub struct Bucket<S: BlobStore> {
    metadata: BucketMetadata,
    ledgers: DashMap<String, Arc<VersionLedger>>,
    content: Arc<ContentStore<S>>,
    index: Arc<dyn LedgerIndex>,
    sequence: Arc<VersionSequence>,
    /// `false` once the bucket has been removed from the engine. Writers
    /// hold it shared; deletion takes it exclusively.
    open: RwLock<bool>,
}

impl<S: BlobStore> Bucket<S> {
    pub(crate) fn new(
        metadata: BucketMetadata,
        content: Arc<ContentStore<S>>,
        index: Arc<dyn LedgerIndex>,
        sequence: Arc<VersionSequence>,
    ) -> Self {
        Self {
            metadata,
            ledgers: DashMap::new(),
            content,
            index,
            sequence,
            open: RwLock::new(true),
        }
    }

    /// Get bucket name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Get bucket metadata
    pub fn metadata(&self) -> &BucketMetadata {
        &self.metadata
    }

    /// Upload `data` under `key`, guessing the MIME type from the key
    pub async fn put_object(&self, key: &str, data: Bytes) -> Result<Arc<Version>> {
        self.put_object_with(key, data, None).await
    }

    /// Upload `data` under `key` as a new head version.
    ///
    /// The blob is stored (or deduplicated) first, then the version is
    /// persisted to the index, and only then linked into the ledger. If any
    /// step fails nothing becomes visible and the blob reference is dropped.
    #[instrument(skip(self, data), fields(bucket = %self.metadata.name, size = data.len()))]
    pub async fn put_object_with(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<Arc<Version>> {
        let key = normalize_key(key)?;
        let open = self.open.read().await;
        if !*open {
            return Err(CoreError::NoSuchBucket(self.metadata.name.clone()));
        }

        let content_type = resolve_content_type(&key, content_type);
        let blob = self.content.put(data).await?;

        let ledger = self.ledger_entry(&key);
        let mut writer = ledger.lock().await;
        let version = Version::content(
            self.sequence.next_id(),
            writer.parent_id(),
            blob.digest,
            blob.size,
            content_type,
        );

        if let Err(err) = self.index.append_version(self.name(), &key, &version).await {
            self.release(&blob.digest);
            return Err(err);
        }
        let version = writer.append(version)?;

        debug!(%key, version = %version.id, digest = %blob.digest, "Linked new version");
        Ok(version)
    }

    /// Resolve a version and open its content.
    ///
    /// Without `version_id` the head is used. A tombstone, an unknown key or
    /// a version id outside this key's ledger all read as `NoSuchKey`.
    #[instrument(skip(self), fields(bucket = %self.metadata.name))]
    pub async fn get_object(&self, key: &str, version_id: Option<VersionId>) -> Result<ObjectRead> {
        let (version, digest) = self.resolve(key, version_id)?;
        let handle = self.content.get(&digest).await?;
        Ok(ObjectRead { version, handle })
    }

    /// Same resolution as [`get_object`](Self::get_object) without opening the blob
    pub fn head_object(&self, key: &str, version_id: Option<VersionId>) -> Result<Arc<Version>> {
        self.resolve(key, version_id).map(|(version, _)| version)
    }

    /// Resolve a version and prepare a streaming read of it.
    ///
    /// `range` is the raw `Range` header value, if the client sent one.
    pub async fn download(
        &self,
        key: &str,
        version_id: Option<VersionId>,
        range: Option<&str>,
    ) -> Result<ObjectDownload> {
        let (version, digest) = self.resolve(key, version_id)?;
        let requested = range
            .map(ByteRange::parse)
            .transpose()
            .map_err(|e| e.with_range_length(version.size))?;

        let handle = self.content.get(&digest).await?;
        let reader = RangeReader::new(handle, version.size, requested).await?;
        Ok(ObjectDownload { version, reader })
    }

    /// Record a deletion of `key` by appending a tombstone.
    ///
    /// Blobs are never touched. Deleting an already deleted key appends
    /// another tombstone.
    #[instrument(skip(self), fields(bucket = %self.metadata.name))]
    pub async fn delete_object(&self, key: &str) -> Result<Arc<Version>> {
        let key = normalize_key(key)?;
        let open = self.open.read().await;
        if !*open {
            return Err(CoreError::NoSuchBucket(self.metadata.name.clone()));
        }

        let ledger = self
            .ledger(&key)
            .ok_or_else(|| CoreError::no_such_key(self.name(), &key))?;
        let mut writer = ledger.lock().await;
        let Some(parent) = writer.parent_id() else {
            return Err(CoreError::no_such_key(self.name(), &key));
        };

        let tombstone = Version::tombstone(self.sequence.next_id(), Some(parent));
        self.index.append_version(self.name(), &key, &tombstone).await?;
        let tombstone = writer.append(tombstone)?;

        debug!(%key, version = %tombstone.id, "Linked tombstone");
        Ok(tombstone)
    }

    /// Keys whose head is not a tombstone, in lexicographic order
    pub fn list_object_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .ledgers
            .iter()
            .filter(|entry| entry.value().is_live())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Full history of `key`, newest first
    pub fn list_versions(&self, key: &str) -> Result<Vec<Arc<Version>>> {
        let key = normalize_key(key)?;
        match self.ledger(&key) {
            Some(ledger) if !ledger.is_empty() => Ok(ledger.versions()),
            _ => Err(CoreError::no_such_key(self.name(), &key)),
        }
    }

    /// Ledger for `key`, if the key has ever been written
    pub fn ledger(&self, key: &str) -> Option<Arc<VersionLedger>> {
        self.ledgers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of keys with a live head
    pub fn live_key_count(&self) -> usize {
        self.ledgers.iter().filter(|entry| entry.value().is_live()).count()
    }

    /// Number of versions across all ledgers
    pub fn version_count(&self) -> usize {
        self.ledgers.iter().map(|entry| entry.value().len()).sum()
    }

    fn ledger_entry(&self, key: &str) -> Arc<VersionLedger> {
        Arc::clone(
            self.ledgers
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(VersionLedger::new(key)))
                .value(),
        )
    }

    fn resolve(&self, key: &str, version_id: Option<VersionId>) -> Result<(Arc<Version>, ContentDigest)> {
        let key = normalize_key(key)?;
        let missing = || CoreError::no_such_key(self.name(), &key);

        let ledger = self.ledger(&key).ok_or_else(missing)?;
        let version = match version_id {
            Some(id) => ledger.get(id),
            None => ledger.head(),
        }
        .ok_or_else(missing)?;

        let digest = version.digest.ok_or_else(missing)?;
        Ok((version, digest))
    }

    fn release(&self, digest: &ContentDigest) {
        if let Err(err) = self.content.release(digest) {
            warn!(%digest, error = %err, "Failed to release blob reference");
        }
    }

    /// Install a ledger rebuilt from the index
    pub(crate) fn restore_ledger(&self, ledger: VersionLedger) {
        self.ledgers
            .insert(ledger.key().to_string(), Arc::new(ledger));
    }

    /// Refuse further writes if no key is live.
    ///
    /// Waits for in-flight writes; a write that lands first makes the bucket
    /// non-empty.
    pub(crate) async fn close_if_empty(&self) -> Result<()> {
        let mut open = self.open.write().await;
        if !*open {
            return Err(CoreError::NoSuchBucket(self.metadata.name.clone()));
        }
        if self.ledgers.iter().any(|entry| entry.value().is_live()) {
            return Err(CoreError::BucketNotEmpty(self.metadata.name.clone()));
        }
        *open = false;
        Ok(())
    }

    /// Undo [`close_if_empty`](Self::close_if_empty) after a failed removal
    pub(crate) async fn reopen(&self) {
        *self.open.write().await = true;
    }

    /// One digest per content version, for releasing on removal
    pub(crate) fn referenced_digests(&self) -> Vec<ContentDigest> {
        self.ledgers
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .versions()
                    .into_iter()
                    .filter_map(|version| version.digest)
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Validate bucket name according to S3 rules
pub fn validate_bucket_name(name: &str) -> Result<()> {
    if name.len() < 3 || name.len() > 63 {
        return Err(CoreError::InvalidBucketName(
            "Bucket name must be between 3 and 63 characters".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(CoreError::InvalidBucketName(
            "Bucket name can only contain lowercase letters, numbers, hyphens, and periods"
                .to_string(),
        ));
    }

    if name.starts_with(['-', '.']) || name.ends_with(['-', '.']) {
        return Err(CoreError::InvalidBucketName(
            "Bucket name cannot start or end with a hyphen or period".to_string(),
        ));
    }

    if name.parse::<std::net::Ipv4Addr>().is_ok() {
        return Err(CoreError::InvalidBucketName(
            "Bucket name cannot be formatted as an IP address".to_string(),
        ));
    }

    Ok(())
}

/// Case-fold and validate an object key
pub fn normalize_key(key: &str) -> Result<String> {
    let key = key.to_lowercase();
    if key.is_empty() {
        return Err(CoreError::InvalidObjectKey("Key cannot be empty".to_string()));
    }

    if key.len() > MAX_KEY_LEN {
        return Err(CoreError::InvalidObjectKey(format!(
            "Key cannot exceed {MAX_KEY_LEN} bytes"
        )));
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{BucketSnapshot, MemoryIndex};
    use crate::metadata::{Owner, DEFAULT_CONTENT_TYPE};
    use crate::range::RangeStatus;
    use buck_blockstore::MemoryBlobStore;
    use futures::TryStreamExt;
    use rstest::rstest;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::io::AsyncReadExt;

    fn bucket() -> Bucket<MemoryBlobStore> {
        Bucket::new(
            BucketMetadata::new("test-bucket", Owner::new("user123")),
            Arc::new(ContentStore::new(MemoryBlobStore::new())),
            Arc::new(MemoryIndex),
            Arc::new(VersionSequence::default()),
        )
    }

    async fn read_all(read: ObjectRead) -> Vec<u8> {
        let mut handle = read.handle;
        let mut out = Vec::new();
        handle.read_to_end(&mut out).await.unwrap();
        out
    }

    #[rstest]
    #[case("my-bucket")]
    #[case("my.bucket.name")]
    #[case("bucket123")]
    #[case("abc")]
    #[case("1.2.3.4.5")]
    fn test_valid_bucket_names(#[case] name: &str) {
        assert!(validate_bucket_name(name).is_ok());
    }

    #[rstest]
    #[case("ab")]
    #[case("-bucket")]
    #[case("bucket-")]
    #[case(".bucket")]
    #[case("bucket.")]
    #[case("Bucket")]
    #[case("my_bucket")]
    #[case("192.168.0.1")]
    #[case("a123456789a123456789a123456789a123456789a123456789a123456789abcd")]
    fn test_invalid_bucket_names(#[case] name: &str) {
        assert!(matches!(
            validate_bucket_name(name),
            Err(CoreError::InvalidBucketName(_))
        ));
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("Dir/File.TXT").unwrap(), "dir/file.txt");
        assert!(matches!(normalize_key(""), Err(CoreError::InvalidObjectKey(_))));
        assert!(normalize_key(&"k".repeat(MAX_KEY_LEN)).is_ok());
        assert!(normalize_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let bucket = bucket();
        let version = bucket
            .put_object("hello.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        assert_eq!(version.parent, None);
        assert_eq!(version.size, 5);
        assert_eq!(version.content_type, "text/plain");
        assert_eq!(version.digest, Some(ContentDigest::of(b"hello")));

        let read = bucket.get_object("hello.txt", None).await.unwrap();
        assert_eq!(read.version.id, version.id);
        assert_eq!(read_all(read).await, b"hello");
    }

    #[tokio::test]
    async fn test_keys_are_case_folded() {
        let bucket = bucket();
        bucket
            .put_object("Photos/Cat.JPG", Bytes::from_static(b"meow"))
            .await
            .unwrap();

        assert!(bucket.get_object("photos/cat.jpg", None).await.is_ok());
        assert_eq!(bucket.list_object_keys(), vec!["photos/cat.jpg"]);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_history() {
        let bucket = bucket();
        let v1 = bucket.put_object("k", Bytes::from_static(b"one")).await.unwrap();
        let v2 = bucket.put_object("k", Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(v2.parent, Some(v1.id));
        let head = bucket.get_object("k", None).await.unwrap();
        assert_eq!(read_all(head).await, b"two");

        let old = bucket.get_object("k", Some(v1.id)).await.unwrap();
        assert_eq!(read_all(old).await, b"one");

        let history: Vec<_> = bucket.list_versions("k").unwrap().iter().map(|v| v.id).collect();
        assert_eq!(history, vec![v2.id, v1.id]);
    }

    #[tokio::test]
    async fn test_content_type_resolution() {
        let bucket = bucket();
        let declared = bucket
            .put_object_with("data.bin", Bytes::from_static(b"{}"), Some("application/json"))
            .await
            .unwrap();
        assert_eq!(declared.content_type, "application/json");

        let unknown = bucket
            .put_object("noext", Bytes::from_static(b"?"))
            .await
            .unwrap();
        assert_eq!(unknown.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_delete_appends_tombstone() {
        let bucket = bucket();
        let v1 = bucket.put_object("k", Bytes::from_static(b"data")).await.unwrap();
        let tombstone = bucket.delete_object("k").await.unwrap();

        assert!(tombstone.is_tombstone());
        assert_eq!(tombstone.parent, Some(v1.id));
        assert!(matches!(
            bucket.get_object("k", None).await,
            Err(CoreError::NoSuchKey { .. })
        ));
        assert!(bucket.list_object_keys().is_empty());

        // The old version and its blob are still there
        let old = bucket.get_object("k", Some(v1.id)).await.unwrap();
        assert_eq!(read_all(old).await, b"data");
        assert_eq!(bucket.content.refcount(&ContentDigest::of(b"data")), 1);

        // Explicitly addressing the tombstone reads as absent too
        assert!(bucket.get_object("k", Some(tombstone.id)).await.is_err());

        let again = bucket.delete_object("k").await.unwrap();
        assert_eq!(again.parent, Some(tombstone.id));
    }

    #[tokio::test]
    async fn test_missing_keys() {
        let bucket = bucket();
        assert!(matches!(
            bucket.get_object("nope", None).await,
            Err(CoreError::NoSuchKey { .. })
        ));
        assert!(matches!(
            bucket.delete_object("nope").await,
            Err(CoreError::NoSuchKey { .. })
        ));
        assert!(bucket.list_versions("nope").is_err());

        bucket.put_object("yes", Bytes::from_static(b"1")).await.unwrap();
        let foreign = bucket.put_object("other", Bytes::from_static(b"2")).await.unwrap();
        assert!(matches!(
            bucket.get_object("yes", Some(foreign.id)).await,
            Err(CoreError::NoSuchKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_identical_content_shares_one_blob() {
        let bucket = bucket();
        let a = bucket.put_object("a", Bytes::from_static(b"same")).await.unwrap();
        let b = bucket.put_object("b", Bytes::from_static(b"same")).await.unwrap();

        assert_eq!(a.digest, b.digest);
        assert_eq!(bucket.content.len(), 1);
        assert_eq!(bucket.content.refcount(&ContentDigest::of(b"same")), 2);
        assert_eq!(bucket.content.backend().write_count(), 1);
    }

    #[tokio::test]
    async fn test_download_range() {
        let bucket = bucket();
        bucket.put_object("k", Bytes::from_static(b"hello")).await.unwrap();

        let download = bucket.download("k", None, Some("bytes=1-3")).await.unwrap();
        assert_eq!(download.reader.status(), RangeStatus::Partial);
        assert_eq!(download.reader.content_range().as_deref(), Some("bytes 1-3/5"));

        let chunks: Vec<Bytes> = download.reader.into_stream().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"ell");
    }

    #[tokio::test]
    async fn test_download_bad_range_carries_length() {
        let bucket = bucket();
        bucket.put_object("k", Bytes::from_static(b"hello")).await.unwrap();

        for header in ["bytes=7-9", "bytes=1-2,3-4"] {
            let err = bucket.download("k", None, Some(header)).await.err().unwrap();
            assert!(matches!(err, CoreError::InvalidRange { length: Some(5) }));
        }
    }

    #[tokio::test]
    async fn test_close_if_empty() {
        let bucket = bucket();
        bucket.put_object("k", Bytes::from_static(b"x")).await.unwrap();
        assert!(matches!(
            bucket.close_if_empty().await,
            Err(CoreError::BucketNotEmpty(_))
        ));

        bucket.delete_object("k").await.unwrap();
        bucket.close_if_empty().await.unwrap();

        // Closed buckets refuse writes
        assert!(matches!(
            bucket.put_object("k", Bytes::from_static(b"y")).await,
            Err(CoreError::NoSuchBucket(_))
        ));
        assert_eq!(bucket.referenced_digests(), vec![ContentDigest::of(b"x")]);

        bucket.reopen().await;
        bucket.put_object("k", Bytes::from_static(b"y")).await.unwrap();
    }

    /// Index whose appends fail while `broken` is set
    #[derive(Default)]
    struct FlakyIndex {
        broken: AtomicBool,
    }

    #[async_trait::async_trait]
    impl LedgerIndex for FlakyIndex {
        async fn put_bucket(&self, _bucket: &BucketMetadata) -> Result<()> {
            Ok(())
        }

        async fn remove_bucket(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn append_version(&self, _bucket: &str, _key: &str, _version: &Version) -> Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(CoreError::IoFailure("disk full".to_string()));
            }
            Ok(())
        }

        async fn load(&self) -> Result<Vec<BucketSnapshot>> {
            Ok(Vec::new())
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_index_append_leaves_no_trace() {
        let index = Arc::new(FlakyIndex::default());
        let bucket = Bucket::new(
            BucketMetadata::new("test-bucket", Owner::new("user123")),
            Arc::new(ContentStore::new(MemoryBlobStore::new())),
            Arc::clone(&index) as Arc<dyn LedgerIndex>,
            Arc::new(VersionSequence::default()),
        );
        let old = ContentDigest::of(b"v1");
        let new = ContentDigest::of(b"v2");

        let v1 = bucket.put_object("k", Bytes::from_static(b"v1")).await.unwrap();
        index.broken.store(true, Ordering::SeqCst);

        let err = bucket.put_object("k", Bytes::from_static(b"v2")).await.unwrap_err();
        assert!(matches!(err, CoreError::IoFailure(_)));
        assert_eq!(bucket.head_object("k", None).unwrap().id, v1.id);
        assert_eq!(bucket.list_versions("k").unwrap().len(), 1);
        assert_eq!(bucket.content.refcount(&old), 1);
        assert_eq!(bucket.content.refcount(&new), 0);

        // A key that never made it into the index stays absent
        assert!(bucket.put_object("fresh", Bytes::from_static(b"v2")).await.is_err());
        assert!(matches!(
            bucket.get_object("fresh", None).await,
            Err(CoreError::NoSuchKey { .. })
        ));
        assert!(bucket.list_versions("fresh").is_err());
        assert_eq!(bucket.list_object_keys(), vec!["k".to_string()]);

        // Tombstones are not linked either
        assert!(bucket.delete_object("k").await.is_err());
        assert_eq!(bucket.head_object("k", None).unwrap().id, v1.id);

        index.broken.store(false, Ordering::SeqCst);
        let v2 = bucket.put_object("k", Bytes::from_static(b"v2")).await.unwrap();
        assert_eq!(v2.parent, Some(v1.id));
        assert_eq!(bucket.content.refcount(&new), 1);
    }
}
