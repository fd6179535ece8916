//! Filesystem blob store
//!
//! Layout under the root directory:
//!
//! ```text
//! blobs/<first digest byte, hex>/<digest>
//! tmp/<digest>.<n>
//! ```
//!
//! Writes land in `tmp/` and are renamed into `blobs/`, so a blob file is
//! either complete or absent.

use crate::{BlobHandle, BlobLocation, BlobStore, BlockStoreError, ContentDigest, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

/// Blob store backed by a local directory
pub struct FsBlobStore {
    root: PathBuf,
    tmp_seq: AtomicU64,
}

impl FsBlobStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("blobs")).await?;

        // Leftovers from an interrupted write are never referenced.
        let tmp = root.join("tmp");
        if fs::try_exists(&tmp).await? {
            fs::remove_dir_all(&tmp).await?;
        }
        fs::create_dir_all(&tmp).await?;

        Ok(Self {
            root,
            tmp_seq: AtomicU64::new(0),
        })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of a blob
    pub fn blob_path(&self, digest: &ContentDigest) -> PathBuf {
        let fan_out = format!("{:02x}", digest.hash_bytes().first().copied().unwrap_or(0));
        self.root.join("blobs").join(fan_out).join(digest.to_string())
    }

    fn tmp_path(&self, digest: &ContentDigest) -> PathBuf {
        let n = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        self.root.join("tmp").join(format!("{}.{}", digest, n))
    }
}

fn not_found_as(digest: &ContentDigest, err: std::io::Error) -> BlockStoreError {
    if err.kind() == ErrorKind::NotFound {
        BlockStoreError::NotFound(*digest)
    } else {
        BlockStoreError::Io(err)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn write_blob(&self, digest: &ContentDigest, data: Bytes) -> Result<BlobLocation> {
        let path = self.blob_path(digest);
        if fs::try_exists(&path).await? {
            return Ok(BlobLocation::File(path));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.tmp_path(digest);
        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(err) = written {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(error = %cleanup, path = %tmp.display(), "Failed to remove temp blob");
                }
            }
            return Err(err.into());
        }

        debug!(%digest, path = %path.display(), "Blob written");
        Ok(BlobLocation::File(path))
    }

    async fn open_blob(&self, digest: &ContentDigest) -> Result<BlobHandle> {
        let file = fs::File::open(self.blob_path(digest))
            .await
            .map_err(|e| not_found_as(digest, e))?;
        Ok(Box::new(file))
    }

    async fn has_blob(&self, digest: &ContentDigest) -> Result<bool> {
        Ok(fs::try_exists(self.blob_path(digest)).await?)
    }

    async fn delete_blob(&self, digest: &ContentDigest) -> Result<()> {
        match fs::remove_file(self.blob_path(digest)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn blob_size(&self, digest: &ContentDigest) -> Result<u64> {
        let meta = fs::metadata(self.blob_path(digest))
            .await
            .map_err(|e| not_found_as(digest, e))?;
        Ok(meta.len())
    }

    async fn list_blobs(&self) -> Result<Vec<ContentDigest>> {
        let mut digests = Vec::new();
        let mut fan_outs = fs::read_dir(self.root.join("blobs")).await?;
        while let Some(dir) = fan_outs.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(dir.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                match name.to_str().map(str::parse::<ContentDigest>) {
                    Some(Ok(digest)) => digests.push(digest),
                    _ => warn!(path = %entry.path().display(), "Ignoring foreign file in blob directory"),
                }
            }
        }
        digests.sort();
        Ok(digests)
    }

    fn location(&self, digest: &ContentDigest) -> BlobLocation {
        BlobLocation::File(self.blob_path(digest))
    }
}
