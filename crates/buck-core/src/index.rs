//! Durable record of buckets and ledgers
//!
//! The index is written after a blob is stored and before a version is
//! linked, so a crash can leave an orphan blob but never a version whose
//! content is missing.
//!
//! Filesystem layout under the data directory:
//!
//! ```text
//! index/buckets/<bucket>.json
//! index/ledgers/<bucket>/<hex(blake3(key))>.jsonl
//! ```
//!
//! Ledger file names are a fixed 64 characters whatever the key length, so
//! every record carries its key alongside the version.

use crate::{
    metadata::{BucketMetadata, Version},
    CoreError, Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Everything persisted for one bucket
#[derive(Clone, Debug)]
pub struct BucketSnapshot {
    pub metadata: BucketMetadata,
    /// `(key, versions oldest first)`
    pub ledgers: Vec<(String, Vec<Version>)>,
}

/// One line of a ledger file, as written
#[derive(Serialize)]
struct RecordRef<'a> {
    key: &'a str,
    version: &'a Version,
}

/// One line of a ledger file, as read back
#[derive(Deserialize)]
struct Record {
    key: String,
    version: Version,
}

/// Persistence for bucket records and version ledgers
#[async_trait]
pub trait LedgerIndex: Send + Sync {
    /// Record a newly created bucket
    async fn put_bucket(&self, bucket: &BucketMetadata) -> Result<()>;

    /// Forget a bucket and every ledger under it
    async fn remove_bucket(&self, name: &str) -> Result<()>;

    /// Durably append one version to a key's ledger
    async fn append_version(&self, bucket: &str, key: &str, version: &Version) -> Result<()>;

    /// Read back everything recorded
    async fn load(&self) -> Result<Vec<BucketSnapshot>>;
}

/// Index that keeps nothing: state lives only as long as the engine
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryIndex;

#[async_trait]
impl LedgerIndex for MemoryIndex {
    async fn put_bucket(&self, _bucket: &BucketMetadata) -> Result<()> {
        Ok(())
    }

    async fn remove_bucket(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn append_version(&self, _bucket: &str, _key: &str, _version: &Version) -> Result<()> {
        Ok(())
    }

    async fn load(&self) -> Result<Vec<BucketSnapshot>> {
        Ok(Vec::new())
    }
}

/// JSON-lines index stored next to the blobs
#[derive(Clone, Debug)]
pub struct FsIndex {
    root: PathBuf,
}

impl FsIndex {
    /// Open (and create if needed) an index under `data_dir/index`
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let root = data_dir.as_ref().join("index");
        fs::create_dir_all(root.join("buckets")).await?;
        fs::create_dir_all(root.join("ledgers")).await?;
        Ok(Self { root })
    }

    fn bucket_path(&self, name: &str) -> PathBuf {
        self.root.join("buckets").join(format!("{name}.json"))
    }

    fn ledger_dir(&self, bucket: &str) -> PathBuf {
        self.root.join("ledgers").join(bucket)
    }

    fn ledger_path(&self, bucket: &str, key: &str) -> PathBuf {
        let name = blake3::hash(key.as_bytes()).to_hex();
        self.ledger_dir(bucket).join(format!("{name}.jsonl"))
    }

    async fn load_ledgers(&self, bucket: &str) -> Result<Vec<(String, Vec<Version>)>> {
        let dir = self.ledger_dir(bucket);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ledgers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "jsonl") {
                warn!(path = %path.display(), "Ignoring foreign file in ledger directory");
                continue;
            }
            let text = fs::read_to_string(&path).await?;
            if let Some(ledger) = parse_ledger(&path, &text)? {
                ledgers.push(ledger);
            }
        }
        ledgers.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ledgers)
    }
}

/// Parse one ledger file into its key and versions, oldest first.
///
/// A final line without a newline is an append that was cut short; its
/// version was never linked, so it is dropped. Any other bad line, or a
/// record filed under another key, is corruption.
fn parse_ledger(path: &Path, text: &str) -> Result<Option<(String, Vec<Version>)>> {
    let complete = text.ends_with('\n');
    let lines: Vec<&str> = text.lines().collect();
    let corrupt = |n: usize, why: String| {
        CoreError::IndexCorruption(format!("{}:{}: {why}", path.display(), n + 1))
    };

    let mut key: Option<String> = None;
    let mut versions = Vec::with_capacity(lines.len());
    for (n, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = match serde_json::from_str::<Record>(line) {
            Ok(record) => record,
            Err(e) if !complete && n + 1 == lines.len() => {
                warn!(path = %path.display(), error = %e, "Dropping torn ledger record");
                continue;
            }
            Err(e) => return Err(corrupt(n, e.to_string())),
        };
        let expected = key.get_or_insert_with(|| record.key.clone());
        if *expected != record.key {
            return Err(corrupt(n, format!("record for key {:?}", record.key)));
        }
        versions.push(record.version);
    }
    Ok(key.map(|key| (key, versions)))
}

/// Cut an unterminated final line left by an interrupted append and return
/// the offset the next record goes at.
async fn trim_torn_tail(file: &mut fs::File, path: &Path) -> std::io::Result<u64> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(0);
    }
    file.seek(SeekFrom::Start(len - 1)).await?;
    if file.read_u8().await? == b'\n' {
        return Ok(len);
    }

    let mut body = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0)).await?;
    file.read_to_end(&mut body).await?;
    let end = body
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |at| at as u64 + 1);
    warn!(path = %path.display(), dropped = len - end, "Truncating torn ledger record");
    file.set_len(end).await?;
    Ok(end)
}

#[async_trait]
impl LedgerIndex for FsIndex {
    async fn put_bucket(&self, bucket: &BucketMetadata) -> Result<()> {
        let path = self.bucket_path(&bucket.name);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(bucket)?;

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        fs::rename(&tmp, &path).await?;

        debug!(bucket = %bucket.name, "Bucket record written");
        Ok(())
    }

    async fn remove_bucket(&self, name: &str) -> Result<()> {
        // Record first: a crash in between leaves a ledger directory that
        // load() ignores.
        match fs::remove_file(self.bucket_path(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match fs::remove_dir_all(self.ledger_dir(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn append_version(&self, bucket: &str, key: &str, version: &Version) -> Result<()> {
        fs::create_dir_all(self.ledger_dir(bucket)).await?;

        let mut line = serde_json::to_vec(&RecordRef { key, version })?;
        line.push(b'\n');

        let path = self.ledger_path(bucket, key);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;
        let end = trim_torn_tail(&mut file, &path).await?;
        file.seek(SeekFrom::Start(end)).await?;

        // A record that fails halfway is cut back off so the next append
        // starts on a fresh line.
        let written = async {
            file.write_all(&line).await?;
            file.sync_data().await
        }
        .await;
        if let Err(e) = written {
            if let Err(undo) = file.set_len(end).await {
                warn!(path = %path.display(), error = %undo, "Failed to roll back ledger append");
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn load(&self) -> Result<Vec<BucketSnapshot>> {
        let mut snapshots = Vec::new();
        let mut entries = fs::read_dir(self.root.join("buckets")).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let body = fs::read(&path).await?;
            let metadata: BucketMetadata = serde_json::from_slice(&body).map_err(|e| {
                CoreError::IndexCorruption(format!("{}: {e}", path.display()))
            })?;
            let ledgers = self.load_ledgers(&metadata.name).await?;
            snapshots.push(BucketSnapshot { metadata, ledgers });
        }

        // Ledger directories whose bucket record is gone belong to a delete
        // that was interrupted.
        let mut dirs = fs::read_dir(self.root.join("ledgers")).await?;
        while let Some(dir) = dirs.next_entry().await? {
            let name = dir.file_name();
            let name = name.to_string_lossy();
            if !snapshots.iter().any(|s| s.metadata.name == name) {
                warn!(bucket = %name, "Removing ledgers of a deleted bucket");
                fs::remove_dir_all(dir.path()).await?;
            }
        }

        snapshots.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(snapshots)
    }
}
