//! Per-key version history
//!
//! A [`VersionLedger`] is an append-only chain of [`Version`]s for one key.
//! Writers serialize on an async lock held across the whole
//! construct-persist-link sequence; readers only touch a short synchronous
//! lock around the visible chain and never wait on a writer's I/O.

use crate::{
    metadata::{Version, VersionId},
    CoreError, Result,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Append-only version chain for one key
#[derive(Debug)]
pub struct VersionLedger {
    key: String,
    /// Oldest first; the last entry is the head
    chain: RwLock<Vec<Arc<Version>>>,
    writer: Mutex<()>,
}

impl VersionLedger {
    /// Create an empty ledger
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            chain: RwLock::new(Vec::new()),
            writer: Mutex::new(()),
        }
    }

    /// Rebuild a ledger from persisted versions, oldest first.
    ///
    /// Fails if the parent links do not form a single chain.
    pub fn from_versions(key: impl Into<String>, versions: Vec<Version>) -> Result<Self> {
        let key = key.into();
        let mut previous: Option<VersionId> = None;
        for version in &versions {
            if version.parent != previous {
                return Err(CoreError::IndexCorruption(format!(
                    "ledger for {key:?}: version {} has parent {:?}, expected {:?}",
                    version.id, version.parent, previous
                )));
            }
            if let Some(previous) = previous {
                if version.id <= previous {
                    return Err(CoreError::IndexCorruption(format!(
                        "ledger for {key:?}: version {} does not follow {previous}",
                        version.id
                    )));
                }
            }
            previous = Some(version.id);
        }

        Ok(Self {
            key,
            chain: RwLock::new(versions.into_iter().map(Arc::new).collect()),
            writer: Mutex::new(()),
        })
    }

    /// Key this ledger tracks
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Newest version, if any
    pub fn head(&self) -> Option<Arc<Version>> {
        self.chain.read().last().cloned()
    }

    /// Look up a version by id
    pub fn get(&self, id: VersionId) -> Option<Arc<Version>> {
        let chain = self.chain.read();
        // Ids increase along the chain.
        chain
            .binary_search_by_key(&id, |version| version.id)
            .ok()
            .map(|index| Arc::clone(&chain[index]))
    }

    /// Every version, newest first
    pub fn versions(&self) -> Vec<Arc<Version>> {
        self.chain.read().iter().rev().cloned().collect()
    }

    /// Number of versions, tombstones included
    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.read().is_empty()
    }

    /// Whether the head exists and is not a tombstone
    pub fn is_live(&self) -> bool {
        self.head().is_some_and(|head| !head.is_tombstone())
    }

    /// Wait for exclusive write access to this ledger
    pub async fn lock(&self) -> LedgerWriter<'_> {
        LedgerWriter {
            ledger: self,
            _guard: self.writer.lock().await,
        }
    }
}

/// Exclusive append access to a [`VersionLedger`]
///
/// While a writer is alive the head cannot move under it, so a version built
/// on [`LedgerWriter::head`] is guaranteed to link.
pub struct LedgerWriter<'a> {
    ledger: &'a VersionLedger,
    _guard: MutexGuard<'a, ()>,
}

impl LedgerWriter<'_> {
    /// Current head
    pub fn head(&self) -> Option<Arc<Version>> {
        self.ledger.head()
    }

    /// Id the next version must name as its parent
    pub fn parent_id(&self) -> Option<VersionId> {
        self.head().map(|head| head.id)
    }

    /// Link a fully built version as the new head
    pub fn append(&mut self, version: Version) -> Result<Arc<Version>> {
        let mut chain = self.ledger.chain.write();
        let head = chain.last().map(|head| head.id);
        if version.parent != head {
            return Err(CoreError::IndexCorruption(format!(
                "ledger for {:?}: version {} names parent {:?} but head is {:?}",
                self.ledger.key, version.id, version.parent, head
            )));
        }
        let version = Arc::new(version);
        chain.push(Arc::clone(&version));
        Ok(version)
    }
}
