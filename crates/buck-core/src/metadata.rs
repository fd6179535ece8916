//! Bucket and version metadata types

use buck_blockstore::ContentDigest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// MIME type used when neither the upload nor the key says otherwise
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Region reported for buckets created without one
pub const DEFAULT_REGION: &str = "us-east-1";

/// Identifier of a version within the engine
///
/// Ids come from one engine-wide sequence, so they are unique across every
/// bucket and key and increase along each ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(u64);

impl VersionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(Self)
    }
}

/// Source of fresh version ids
#[derive(Debug, Default)]
pub struct VersionSequence(AtomicU64);

impl VersionSequence {
    /// Allocate the next id
    pub fn next_id(&self) -> VersionId {
        VersionId(self.0.fetch_add(1, Ordering::SeqCst))
    }

    /// Make sure future ids are strictly greater than `seen`
    pub fn observe(&self, seen: VersionId) {
        self.0.fetch_max(seen.0 + 1, Ordering::SeqCst);
    }
}

/// One immutable entry of a key's history
///
/// `digest == None` marks a tombstone: the key was deleted at this point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub parent: Option<VersionId>,
    pub digest: Option<ContentDigest>,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    pub content_type: String,
}

impl Version {
    /// A version pointing at stored content
    pub fn content(
        id: VersionId,
        parent: Option<VersionId>,
        digest: ContentDigest,
        size: u64,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            id,
            parent,
            digest: Some(digest),
            created_at: Utc::now(),
            size,
            content_type: content_type.into(),
        }
    }

    /// A deletion marker
    pub fn tombstone(id: VersionId, parent: Option<VersionId>) -> Self {
        Self {
            id,
            parent,
            digest: None,
            created_at: Utc::now(),
            size: 0,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.digest.is_none()
    }

    /// Quoted entity tag, absent for tombstones
    pub fn etag(&self) -> Option<String> {
        self.digest.as_ref().map(ContentDigest::etag)
    }
}

/// Opaque region tag
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Region {
    fn default() -> Self {
        Self(DEFAULT_REGION.to_string())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owner information
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Owner ID
    pub id: String,
    /// Display name
    pub display_name: Option<String>,
}

impl Owner {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Name to show in listings, falling back to the id
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

impl Default for Owner {
    fn default() -> Self {
        Self::new("anonymous")
    }
}

/// Bucket metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketMetadata {
    /// Bucket name
    pub name: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Owner
    pub owner: Owner,

    /// Region tag
    #[serde(default)]
    pub region: Region,
}

impl BucketMetadata {
    /// Create new bucket metadata stamped with the current time
    pub fn new(name: impl Into<String>, owner: Owner) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            owner,
            region: Region::default(),
        }
    }

    /// Set the region
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    /// ARN-style resource name
    pub fn arn(&self) -> String {
        format!("arn:aws:s3:::{}", self.name)
    }
}

/// Pick the MIME type for an upload
///
/// An explicit, non-empty `Content-Type` wins; otherwise the key's extension
/// is consulted.
pub fn resolve_content_type(key: &str, declared: Option<&str>) -> String {
    match declared.map(str::trim) {
        Some(declared) if !declared.is_empty() => declared.to_string(),
        _ => mime_guess::from_path(key)
            .first_raw()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string(),
    }
}
