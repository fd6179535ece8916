//! Content digests
//!
//! Every blob is identified by a CIDv1 with the raw codec and a BLAKE3-256
//! multihash. The canonical string form (base32, `bafkr...`) doubles as the
//! file name in the filesystem backend and as the entity tag exposed to
//! clients.

use crate::{BlockStoreError, Result};
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Multicodec code for raw binary data
pub const RAW_CODEC: u64 = 0x55;

/// Multihash code for BLAKE3-256
pub const BLAKE3_CODE: u64 = 0x1e;

/// Identity of a blob: the content address of its bytes
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentDigest(Cid);

impl ContentDigest {
    /// Digest the given bytes
    pub fn of(data: &[u8]) -> Self {
        let multihash = Code::Blake3_256.digest(data);
        Self(Cid::new_v1(RAW_CODEC, multihash))
    }

    /// Wrap an existing CID, rejecting anything that is not raw/BLAKE3
    pub fn from_cid(cid: Cid) -> Result<Self> {
        if cid.codec() != RAW_CODEC || cid.hash().code() != BLAKE3_CODE {
            return Err(BlockStoreError::InvalidDigest(format!(
                "unsupported codec {:#x} / hash {:#x}",
                cid.codec(),
                cid.hash().code()
            )));
        }
        Ok(Self(cid))
    }

    /// The underlying CID
    pub fn cid(&self) -> &Cid {
        &self.0
    }

    /// Raw BLAKE3 digest bytes
    pub fn hash_bytes(&self) -> &[u8] {
        self.0.hash().digest()
    }

    /// Entity tag form (quoted, as sent in the `ETag` header)
    pub fn etag(&self) -> String {
        format!("\"{}\"", self)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.0)
    }
}

impl FromStr for ContentDigest {
    type Err = BlockStoreError;

    fn from_str(s: &str) -> Result<Self> {
        let cid: Cid = s
            .parse()
            .map_err(|e: cid::Error| BlockStoreError::InvalidDigest(e.to_string()))?;
        Self::from_cid(cid)
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.to_string().serialize(s)
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
