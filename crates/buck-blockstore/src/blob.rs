//! Blob types and read handles

use crate::digest::ContentDigest;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncSeek};

/// Where a blob's bytes physically live
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobLocation {
    /// Held in process memory
    Memory,
    /// A file on the local filesystem
    File(PathBuf),
}

/// Bookkeeping for one stored blob
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobInfo {
    /// The content identifier
    pub digest: ContentDigest,
    /// Length in bytes
    pub size: u64,
    /// Physical location
    pub location: BlobLocation,
}

impl BlobInfo {
    /// Create blob info
    pub fn new(digest: ContentDigest, size: u64, location: BlobLocation) -> Self {
        Self {
            digest,
            size,
            location,
        }
    }
}

/// A readable, seekable view over a blob's bytes
pub trait BlobRead: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> BlobRead for T {}

/// Owned read handle returned by [`BlobStore::open_blob`](crate::BlobStore::open_blob).
///
/// Dropping the handle closes it.
pub type BlobHandle = Box<dyn BlobRead>;

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::{Cursor, SeekFrom};
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    #[tokio::test]
    async fn test_cursor_is_a_blob_handle() {
        let mut handle: BlobHandle = Box::new(Cursor::new(Bytes::from_static(b"hello")));
        handle.seek(SeekFrom::Start(1)).await.unwrap();

        let mut buf = String::new();
        handle.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "ello");
    }

    #[test]
    fn test_blob_info() {
        let digest = ContentDigest::of(b"abc");
        let info = BlobInfo::new(digest, 3, BlobLocation::Memory);
        assert_eq!(info.size, 3);
        assert_eq!(info.location, BlobLocation::Memory);
    }
}
