//! # Buck Core
//!
//! Versioned object storage engine for the Buck S3 gateway.
//!
//! This crate provides:
//! - **Storage Engine**: bucket registry over one shared content store
//! - **Buckets**: S3-style key namespaces with validation
//! - **Version Ledgers**: append-only per-key history with tombstones
//! - **Range Reads**: lazy chunked streaming of whole objects or byte ranges
//! - **Ledger Index**: durable replay of buckets and histories
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              S3 API Layer               │
//! ├─────────────────────────────────────────┤
//! │    StorageEngine    │   RangeReader     │
//! ├─────────────────────────────────────────┤
//! │   Bucket → VersionLedger   │ LedgerIndex│
//! ├─────────────────────────────────────────┤
//! │       ContentStore (buck-blockstore)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use buck_core::StorageEngine;
//!
//! let engine = StorageEngine::in_memory();
//! let bucket = engine.create_bucket("photos").await?;
//! let version = bucket.put_object("cat.png", data).await?;
//! let download = bucket.download("cat.png", None, Some("bytes=0-1023")).await?;
//! ```

pub mod bucket;
pub mod engine;
pub mod error;
pub mod index;
pub mod ledger;
pub mod metadata;
pub mod range;

pub use bucket::{normalize_key, validate_bucket_name, Bucket, ObjectDownload, ObjectRead};
pub use engine::{EngineConfig, EngineStats, StorageEngine};
pub use error::{CoreError, ErrorKind, Result};
pub use index::{BucketSnapshot, FsIndex, LedgerIndex, MemoryIndex};
pub use ledger::{LedgerWriter, VersionLedger};
pub use metadata::{BucketMetadata, Owner, Region, Version, VersionId, VersionSequence};
pub use range::{ByteRange, RangeReader, RangeStatus, RangeStream, ResolvedRange, DEFAULT_READ_CHUNK};
