//! # Buck
//!
//! A versioned, content-addressed object store with an S3-compatible
//! gateway. This crate re-exports the workspace members:
//!
//! - [`blockstore`]: content-addressed blob storage with reference counts
//! - [`engine`]: buckets, version ledgers, and range reads
//! - [`gateway`]: the HTTP server

pub use buck_blockstore as blockstore;
pub use buck_cli as gateway;
pub use buck_core as engine;

pub use buck_core::{Bucket, CoreError, EngineConfig, StorageEngine};
