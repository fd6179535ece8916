//! # Buck Gateway
//!
//! S3-compatible HTTP gateway over the Buck versioned storage engine.
//!
//! This crate provides:
//! - **S3 API**: buckets, versioned objects, ranged and conditional reads
//! - **Error Mapping**: engine outcomes rendered as S3 `<Error>` documents
//! - **Server**: axum router, request ids, access logging, graceful shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   HTTP Clients                      │
//! │           (boto3, AWS SDK, curl, etc.)              │
//! └─────────────────────────┬───────────────────────────┘
//!                           │
//! ┌─────────────────────────▼───────────────────────────┐
//! │                    Buck Gateway                     │
//! ├─────────────────────────────────────────────────────┤
//! │    Request Id │ Access Log │ CORS │ Body Limit      │
//! ├─────────────────────────────────────────────────────┤
//! │               S3 API Handlers                       │
//! │  (PutObject, GetObject, ListObjects, etc.)          │
//! ├─────────────────────────────────────────────────────┤
//! │                   buck-core                         │
//! │      (Buckets, Version Ledgers, Range Reads)        │
//! ├─────────────────────────────────────────────────────┤
//! │                 buck-blockstore                     │
//! │       (Content-addressed blobs, refcounts)          │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;
pub mod xml;

pub use config::GatewayConfig;
pub use error::{ApiError, S3ErrorCode};
pub use server::{run_server, run_server_with_shutdown, serve};
pub use state::AppState;
