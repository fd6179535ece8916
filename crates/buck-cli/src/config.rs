//! Gateway configuration

use buck_core::{EngineConfig, Owner, Region};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Gateway server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Directory for blobs and the ledger index
    pub data_dir: PathBuf,
    /// Use in-memory storage (for testing/development)
    pub use_memory_store: bool,
    /// Region reported for new buckets
    pub region: String,
    /// Owner recorded on new buckets and reported in listings
    pub owner_id: String,
    /// Attempts for a transient storage failure
    pub max_retries: u32,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Enable CORS
    pub cors_enabled: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            data_dir: PathBuf::from("/tmp/buck-store"),
            use_memory_store: false,
            region: buck_core::metadata::DEFAULT_REGION.to_string(),
            owner_id: Owner::default().id,
            max_retries: buck_blockstore::DEFAULT_MAX_RETRIES,
            max_body_size: 5 * 1024 * 1024 * 1024, // 5 GB
            cors_enabled: true,
        }
    }
}

impl GatewayConfig {
    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Owner of buckets created through this gateway
    pub fn owner(&self) -> Owner {
        Owner::new(&self.owner_id)
    }

    /// Storage engine settings derived from this configuration
    pub fn engine_config(&self) -> EngineConfig {
        let base = if self.use_memory_store {
            EngineConfig::in_memory()
        } else {
            EngineConfig::persistent(&self.data_dir)
        };
        base.with_max_retries(self.max_retries)
            .with_region(Region::new(&self.region))
            .with_owner(self.owner())
    }
}
