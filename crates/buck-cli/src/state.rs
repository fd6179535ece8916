//! Application state

use crate::config::GatewayConfig;
use buck_core::StorageEngine;
use std::sync::Arc;
use tracing::{info, warn};

/// Application state shared across handlers
pub struct AppState {
    /// Gateway configuration
    pub config: GatewayConfig,
    /// Storage engine
    pub engine: Arc<StorageEngine>,
}

impl AppState {
    /// Open the storage engine described by `config`
    pub async fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let engine = StorageEngine::open(&config.engine_config()).await?;

        if engine.content().backend().is_persistent() {
            info!(data_dir = %config.data_dir.display(), "Storage mode: filesystem (persistent)");
        } else {
            warn!("Storage mode: in-memory (NOT persistent - for development only)");
        }

        let stats = engine.stats();
        info!(
            buckets = stats.buckets,
            versions = stats.versions,
            blobs = stats.blobs,
            "Storage engine ready"
        );

        Ok(Self::with_engine(config, Arc::new(engine)))
    }

    /// Wrap an already opened engine
    pub fn with_engine(config: GatewayConfig, engine: Arc<StorageEngine>) -> Self {
        Self { config, engine }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_state_reopens_persisted_engine() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let state = AppState::new(config.clone()).await.unwrap();
        assert!(state.engine.content().backend().is_persistent());
        state.engine.create_bucket("kept").await.unwrap();
        drop(state);

        let state = AppState::new(config).await.unwrap();
        assert!(state.engine.head_bucket("kept"));
    }

    #[tokio::test]
    async fn test_memory_state() {
        let config = GatewayConfig {
            use_memory_store: true,
            ..Default::default()
        };
        let state = AppState::new(config).await.unwrap();
        assert!(!state.engine.content().backend().is_persistent());
        assert!(state.engine.list_buckets().is_empty());
    }
}
