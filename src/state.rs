// src/state.rs

use crate::config::AppConfig;
use crate::error::Result;
use crate::key_manager::KeyManager;
use crate::storage::JsonFileStore;
use crate::upstream::{PerplexityClient, UpstreamClient};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Shared state handed to every axum handler.
pub struct AppState {
    pub config: AppConfig,
    pub key_manager: Arc<KeyManager>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub start_time: Instant,
}

impl AppState {
    /// Wires the file-backed key manager and the Perplexity client from
    /// configuration.
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Creating shared AppState: initializing KeyManager and HTTP client...");
        let store = Arc::new(JsonFileStore::new(&config.status_file));
        let key_manager =
            KeyManager::load(&config.credential_slots, store, config.rotation.clone()).await?;
        let upstream = PerplexityClient::new(&config.upstream)?;
        info!(endpoint = %upstream.endpoint(), "Upstream client ready");

        Ok(Self::with_components(
            config,
            Arc::new(key_manager),
            Arc::new(upstream),
        ))
    }

    pub fn with_components(
        config: AppConfig,
        key_manager: Arc<KeyManager>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            config,
            key_manager,
            upstream,
            start_time: Instant::now(),
        }
    }
}
