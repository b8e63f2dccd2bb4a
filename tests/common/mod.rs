//! Common test utilities and fixtures
#![allow(dead_code)]

use agent_factory::{
    config::{AppConfig, CredentialSlot, RotationConfig},
    storage::{CredentialRecord, InMemoryStore},
    upstream::{CompletionRequest, PerplexityClient, TransportError, UpstreamClient, UpstreamResponse},
    AppState, KeyManager,
};
use async_trait::async_trait;
use axum::{body::Bytes, http::StatusCode};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Rotation policy with no waiting between attempts.
pub fn fast_policy() -> RotationConfig {
    RotationConfig {
        retry_delay_secs: 0,
        ..RotationConfig::default()
    }
}

/// Secrets long enough to get a real preview.
pub fn secret(name: &str) -> String {
    format!("pplx-{name}-0123456789")
}

pub fn records(names: &[&str]) -> Vec<CredentialRecord> {
    names
        .iter()
        .map(|name| CredentialRecord::new(format!("key_{name}"), secret(name)))
        .collect()
}

pub fn slots(values: &[Option<&str>]) -> Vec<CredentialSlot> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| CredentialSlot::new(i + 1, v.map(str::to_string)))
        .collect()
}

pub fn manager_with(names: &[&str]) -> (Arc<KeyManager>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let manager = KeyManager::from_records(records(names), store.clone(), fast_policy())
        .expect("non-empty pool");
    (Arc::new(manager), store)
}

/// Configuration pointing the upstream client at `base_url`.
pub fn config_for(base_url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.upstream.base_url = base_url.to_string();
    config.upstream.request_timeout_secs = 5;
    config.rotation = fast_policy();
    config
}

pub fn client_for(base_url: &str) -> PerplexityClient {
    PerplexityClient::new(&config_for(base_url).upstream).expect("Failed to build client")
}

pub fn app_state(config: AppConfig, manager: Arc<KeyManager>) -> Arc<AppState> {
    let client = PerplexityClient::new(&config.upstream).expect("Failed to build client");
    Arc::new(AppState::with_components(config, manager, Arc::new(client)))
}

pub fn completion_body() -> Value {
    json!({
        "id": "cmpl-1",
        "model": "llama-3.1-sonar-large-128k-online",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Agents are ready."}
        }],
        "citations": ["https://perplexity.ai"]
    })
}

/// Upstream that answers from a fixed script without touching the network.
/// The last scripted response repeats once the script runs out.
pub struct ScriptedUpstream {
    responses: Mutex<VecDeque<(StatusCode, &'static str)>>,
    calls: AtomicUsize,
}

impl ScriptedUpstream {
    pub fn new(responses: Vec<(StatusCode, &'static str)>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn send(
        &self,
        _api_key: &SecretString,
        _request: &CompletionRequest,
    ) -> Result<UpstreamResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().expect("script lock poisoned");
        let (status, body) = if responses.len() > 1 {
            responses.pop_front().expect("non-empty script")
        } else {
            *responses.front().expect("script must not be empty")
        };
        Ok(UpstreamResponse {
            status,
            body: Bytes::from_static(body.as_bytes()),
        })
    }
}
