// src/key_manager.rs

use crate::config::{CredentialSlot, RotationConfig};
use crate::error::{AppError, Result};
use crate::handlers::{
    classify_transport_error, next_action, Action, CallOutcome, ResponseProcessor,
};
use crate::storage::{
    CredentialRecord, KeyHealth, PersistedStatus, StatusStore, STATUS_SCHEMA_VERSION,
};
use crate::upstream::{CompletionRequest, UpstreamClient};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Key handed out for a single attempt.
#[derive(Debug, Clone)]
pub struct SelectedKey {
    pub key_id: String,
    pub secret: SecretString,
    pub preview: String,
}

/// Read-only view of one credential for dashboards. Never carries the secret.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KeyStatus {
    pub key_id: String,
    pub key_preview: String,
    pub is_active: bool,
    pub credits_exhausted: bool,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
    pub retry_after: Option<DateTime<Utc>>,
    pub health: KeyHealth,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PoolStatus {
    pub total_keys: usize,
    /// Active and not exhausted.
    pub active_keys: usize,
    pub exhausted_keys: usize,
    /// Selectable right now, cooldowns and suspensions included.
    pub available_keys: usize,
    pub current_key: usize,
    pub keys: Vec<KeyStatus>,
}

/// Ordered credentials plus the advisory cursor.
#[derive(Debug)]
struct Pool {
    records: Vec<CredentialRecord>,
    cursor: usize,
}

impl Pool {
    fn new(records: Vec<CredentialRecord>, cursor: usize) -> Self {
        let cursor = if records.is_empty() { 0 } else { cursor % records.len() };
        Self { records, cursor }
    }

    fn position(&self, key_id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.key_id == key_id)
    }

    /// Clears exhaustion flags whose cooldown has passed. Returns `true`
    /// when any record changed.
    fn release_expired(&mut self, now: DateTime<Utc>) -> bool {
        let mut released = false;
        for record in &mut self.records {
            if record.release_expired_cooldown(now) {
                info!(key_id = %record.key_id, "Exhaustion cooldown elapsed, key back in rotation");
                released = true;
            }
        }
        released
    }

    /// Scans once around the ring starting at the cursor.
    fn select(&mut self, now: DateTime<Utc>) -> Option<usize> {
        let len = self.records.len();
        let index = (0..len)
            .map(|offset| (self.cursor + offset) % len)
            .find(|&i| self.records[i].is_eligible(now))?;
        self.cursor = index;
        Some(index)
    }

    /// Moves the cursor to the next eligible record after `from`. The cursor
    /// is left alone when nothing else is eligible.
    fn rotate_past(&mut self, from: usize, now: DateTime<Utc>) {
        let len = self.records.len();
        if let Some(next) = (1..len)
            .map(|offset| (from + offset) % len)
            .find(|&i| self.records[i].is_eligible(now))
        {
            debug!(from, to = next, "Rotated key cursor");
            self.cursor = next;
        } else {
            warn!("No available keys to rotate to");
        }
    }

    fn eligible_count(&self, now: DateTime<Utc>) -> usize {
        self.records.iter().filter(|r| r.is_eligible(now)).count()
    }

    fn to_persisted(&self, now: DateTime<Utc>) -> PersistedStatus {
        PersistedStatus {
            version: STATUS_SCHEMA_VERSION,
            api_keys: self.records.iter().map(CredentialRecord::to_persisted).collect(),
            current_key_index: self.cursor,
            last_updated: Some(now),
        }
    }
}

/// Spreads upstream calls across a pool of API keys and fails over when a
/// key is exhausted, rejected or misbehaving.
///
/// One instance per process, shared through [`crate::AppState`]. All state
/// changes and status writes happen under a single pool lock; the network
/// call itself runs outside of it.
pub struct KeyManager {
    pool: Mutex<Pool>,
    store: Arc<dyn StatusStore>,
    policy: RotationConfig,
    processor: ResponseProcessor,
}

impl KeyManager {
    /// Builds the pool from the status store, or from the credential slots
    /// when nothing usable was persisted.
    #[instrument(skip_all, name = "key_manager_init")]
    pub async fn load(
        slots: &[CredentialSlot],
        store: Arc<dyn StatusStore>,
        policy: RotationConfig,
    ) -> Result<Self> {
        let now = Utc::now();
        let mut persist_initial = true;

        match store.load().await {
            Ok(Some(status)) => {
                let cursor = status.current_key_index;
                let records = records_from_status(status, now, &policy);
                if records.is_empty() {
                    warn!(store = %store.describe(), "Status store holds no usable keys. Falling back to credential slots.");
                } else {
                    info!(store = %store.describe(), keys = records.len(), "Loaded API keys from status store");
                    let manager = Self::with_pool(Pool::new(records, cursor), store, policy);
                    manager.warn_if_unavailable(now).await;
                    return Ok(manager);
                }
            }
            Ok(None) => {
                debug!(store = %store.describe(), "No persisted key status found");
            }
            Err(e @ AppError::UnsupportedStatusVersion { .. }) => {
                warn!(store = %store.describe(), error = %e, "Falling back to credential slots; status store left as is until the first state change.");
                persist_initial = false;
            }
            Err(e) => {
                warn!(store = %store.describe(), error = %e, "Failed to read status store. Falling back to credential slots.");
            }
        }

        let records: Vec<CredentialRecord> = slots
            .iter()
            .filter_map(|slot| {
                let value = slot.usable_value()?;
                info!(key_id = %slot.key_id, "Loaded API key from credential slot");
                Some(CredentialRecord::new(slot.key_id.clone(), value))
            })
            .collect();

        if records.is_empty() {
            error!("No API keys found! Set PERPLEXITY_API_KEY_1 through PERPLEXITY_API_KEY_10");
            return Err(AppError::Config("No valid Perplexity API keys configured".to_string()));
        }

        let manager = Self::with_pool(Pool::new(records, 0), store, policy);
        if persist_initial {
            let pool = manager.pool.lock().await;
            manager.persist(&pool, now).await;
        }
        Ok(manager)
    }

    /// Builds a manager over explicit records. Fails when `records` is empty.
    pub fn from_records(
        records: Vec<CredentialRecord>,
        store: Arc<dyn StatusStore>,
        policy: RotationConfig,
    ) -> Result<Self> {
        if records.is_empty() {
            return Err(AppError::Config("No valid Perplexity API keys configured".to_string()));
        }
        Ok(Self::with_pool(Pool::new(records, 0), store, policy))
    }

    fn with_pool(pool: Pool, store: Arc<dyn StatusStore>, policy: RotationConfig) -> Self {
        Self {
            pool: Mutex::new(pool),
            store,
            policy,
            processor: ResponseProcessor::default(),
        }
    }

    pub fn policy(&self) -> &RotationConfig {
        &self.policy
    }

    async fn warn_if_unavailable(&self, now: DateTime<Utc>) {
        let pool = self.pool.lock().await;
        let eligible = pool.eligible_count(now);
        if eligible == 0 {
            warn!(total = pool.records.len(), "All API keys are exhausted, inactive or suspended");
        } else {
            info!(eligible, total = pool.records.len(), "Validated available API keys");
        }
    }

    /// Picks the next eligible key, or `None` when the pool is exhausted.
    pub async fn next_available_key(&self) -> Option<SelectedKey> {
        let now = Utc::now();
        let mut pool = self.pool.lock().await;
        if pool.release_expired(now) {
            self.persist(&pool, now).await;
        }
        let index = pool.select(now)?;
        let record = &pool.records[index];
        Some(SelectedKey {
            key_id: record.key_id.clone(),
            secret: record.secret.clone(),
            preview: record.preview(),
        })
    }

    /// Applies the state transition for one attempt's outcome and persists.
    #[instrument(level = "debug", skip(self, outcome), fields(outcome = outcome.kind()))]
    pub async fn record_outcome(&self, key_id: &str, outcome: &CallOutcome) {
        let now = Utc::now();
        let mut pool = self.pool.lock().await;
        let Some(index) = pool.position(key_id) else {
            warn!(key_id, "Outcome reported for unknown key");
            return;
        };

        let record = &mut pool.records[index];
        match outcome {
            CallOutcome::Success => {
                record.mark_success(now);
                info!(key_id, "Successful API call");
            }
            CallOutcome::QuotaExceeded { message } | CallOutcome::Unauthorized { message } => {
                record.mark_exhausted(now, message.clone(), self.policy.exhaustion_cooldown());
                warn!(
                    key_id,
                    error_count = record.error_count,
                    retry_after = ?record.retry_after,
                    "API key marked as exhausted: {}", message
                );
                pool.rotate_past(index, now);
            }
            CallOutcome::Transient { message } => {
                let suspended = record.record_transient_error(
                    now,
                    message.clone(),
                    self.policy.error_threshold,
                    self.policy.suspension(),
                );
                if suspended {
                    warn!(
                        key_id,
                        error_count = record.error_count,
                        retry_after = ?record.retry_after,
                        "API key temporarily disabled due to errors: {}", message
                    );
                } else {
                    warn!(key_id, error_count = record.error_count, "API key error: {}", message);
                }
                pool.rotate_past(index, now);
            }
        }

        self.persist(&pool, now).await;
    }

    /// Returns a key to full health. Resetting a healthy key is a no-op
    /// apart from the status write.
    pub async fn reset_key(&self, key_id: &str) -> Result<()> {
        let now = Utc::now();
        let mut pool = self.pool.lock().await;
        let index = pool
            .position(key_id)
            .ok_or_else(|| AppError::NotFound(format!("API key '{key_id}'")))?;
        pool.records[index].reset();
        info!(key_id, "Reset status for API key");
        self.persist(&pool, now).await;
        Ok(())
    }

    pub async fn status(&self) -> PoolStatus {
        let now = Utc::now();
        let pool = self.pool.lock().await;
        let keys: Vec<KeyStatus> = pool
            .records
            .iter()
            .map(|r| KeyStatus {
                key_id: r.key_id.clone(),
                key_preview: r.preview(),
                is_active: r.is_active,
                credits_exhausted: r.is_exhausted(now),
                error_count: r.error_count,
                last_error: r.last_error.clone(),
                last_used: r.last_used,
                retry_after: r.pending_retry_after(now),
                health: r.health(now),
            })
            .collect();

        PoolStatus {
            total_keys: keys.len(),
            active_keys: keys.iter().filter(|k| k.is_active && !k.credits_exhausted).count(),
            exhausted_keys: keys.iter().filter(|k| k.credits_exhausted).count(),
            available_keys: pool.eligible_count(now),
            current_key: pool.cursor,
            keys,
        }
    }

    /// Status writes are best effort: a failing store is logged, never
    /// surfaced to the call path.
    async fn persist(&self, pool: &Pool, now: DateTime<Utc>) {
        if let Err(e) = self.store.save(&pool.to_persisted(now)).await {
            error!(store = %self.store.describe(), error = %e, "Failed to save key status");
        }
    }

    /// Runs one orchestration call: selects a key, calls upstream, records
    /// the outcome, and retries on another key until the attempt budget is
    /// spent. Returns the upstream JSON untouched on success.
    #[instrument(skip_all, fields(max_attempts = self.policy.max_attempts))]
    pub async fn execute(
        &self,
        client: &dyn UpstreamClient,
        request: &CompletionRequest,
    ) -> Result<serde_json::Value> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0;
        let mut last_error = String::from("no attempt completed");

        while attempts < max_attempts {
            let Some(key) = self.next_available_key().await else {
                error!(attempts, "No usable API keys available");
                return Err(AppError::NoAvailableKeys);
            };
            attempts += 1;
            info!(attempt = attempts, key_id = %key.key_id, api_key.preview = %key.preview, "Attempting upstream call");

            let (outcome, body) = match client.send(&key.secret, request).await {
                Ok(response) => {
                    match self.processor.classify(response.status, &response.body) {
                        CallOutcome::Success => decode_success_body(response.status, &response.body),
                        other => (other, None),
                    }
                }
                Err(e) => (classify_transport_error(&e), None),
            };

            if let Some(message) = outcome.message() {
                last_error = message.to_string();
            }
            self.record_outcome(&key.key_id, &outcome).await;

            match next_action(&outcome, attempts, max_attempts, self.policy.retry_delay()) {
                Action::ReturnToClient => {
                    return body.ok_or_else(|| {
                        AppError::Internal("Successful upstream call produced no body".to_string())
                    });
                }
                Action::RetryNextKey { delay } => {
                    debug!(?delay, "Waiting before retrying with next key");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Action::GiveUp => break,
            }
        }

        Err(AppError::RetryExhausted {
            attempts,
            last_error,
        })
    }
}

/// A 2xx only counts as success when it carries a JSON document to hand
/// back. Empty bodies (204 and friends) and non-JSON bodies are transient.
fn decode_success_body(
    status: http::StatusCode,
    body: &[u8],
) -> (CallOutcome, Option<serde_json::Value>) {
    if body.iter().all(u8::is_ascii_whitespace) {
        return (
            CallOutcome::Transient {
                message: format!("Unexpected error: empty body in upstream HTTP {} response", status.as_u16()),
            },
            None,
        );
    }
    match serde_json::from_slice(body) {
        Ok(json) => (CallOutcome::Success, Some(json)),
        Err(e) => (
            CallOutcome::Transient {
                message: format!("Unexpected error: invalid JSON in upstream HTTP {} response: {e}", status.as_u16()),
            },
            None,
        ),
    }
}

fn records_from_status(
    status: PersistedStatus,
    now: DateTime<Utc>,
    policy: &RotationConfig,
) -> Vec<CredentialRecord> {
    let mut seen = HashSet::new();
    status
        .api_keys
        .into_iter()
        .filter_map(|entry| CredentialRecord::from_persisted(entry, now, policy.exhaustion_cooldown()))
        .filter(|record| {
            let fresh = seen.insert(record.key_id.clone());
            if !fresh {
                warn!(key_id = %record.key_id, "Duplicate key id in status store, keeping the first entry");
            }
            fresh
        })
        .collect()
}
