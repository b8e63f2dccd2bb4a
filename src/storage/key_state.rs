// src/storage/key_state.rs

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Current on-disk shape of the status store.
pub const STATUS_SCHEMA_VERSION: u32 = 1;

/// Health of a single credential, derived from its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum KeyHealth {
    Healthy,
    Errored(u32),
    TemporarilySuspended(DateTime<Utc>),
    /// Out of rotation until the given time, or until reset when unset.
    Exhausted(Option<DateTime<Utc>>),
    Inactive,
}

/// One API key plus its health and usage metadata.
#[derive(Clone, Debug)]
pub struct CredentialRecord {
    pub key_id: String,
    pub secret: SecretString,
    pub is_active: bool,
    pub exhausted: bool,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
    pub retry_after: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    pub fn new(key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            secret: SecretString::new(secret.into()),
            is_active: true,
            exhausted: false,
            error_count: 0,
            last_error: None,
            last_used: None,
            retry_after: None,
        }
    }

    /// Exhausted as seen at `now`. An exhaustion whose cooldown has passed
    /// no longer counts, even before [`Self::release_expired_cooldown`]
    /// clears the flag.
    pub fn is_exhausted(&self, now: DateTime<Utc>) -> bool {
        self.exhausted && self.retry_after.map_or(true, |until| now <= until)
    }

    /// Cooldown boundary still ahead of `now`, if any.
    pub fn pending_retry_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.retry_after.filter(|until| now <= *until)
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_exhausted(now) && self.pending_retry_after(now).is_none()
    }

    pub fn health(&self, now: DateTime<Utc>) -> KeyHealth {
        if !self.is_active {
            return KeyHealth::Inactive;
        }
        if self.is_exhausted(now) {
            return KeyHealth::Exhausted(self.retry_after);
        }
        match self.pending_retry_after(now) {
            Some(until) => KeyHealth::TemporarilySuspended(until),
            None if self.error_count > 0 => KeyHealth::Errored(self.error_count),
            None => KeyHealth::Healthy,
        }
    }

    pub fn mark_success(&mut self, now: DateTime<Utc>) {
        self.last_error = None;
        self.last_used = Some(now);
    }

    /// Quota hit or key rejected: out of rotation until the cooldown elapses.
    pub fn mark_exhausted(&mut self, now: DateTime<Utc>, message: String, cooldown: Duration) {
        self.exhausted = true;
        self.error_count += 1;
        self.last_error = Some(message);
        self.retry_after = Some(now + cooldown);
    }

    /// Returns `true` when this error pushed the key into suspension.
    pub fn record_transient_error(
        &mut self,
        now: DateTime<Utc>,
        message: String,
        threshold: u32,
        suspension: Duration,
    ) -> bool {
        self.error_count += 1;
        self.last_error = Some(message);
        if self.error_count >= threshold {
            self.retry_after = Some(now + suspension);
            return true;
        }
        false
    }

    /// Lifts the exhausted flag once its cooldown is over. The error
    /// counter is left alone; only [`CredentialRecord::reset`] clears it.
    pub fn release_expired_cooldown(&mut self, now: DateTime<Utc>) -> bool {
        match self.retry_after {
            Some(until) if self.exhausted && now > until => {
                self.exhausted = false;
                self.retry_after = None;
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.exhausted = false;
        self.is_active = true;
        self.error_count = 0;
        self.last_error = None;
        self.retry_after = None;
    }

    pub fn preview(&self) -> String {
        preview_key(self.secret.expose_secret())
    }

    /// Builds a record from a stored entry. Entries with a blank secret are
    /// dropped. Exhausted or inactive entries written without a cooldown
    /// boundary get one starting now.
    pub fn from_persisted(entry: PersistedKey, now: DateTime<Utc>, cooldown: Duration) -> Option<Self> {
        let secret = entry.key_value.trim();
        if secret.is_empty() {
            return None;
        }
        let retry_after = match entry.retry_after {
            None if entry.credits_exhausted || !entry.is_active => Some(now + cooldown),
            other => other,
        };
        Some(Self {
            key_id: entry.key_id,
            secret: SecretString::new(secret.to_string()),
            is_active: entry.is_active,
            exhausted: entry.credits_exhausted,
            error_count: entry.error_count,
            last_error: entry.last_error,
            last_used: entry.last_used,
            retry_after,
        })
    }

    pub fn to_persisted(&self) -> PersistedKey {
        PersistedKey {
            key_id: self.key_id.clone(),
            key_value: self.secret.expose_secret().clone(),
            is_active: self.is_active,
            error_count: self.error_count,
            credits_exhausted: self.exhausted,
            last_error: self.last_error.clone(),
            last_used: self.last_used,
            retry_after: self.retry_after,
        }
    }
}

/// Masks a key for logs and status output.
pub fn preview_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "****".to_string()
    }
}

/// One credential as written to the status store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedKey {
    pub key_id: String,
    pub key_value: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub credits_exhausted: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub retry_after: Option<DateTime<Utc>>,
}

/// Whole status store document.
///
/// Files without a `version` field predate the schema and are read as
/// version 0; they lack `retry_after` and are normalized on load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedStatus {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub api_keys: Vec<PersistedKey>,
    #[serde(default)]
    pub current_key_index: usize,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub last_updated: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// Accepts RFC 3339 timestamps and the zone-less ISO form older status
/// files were written with. Zone-less values are read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(raw) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(Some(parsed.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Some(naive.and_utc()))
            .map_err(|e| D::Error::custom(format!("invalid timestamp '{raw}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hours(n: i64) -> Duration {
        Duration::hours(n)
    }

    #[test]
    fn test_new_record_is_healthy_and_eligible() {
        let now = Utc::now();
        let record = CredentialRecord::new("key_1", "pplx-abcdefghijkl");
        assert!(record.is_eligible(now));
        assert_eq!(record.health(now), KeyHealth::Healthy);
    }

    #[test]
    fn test_exhaustion_sets_cooldown() {
        let now = Utc::now();
        let mut record = CredentialRecord::new("key_1", "secret-value-1");
        record.mark_exhausted(now, "HTTP 429".to_string(), hours(24));

        assert!(record.exhausted);
        assert_eq!(record.error_count, 1);
        assert_eq!(record.retry_after, Some(now + hours(24)));
        assert!(!record.is_eligible(now + hours(23)));
        assert_eq!(record.health(now), KeyHealth::Exhausted(Some(now + hours(24))));
    }

    #[test]
    fn test_elapsed_exhaustion_reads_as_released_without_mutation() {
        let now = Utc::now();
        let mut record = CredentialRecord::new("key_1", "secret-value-1");
        record.mark_exhausted(now - hours(25), "quota".into(), hours(24));

        assert!(!record.is_exhausted(now));
        assert!(record.is_eligible(now));
        assert_eq!(record.health(now), KeyHealth::Errored(1));
        assert!(record.exhausted, "read paths leave the record alone");
    }

    #[test]
    fn test_exhausted_without_boundary_stays_out() {
        let now = Utc::now();
        let mut record = CredentialRecord::new("key_1", "secret-value-1");
        record.exhausted = true;

        assert!(!record.is_eligible(now + hours(1000)));
        assert_eq!(record.health(now), KeyHealth::Exhausted(None));
    }

    #[test]
    fn test_transient_errors_suspend_at_threshold() {
        let now = Utc::now();
        let mut record = CredentialRecord::new("key_1", "secret-value-1");
        for _ in 0..4 {
            assert!(!record.record_transient_error(now, "timeout".into(), 5, Duration::minutes(30)));
        }
        assert!(record.is_eligible(now));
        assert_eq!(record.health(now), KeyHealth::Errored(4));

        assert!(record.record_transient_error(now, "timeout".into(), 5, Duration::minutes(30)));
        assert!(!record.exhausted);
        assert!(!record.is_eligible(now + Duration::minutes(29)));
        assert!(record.is_eligible(now + Duration::minutes(31)));
        assert!(matches!(record.health(now), KeyHealth::TemporarilySuspended(_)));
    }

    #[test]
    fn test_release_expired_cooldown_keeps_error_count() {
        let now = Utc::now();
        let mut record = CredentialRecord::new("key_1", "secret-value-1");
        record.mark_exhausted(now, "quota".into(), hours(24));

        assert!(!record.release_expired_cooldown(now + hours(1)));
        assert!(record.release_expired_cooldown(now + hours(24) + Duration::seconds(1)));
        assert!(record.is_eligible(now + hours(25)));
        assert_eq!(record.error_count, 1);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let now = Utc::now();
        let mut record = CredentialRecord::new("key_1", "secret-value-1");
        record.is_active = false;
        record.mark_exhausted(now, "quota".into(), hours(24));

        record.reset();
        let once = record.to_persisted();
        record.reset();
        assert_eq!(record.to_persisted(), once);
        assert_eq!(record.health(now), KeyHealth::Healthy);
    }

    #[test]
    fn test_from_persisted_drops_blank_secret() {
        let entry = PersistedKey {
            key_id: "key_2".to_string(),
            key_value: "   ".to_string(),
            is_active: true,
            error_count: 0,
            credits_exhausted: false,
            last_error: None,
            last_used: None,
            retry_after: None,
        };
        assert!(CredentialRecord::from_persisted(entry, Utc::now(), hours(24)).is_none());
    }

    #[test]
    fn test_legacy_exhausted_entry_gets_cooldown_boundary() {
        let now = Utc::now();
        let legacy: PersistedStatus = serde_json::from_str(
            r#"{"api_keys":[{"key_id":"key_1","key_value":"pplx-legacy-0001","credits_exhausted":true,"error_count":2}],"current_key_index":0}"#,
        )
        .unwrap();
        assert_eq!(legacy.version, 0);

        let record =
            CredentialRecord::from_persisted(legacy.api_keys[0].clone(), now, hours(24)).unwrap();
        assert!(record.is_active);
        assert_eq!(record.retry_after, Some(now + hours(24)));
    }

    #[test]
    fn test_preview_masks_secret() {
        assert_eq!(preview_key("pplx-1234567890abcd"), "pplx...abcd");
        assert_eq!(preview_key("short"), "****");
    }

    #[test]
    fn test_zone_less_timestamps_read_as_utc() {
        let legacy: PersistedStatus = serde_json::from_str(
            r#"{"api_keys":[{"key_id":"key_1","key_value":"pplx-legacy-0001","last_used":"2024-06-01T12:00:00.123456"}],"last_updated":"2024-06-01T12:00:00"}"#,
        )
        .unwrap();
        let last_used = legacy.api_keys[0].last_used.unwrap();
        assert_eq!(last_used.to_rfc3339(), "2024-06-01T12:00:00.123456+00:00");
        assert!(legacy.last_updated.is_some());
    }
}
