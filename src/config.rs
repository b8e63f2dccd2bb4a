// src/config.rs
use serde::Deserialize;
use std::{
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{error, info, warn};
use url::Url;

use crate::error::{AppError, Result};

/// Number of `PERPLEXITY_API_KEY_<n>` slots scanned at startup.
pub const MAX_CREDENTIAL_SLOTS: usize = 10;
const CREDENTIAL_ENV_PREFIX: &str = "PERPLEXITY_API_KEY_";

/// Cooldowns longer than this are rejected by validation.
const MAX_COOLDOWN_SECS: u64 = 365 * 24 * 60 * 60;

/// One named credential slot as declared in the environment.
///
/// The identifier is derived from the slot number, so a key keeps its
/// identity across restarts even when other slots are left blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSlot {
    pub key_id: String,
    pub value: Option<String>,
}

impl CredentialSlot {
    pub fn new(index: usize, value: Option<String>) -> Self {
        Self {
            key_id: format!("key_{index}"),
            value,
        }
    }

    /// The trimmed secret, or `None` when the slot is unset or blank.
    pub fn usable_value(&self) -> Option<&str> {
        self.value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Root of the application configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    /// Where the credential status store lives.
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,
    /// Filled from `PERPLEXITY_API_KEY_1..10`, never from YAML.
    #[serde(skip)]
    pub credential_slots: Vec<CredentialSlot>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Bearer token guarding `/admin`. Admin routes stay open when unset.
    #[serde(default)]
    pub admin_token: Option<String>,
}

/// Settings for the Perplexity chat completions endpoint.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

/// Retry and cooldown policy of the key rotation manager.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RotationConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Cooldown applied to keys that hit a quota or were rejected as invalid.
    #[serde(default = "default_exhaustion_cooldown_secs")]
    pub exhaustion_cooldown_secs: u64,
    /// Cumulative transient errors after which a key is suspended.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    #[serde(default = "default_suspension_secs")]
    pub suspension_secs: u64,
}

impl RotationConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn exhaustion_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.exhaustion_cooldown_secs.min(MAX_COOLDOWN_SECS) as i64)
    }

    pub fn suspension(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.suspension_secs.min(MAX_COOLDOWN_SECS) as i64)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            rotation: RotationConfig::default(),
            status_file: default_status_file(),
            credential_slots: Vec::new(),
        }
    }
}
impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_server_host(),
            port: default_server_port(),
            admin_token: None,
        }
    }
}
impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            base_url: default_base_url(),
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            proxy_url: None,
        }
    }
}
impl Default for RotationConfig {
    fn default() -> Self {
        RotationConfig {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            exhaustion_cooldown_secs: default_exhaustion_cooldown_secs(),
            error_threshold: default_error_threshold(),
            suspension_secs: default_suspension_secs(),
        }
    }
}

fn default_server_host() -> String { "0.0.0.0".to_string() }
fn default_server_port() -> u16 { 8000 }
fn default_base_url() -> String { "https://api.perplexity.ai".to_string() }
fn default_model() -> String { "llama-3.1-sonar-large-128k-online".to_string() }
fn default_request_timeout_secs() -> u64 { 60 }
fn default_connect_timeout_secs() -> u64 { 10 }
fn default_max_attempts() -> u32 { 3 }
fn default_retry_delay_secs() -> u64 { 5 }
fn default_exhaustion_cooldown_secs() -> u64 { 24 * 60 * 60 }
fn default_error_threshold() -> u32 { 5 }
fn default_suspension_secs() -> u64 { 30 * 60 }
fn default_status_file() -> PathBuf { PathBuf::from("perplexity_config.json") }

/// Reads `PERPLEXITY_API_KEY_1` .. `PERPLEXITY_API_KEY_10` in declaration order.
pub fn credential_slots_from_env() -> Vec<CredentialSlot> {
    (1..=MAX_CREDENTIAL_SLOTS)
        .map(|i| CredentialSlot::new(i, env::var(format!("{CREDENTIAL_ENV_PREFIX}{i}")).ok()))
        .collect()
}

/// Loads the configuration from an optional YAML file, then applies
/// environment overrides and reads the credential slots.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let path_str = path.display().to_string();

    let mut config = match fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => {
            warn!("Config file '{}' is empty. Using defaults.", path_str);
            AppConfig::default()
        }
        Ok(contents) => {
            let parsed: AppConfig = serde_yaml::from_str(&contents)?;
            info!("Loaded configuration from '{}'.", path_str);
            parsed
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Config file '{}' not found. Using defaults.", path_str);
            AppConfig::default()
        }
        Err(e) => {
            return Err(AppError::Io(io::Error::new(
                e.kind(),
                format!("Failed to read config file '{path_str}': {e}"),
            )))
        }
    };

    override_with_env(&mut config);
    config.credential_slots = credential_slots_from_env();

    let configured = config
        .credential_slots
        .iter()
        .filter(|slot| slot.usable_value().is_some())
        .count();
    info!(
        credential_slots.configured = configured,
        credential_slots.total = MAX_CREDENTIAL_SLOTS,
        "Scanned credential slots"
    );

    validate_config(&config)?;
    Ok(config)
}

fn override_with_env(config: &mut AppConfig) {
    if let Ok(port_str) = env::var("PORT") {
        match port_str.trim().parse::<u16>() {
            Ok(port) => {
                info!("Overriding server port from environment variable: {}", port);
                config.server.port = port;
            }
            Err(_) => warn!("Invalid PORT environment variable: {}", port_str),
        }
    }
    if let Some(base_url) = non_empty_env("PERPLEXITY_BASE_URL") {
        config.upstream.base_url = base_url;
    }
    if let Some(model) = non_empty_env("PERPLEXITY_MODEL") {
        config.upstream.model = model;
    }
    if let Some(status_file) = non_empty_env("PERPLEXITY_STATUS_FILE") {
        config.status_file = PathBuf::from(status_file);
    }
    if let Some(token) = non_empty_env("ADMIN_TOKEN") {
        config.server.admin_token = Some(token);
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Checks the invariants the rest of the service relies on.
pub fn validate_config(cfg: &AppConfig) -> Result<()> {
    let mut has_errors = false;

    if cfg.server.host.trim().is_empty() || cfg.server.port == 0 {
        error!("Invalid server configuration: host={}, port={}", cfg.server.host, cfg.server.port);
        has_errors = true;
    }

    match Url::parse(&cfg.upstream.base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => {
            error!("Upstream base_url '{}' has unsupported scheme '{}'", cfg.upstream.base_url, url.scheme());
            has_errors = true;
        }
        Err(e) => {
            error!("Upstream base_url '{}' is invalid: {}", cfg.upstream.base_url, e);
            has_errors = true;
        }
    }

    if let Some(proxy_url) = &cfg.upstream.proxy_url {
        match Url::parse(proxy_url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https" | "socks5") => {}
            Ok(parsed) => {
                error!("Unsupported proxy scheme '{}' in url '{}'", parsed.scheme(), proxy_url);
                has_errors = true;
            }
            Err(e) => {
                error!("Invalid proxy_url ('{}'): {}", proxy_url, e);
                has_errors = true;
            }
        }
    }

    if cfg.upstream.request_timeout_secs == 0 {
        error!("upstream.request_timeout_secs must be greater than zero");
        has_errors = true;
    }

    let rotation = &cfg.rotation;
    if rotation.max_attempts == 0 {
        error!("rotation.max_attempts must be at least 1");
        has_errors = true;
    }
    if rotation.error_threshold == 0 {
        error!("rotation.error_threshold must be at least 1");
        has_errors = true;
    }
    if rotation.exhaustion_cooldown_secs > MAX_COOLDOWN_SECS || rotation.suspension_secs > MAX_COOLDOWN_SECS {
        error!("Rotation cooldowns must not exceed {} seconds", MAX_COOLDOWN_SECS);
        has_errors = true;
    }

    if has_errors {
        return Err(AppError::Config("Validation failed".to_string()));
    }
    Ok(())
}
