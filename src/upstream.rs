// src/upstream.rs

use crate::config::UpstreamConfig;
use crate::error::{AppError, Result};
use crate::storage::preview_key;
use async_trait::async_trait;
use axum::body::Bytes;
use http::StatusCode;
use reqwest::{header, Client, Proxy};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// One completion request from an agent, with its generation parameters.
///
/// Every field except `prompt` has a default, so callers only override what
/// they care about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    /// Falls back to the configured upstream model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_true")]
    pub return_citations: bool,
    #[serde(default = "default_search_domain_filter")]
    pub search_domain_filter: Vec<String>,
    #[serde(default)]
    pub return_images: bool,
    #[serde(default)]
    pub return_related_questions: bool,
    #[serde(default = "default_search_recency_filter")]
    pub search_recency_filter: String,
    #[serde(default)]
    pub top_k: u32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default = "default_frequency_penalty")]
    pub frequency_penalty: f32,
}

fn default_max_tokens() -> u32 { 4000 }
fn default_temperature() -> f32 { 0.2 }
fn default_top_p() -> f32 { 0.9 }
fn default_true() -> bool { true }
fn default_search_domain_filter() -> Vec<String> { vec!["perplexity.ai".to_string()] }
fn default_search_recency_filter() -> String { "month".to_string() }
fn default_frequency_penalty() -> f32 { 1.0 }

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            return_citations: true,
            search_domain_filter: default_search_domain_filter(),
            return_images: false,
            return_related_questions: false,
            search_recency_filter: default_search_recency_filter(),
            top_k: 0,
            presence_penalty: 0.0,
            frequency_penalty: default_frequency_penalty(),
        }
    }

    /// Builds the chat completions body sent upstream.
    pub fn to_payload<'a>(&'a self, default_model: &'a str) -> ChatCompletionPayload<'a> {
        ChatCompletionPayload {
            model: self.model.as_deref().unwrap_or(default_model),
            messages: [ChatMessage {
                role: "user",
                content: &self.prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            return_citations: self.return_citations,
            search_domain_filter: &self.search_domain_filter,
            return_images: self.return_images,
            return_related_questions: self.return_related_questions,
            search_recency_filter: &self.search_recency_filter,
            top_k: self.top_k,
            stream: false,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionPayload<'a> {
    pub model: &'a str,
    pub messages: [ChatMessage<'a>; 1],
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub return_citations: bool,
    pub search_domain_filter: &'a [String],
    pub return_images: bool,
    pub return_related_questions: bool,
    pub search_recency_filter: &'a str,
    pub top_k: u32,
    pub stream: bool,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

/// Raw upstream answer; classification happens in the rotation loop.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Failure before a complete HTTP response was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_body() || e.is_decode() {
            TransportError::Body(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// The upstream LLM service, seen from the rotation loop.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(
        &self,
        api_key: &SecretString,
        request: &CompletionRequest,
    ) -> std::result::Result<UpstreamResponse, TransportError>;
}

/// Perplexity chat completions over `reqwest`.
#[derive(Debug, Clone)]
pub struct PerplexityClient {
    http: Client,
    endpoint: String,
    default_model: String,
}

impl PerplexityClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)));

        if let Some(proxy_url) = config.proxy_url.as_deref() {
            let proxy = Proxy::all(proxy_url).map_err(AppError::HttpClientBuild)?;
            info!(proxy_url = %proxy_url, "Routing upstream traffic through proxy");
            builder = builder.proxy(proxy);
        }

        let http = builder.build().map_err(AppError::HttpClientBuild)?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            default_model: config.model.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl UpstreamClient for PerplexityClient {
    async fn send(
        &self,
        api_key: &SecretString,
        request: &CompletionRequest,
    ) -> std::result::Result<UpstreamResponse, TransportError> {
        let payload = request.to_payload(&self.default_model);
        debug!(
            url = %self.endpoint,
            model = payload.model,
            api_key.preview = %preview_key(api_key.expose_secret()),
            "Sending request upstream"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key.expose_secret())
            .header(header::CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        debug!(status = %status, bytes = body.len(), "Received upstream response");
        Ok(UpstreamResponse { status, body })
    }
}
