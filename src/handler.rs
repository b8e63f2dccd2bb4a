// src/handler.rs

use crate::{
    error::{AppError, Result},
    state::AppState,
    upstream::CompletionRequest,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Runs one completion through the key rotation loop and returns the
/// upstream JSON unchanged.
#[instrument(skip_all)]
pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<CompletionRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(request) = payload.map_err(|e| AppError::RequestBodyError(e.body_text()))?;
    if request.prompt.trim().is_empty() {
        return Err(AppError::RequestBodyError("prompt must not be empty".to_string()));
    }
    info!(
        prompt.chars = request.prompt.chars().count(),
        max_tokens = request.max_tokens,
        "Received completion request"
    );

    let response = state
        .key_manager
        .execute(state.upstream.as_ref(), &request)
        .await?;
    Ok(Json(response))
}
