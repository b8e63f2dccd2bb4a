// src/admin.rs

use crate::{
    error::Result,
    key_manager::{KeyStatus, PoolStatus},
    middleware::admin_auth_middleware,
    state::AppState,
    storage::KeyHealth,
};
use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct ListKeysQuery {
    /// `available` or `unavailable`; anything else lists every key.
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetKeyResponse {
    pub key_id: String,
    pub reset: bool,
}

/// Administrative routes, mounted under `/admin`.
pub fn admin_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let routes = Router::new()
        .route("/keys", get(list_keys))
        .route("/keys/:key_id/reset", post(reset_key))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware));

    Router::new().nest("/admin", routes)
}

/// Pool status for dashboards: counts, cursor, and per-key detail.
pub async fn list_keys(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListKeysQuery>,
) -> Result<Json<PoolStatus>> {
    let mut status = state.key_manager.status().await;
    if let Some(filter) = query.status.as_deref() {
        let wanted = match filter {
            "available" => Some(true),
            "unavailable" => Some(false),
            _ => None,
        };
        if let Some(wanted) = wanted {
            status.keys.retain(|k| is_available(k) == wanted);
        }
    }
    Ok(Json(status))
}

fn is_available(key: &KeyStatus) -> bool {
    matches!(key.health, KeyHealth::Healthy | KeyHealth::Errored(_))
}

/// Returns one key to full health.
pub async fn reset_key(
    State(state): State<Arc<AppState>>,
    Path(key_id): Path<String>,
) -> Result<Json<ResetKeyResponse>> {
    state.key_manager.reset_key(&key_id).await?;
    info!(key_id = %key_id, "API key reset through admin API");
    Ok(Json(ResetKeyResponse {
        key_id,
        reset: true,
    }))
}
