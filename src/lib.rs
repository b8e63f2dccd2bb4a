// src/lib.rs

pub mod admin;
pub mod cli;
pub mod config;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod key_manager;
pub mod middleware;
pub mod state;
pub mod storage;
pub mod upstream;

use crate::handler::{health_check, query_handler};
use axum::{
    body::Body,
    http::{HeaderValue, Request as AxumRequest},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::{path::PathBuf, sync::Arc, time::Instant};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use key_manager::KeyManager;
pub use state::AppState;

/// Builds the axum router over shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/query", post(query_handler))
        .merge(admin::admin_routes(state.clone()))
        .layer(axum::middleware::from_fn(trace_requests))
        .with_state(state)
}

/// Gives every request a UUID, a span, and an `X-Request-ID` header.
async fn trace_requests(
    mut req: AxumRequest<Body>,
    next: axum::middleware::Next,
) -> impl IntoResponse {
    let request_id = Uuid::new_v4();
    let start_time = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        http.method = %method,
        url.path = %path,
    );

    req.extensions_mut().insert(request_id);

    async move {
        let mut response = next.run(req).await;
        let elapsed = start_time.elapsed();

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert("X-Request-ID", value);
        }

        info!(
            http.response.duration = ?elapsed,
            http.status_code = response.status().as_u16(),
            "Finished processing request"
        );

        response
    }
    .instrument(span)
    .await
}

/// Resolves the config path: explicit override, then `AGENT_FACTORY_CONFIG`,
/// then `config.yaml`.
pub fn resolve_config_path(config_path_override: Option<PathBuf>) -> PathBuf {
    config_path_override.unwrap_or_else(|| {
        std::env::var("AGENT_FACTORY_CONFIG")
            .map_or_else(|_| PathBuf::from("config.yaml"), PathBuf::from)
    })
}

/// Loads and validates configuration, logging the outcome.
pub fn setup_configuration(config_path_override: Option<PathBuf>) -> Result<AppConfig> {
    let config_path = resolve_config_path(config_path_override);
    let config_path_display = config_path.display().to_string();

    let app_config = config::load_config(&config_path).map_err(|e| {
        error!(
            config.path = %config_path_display,
            error = ?e,
            "Failed to load or validate configuration. Exiting."
        );
        e
    })?;

    info!(
        config.path = %config_path_display,
        server.port = app_config.server.port,
        upstream.base_url = %app_config.upstream.base_url,
        rotation.max_attempts = app_config.rotation.max_attempts,
        status_file = %app_config.status_file.display(),
        "Configuration loaded and validated successfully."
    );
    Ok(app_config)
}

/// Loads configuration, builds state, and returns the router with the
/// configuration it was built from.
pub async fn run(config_path_override: Option<PathBuf>) -> Result<(Router, AppConfig)> {
    info!("Starting agent factory gateway...");
    let app_config = setup_configuration(config_path_override)?;

    let app_state = AppState::new(app_config.clone()).await.map_err(|e| {
        error!(error = ?e, "Failed to initialize application state. Exiting.");
        e
    })?;
    info!("Application state initialized successfully.");

    Ok((create_router(Arc::new(app_state)), app_config))
}
