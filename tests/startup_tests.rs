// tests/startup_tests.rs

use agent_factory::{run, storage::PersistedStatus, AppError};
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serial_test::serial;
use std::{env, fs};
use tempfile::tempdir;
use tower::ServiceExt;

fn clear_env() {
    for i in 1..=10 {
        env::remove_var(format!("PERPLEXITY_API_KEY_{i}"));
    }
    for name in [
        "PORT",
        "PERPLEXITY_BASE_URL",
        "PERPLEXITY_MODEL",
        "PERPLEXITY_STATUS_FILE",
        "ADMIN_TOKEN",
    ] {
        env::remove_var(name);
    }
}

#[tokio::test]
#[serial]
async fn test_run_builds_router_and_writes_status_file() {
    clear_env();
    let dir = tempdir().unwrap();
    let status_path = dir.path().join("state").join("perplexity_config.json");
    let config_path = dir.path().join("config.yaml");
    fs::write(
        &config_path,
        format!(
            "server:\n  port: 18080\nrotation:\n  retry_delay_secs: 0\nstatus_file: {}\n",
            status_path.display()
        ),
    )
    .unwrap();
    env::set_var("PERPLEXITY_API_KEY_2", "pplx-second-0123456789");
    env::set_var("PERPLEXITY_API_KEY_4", "   ");

    let (app, config) = run(Some(config_path)).await.expect("startup succeeds");
    assert_eq!(config.server.port, 18080);
    assert_eq!(config.rotation.retry_delay_secs, 0);

    let saved: PersistedStatus =
        serde_json::from_str(&fs::read_to_string(&status_path).unwrap()).unwrap();
    assert_eq!(saved.api_keys.len(), 1);
    assert_eq!(saved.api_keys[0].key_id, "key_2");

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    clear_env();
}

#[tokio::test]
#[serial]
async fn test_run_without_keys_fails() {
    clear_env();
    let dir = tempdir().unwrap();
    env::set_var(
        "PERPLEXITY_STATUS_FILE",
        dir.path().join("status.json").display().to_string(),
    );

    let result = run(Some(dir.path().join("missing.yaml"))).await;
    assert!(matches!(result, Err(AppError::Config(_))));

    clear_env();
}

#[tokio::test]
#[serial]
async fn test_run_rejects_invalid_config() {
    clear_env();
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.yaml");
    fs::write(&config_path, "rotation:\n  max_attempts: 0\n").unwrap();
    env::set_var("PERPLEXITY_API_KEY_1", "pplx-first-0123456789");

    let result = run(Some(config_path)).await;
    assert!(matches!(result, Err(AppError::Config(_))));

    clear_env();
}
