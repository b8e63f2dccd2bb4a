// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Structured error body returned to HTTP clients.
#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Serialize, Debug)]
struct ErrorDetails {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Errors that can cross the boundary of the gateway.
///
/// Single-attempt upstream failures never show up here directly: they are
/// classified into a [`crate::handlers::CallOutcome`] and handled by the
/// rotation loop. Callers only see pool exhaustion, retry exhaustion, or
/// setup problems.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    YamlParsing(#[from] serde_yaml::Error),

    #[error("JSON processing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Status store written by a newer release. Left untouched on disk.
    #[error("Status store '{path}' has schema version {found}, newest supported is {supported}")]
    UnsupportedStatusVersion {
        path: String,
        found: u32,
        supported: u32,
    },

    #[error("HTTP client build error: {0}")]
    HttpClientBuild(#[source] reqwest::Error),

    /// No credential is eligible right now. Waiting for a cooldown to elapse
    /// (or an admin reset) makes the pool usable again.
    #[error("No available API keys")]
    NoAvailableKeys,

    /// Every attempt of an orchestration call failed.
    #[error("Upstream call failed after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("Request body processing error: {0}")]
    RequestBodyError(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn to_status_and_details(&self) -> (StatusCode, ErrorDetails) {
        match self {
            Self::Config(msg) => {
                error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorDetails {
                        error_type: "CONFIG_ERROR".to_string(),
                        message: "Internal server configuration error".to_string(),
                        details: None,
                    },
                )
            }
            Self::UnsupportedStatusVersion { .. } => {
                error!("{}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorDetails {
                        error_type: "STATUS_SCHEMA_ERROR".to_string(),
                        message: "Internal server configuration error".to_string(),
                        details: None,
                    },
                )
            }
            Self::Io(e) => {
                error!("IO error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorDetails {
                        error_type: "IO_ERROR".to_string(),
                        message: "Internal server error during IO operation".to_string(),
                        details: None,
                    },
                )
            }
            Self::YamlParsing(e) => {
                error!("YAML parsing error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorDetails {
                        error_type: "CONFIG_PARSE_ERROR".to_string(),
                        message: "Failed to parse configuration file".to_string(),
                        details: None,
                    },
                )
            }
            Self::Json(e) => {
                error!("JSON processing error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorDetails {
                        error_type: "JSON_PROCESSING_ERROR".to_string(),
                        message: "Failed to process JSON data".to_string(),
                        details: Some(e.to_string()),
                    },
                )
            }
            Self::HttpClientBuild(e) => {
                error!("HTTP client build error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorDetails {
                        error_type: "HTTP_CLIENT_BUILD_ERROR".to_string(),
                        message: "Internal server error building HTTP client".to_string(),
                        details: None,
                    },
                )
            }
            Self::Internal(msg) => {
                error!("Internal server error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorDetails {
                        error_type: "INTERNAL_SERVER_ERROR".to_string(),
                        message: "An unexpected internal server error occurred".to_string(),
                        details: None,
                    },
                )
            }

            // --- Upstream / rotation outcomes ---
            Self::NoAvailableKeys => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorDetails {
                    error_type: "NO_AVAILABLE_KEYS".to_string(),
                    message: "No available API keys to process the request at this time"
                        .to_string(),
                    details: None,
                },
            ),
            Self::RetryExhausted {
                attempts,
                last_error,
            } => {
                error!(attempts, last_error = %last_error, "Upstream retries exhausted");
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorDetails {
                        error_type: "UPSTREAM_RETRY_EXHAUSTED".to_string(),
                        message: format!("Upstream call failed after {attempts} attempts"),
                        details: Some(last_error.clone()),
                    },
                )
            }

            // --- 4xx ---
            Self::RequestBodyError(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetails {
                    error_type: "REQUEST_BODY_ERROR".to_string(),
                    message: "Failed to process request body".to_string(),
                    details: Some(msg.clone()),
                },
            ),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorDetails {
                    error_type: "UNAUTHORIZED".to_string(),
                    message: "Authentication token is missing or invalid".to_string(),
                    details: None,
                },
            ),
            Self::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorDetails {
                    error_type: "NOT_FOUND".to_string(),
                    message: format!("Resource not found: {resource}"),
                    details: None,
                },
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_details) = self.to_status_and_details();
        let body = Json(ErrorResponse {
            error: error_details,
        });
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;
    use std::io;

    async fn check_response(
        error: AppError,
        expected_status: StatusCode,
        expected_type: &str,
        expected_message_substring: &str,
        expect_details: bool,
    ) {
        let response = error.into_response();
        assert_eq!(response.status(), expected_status, "Status code mismatch");

        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");
        let body_json: Value = serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            panic!(
                "Response body is not valid JSON: {}. Body: {}",
                e,
                String::from_utf8_lossy(&bytes)
            )
        });

        let error_obj = &body_json["error"];
        assert!(!error_obj.is_null(), "JSON 'error' field is missing");
        assert_eq!(error_obj["type"].as_str(), Some(expected_type));

        let error_msg = error_obj["message"]
            .as_str()
            .expect("JSON 'error.message' field is not a string or missing");
        assert!(
            error_msg.contains(expected_message_substring),
            "Expected message '{error_msg}' to contain '{expected_message_substring}'"
        );

        if expect_details {
            assert!(error_obj["details"].is_string(), "Expected 'error.details'");
        } else {
            assert!(error_obj["details"].is_null());
        }
    }

    #[tokio::test]
    async fn test_into_response_config() {
        check_response(
            AppError::Config("no keys".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
            "CONFIG_ERROR",
            "Internal server configuration error",
            false,
        )
        .await;
    }

    #[tokio::test]
    async fn test_into_response_io() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        check_response(
            AppError::Io(io_error),
            StatusCode::INTERNAL_SERVER_ERROR,
            "IO_ERROR",
            "IO operation",
            false,
        )
        .await;
    }

    #[tokio::test]
    async fn test_into_response_unsupported_status_version() {
        let err = AppError::UnsupportedStatusVersion {
            path: "perplexity_config.json".to_string(),
            found: 2,
            supported: 1,
        };
        assert!(err.to_string().contains("schema version 2"));
        check_response(
            err,
            StatusCode::INTERNAL_SERVER_ERROR,
            "STATUS_SCHEMA_ERROR",
            "configuration error",
            false,
        )
        .await;
    }

    #[tokio::test]
    async fn test_into_response_no_keys() {
        check_response(
            AppError::NoAvailableKeys,
            StatusCode::SERVICE_UNAVAILABLE,
            "NO_AVAILABLE_KEYS",
            "No available API keys",
            false,
        )
        .await;
    }

    #[tokio::test]
    async fn test_into_response_retry_exhausted_carries_attempts_and_cause() {
        let err = AppError::RetryExhausted {
            attempts: 3,
            last_error: "HTTP 500: boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Upstream call failed after 3 attempts: HTTP 500: boom"
        );
        check_response(
            err,
            StatusCode::BAD_GATEWAY,
            "UPSTREAM_RETRY_EXHAUSTED",
            "after 3 attempts",
            true,
        )
        .await;
    }

    #[tokio::test]
    async fn test_into_response_request_body_error() {
        check_response(
            AppError::RequestBodyError("missing prompt".to_string()),
            StatusCode::BAD_REQUEST,
            "REQUEST_BODY_ERROR",
            "Failed to process request body",
            true,
        )
        .await;
    }

    #[tokio::test]
    async fn test_into_response_not_found() {
        check_response(
            AppError::NotFound("key_9".to_string()),
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "key_9",
            false,
        )
        .await;
    }

    #[tokio::test]
    async fn test_into_response_unauthorized() {
        check_response(
            AppError::Unauthorized,
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing or invalid",
            false,
        )
        .await;
    }
}
