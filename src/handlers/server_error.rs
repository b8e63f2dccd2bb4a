// src/handlers/server_error.rs

use super::base::{body_excerpt, CallOutcome, ResponseHandler};
use axum::body::Bytes;
use http::StatusCode;
use tracing::warn;

/// Last link of the chain: every non-2xx status without a dedicated handler
/// counts as a transient error on the key that produced it.
pub struct ServerErrorHandler;

impl ResponseHandler for ServerErrorHandler {
    fn handle(&self, status: StatusCode, body: &Bytes) -> Option<CallOutcome> {
        if status.is_success() {
            return None;
        }
        let excerpt = body_excerpt(body);
        warn!(
            status = status.as_u16(),
            response_body = %excerpt,
            "Upstream error response, will retry with next key"
        );
        Some(CallOutcome::Transient {
            message: format!("HTTP {}: {}", status.as_u16(), excerpt),
        })
    }
}
