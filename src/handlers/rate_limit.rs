// src/handlers/rate_limit.rs

use super::base::{body_excerpt, CallOutcome, ResponseHandler};
use axum::body::Bytes;
use http::StatusCode;

pub struct RateLimitHandler;

impl ResponseHandler for RateLimitHandler {
    fn handle(&self, status: StatusCode, body: &Bytes) -> Option<CallOutcome> {
        (status == StatusCode::TOO_MANY_REQUESTS).then(|| CallOutcome::QuotaExceeded {
            message: format!("Rate limit/credits exhausted: {}", body_excerpt(body)),
        })
    }
}
