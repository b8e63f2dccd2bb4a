// src/handlers/invalid_api_key.rs

use super::base::{body_excerpt, CallOutcome, ResponseHandler};
use axum::body::Bytes;
use http::StatusCode;

pub struct InvalidApiKeyHandler;

impl ResponseHandler for InvalidApiKeyHandler {
    fn handle(&self, status: StatusCode, body: &Bytes) -> Option<CallOutcome> {
        (status == StatusCode::UNAUTHORIZED).then(|| CallOutcome::Unauthorized {
            message: format!("Invalid API key: {}", body_excerpt(body)),
        })
    }
}
