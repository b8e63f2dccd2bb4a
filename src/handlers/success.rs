// src/handlers/success.rs

use super::base::{CallOutcome, ResponseHandler};
use axum::body::Bytes;
use http::StatusCode;

pub struct SuccessHandler;

impl ResponseHandler for SuccessHandler {
    fn handle(&self, status: StatusCode, _body: &Bytes) -> Option<CallOutcome> {
        status.is_success().then_some(CallOutcome::Success)
    }
}
