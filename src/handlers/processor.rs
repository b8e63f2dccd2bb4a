// src/handlers/processor.rs

use super::{
    base::{body_excerpt, CallOutcome, ResponseHandler},
    invalid_api_key::InvalidApiKeyHandler,
    rate_limit::RateLimitHandler,
    server_error::ServerErrorHandler,
    success::SuccessHandler,
};
use axum::body::Bytes;
use http::StatusCode;
use std::sync::Arc;

/// Runs an upstream response through a chain of handlers.
#[derive(Clone)]
pub struct ResponseProcessor {
    handlers: Arc<Vec<Box<dyn ResponseHandler>>>,
}

impl ResponseProcessor {
    pub fn new(handlers: Vec<Box<dyn ResponseHandler>>) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }

    /// Classifies the response with the first handler that recognises it.
    pub fn classify(&self, status: StatusCode, body: &Bytes) -> CallOutcome {
        self.handlers
            .iter()
            .find_map(|handler| handler.handle(status, body))
            .unwrap_or_else(|| CallOutcome::Transient {
                message: format!("HTTP {}: {}", status.as_u16(), body_excerpt(body)),
            })
    }
}

impl Default for ResponseProcessor {
    fn default() -> Self {
        Self::new(vec![
            Box::new(SuccessHandler),
            Box::new(RateLimitHandler),
            Box::new(InvalidApiKeyHandler),
            Box::new(ServerErrorHandler),
        ])
    }
}

impl std::fmt::Debug for ResponseProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseProcessor")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(200, "success")]
    #[case(204, "success")]
    #[case(429, "quota_exceeded")]
    #[case(401, "unauthorized")]
    #[case(400, "transient")]
    #[case(403, "transient")]
    #[case(404, "transient")]
    #[case(500, "transient")]
    #[case(502, "transient")]
    #[case(503, "transient")]
    fn test_default_chain_classifies_by_status(#[case] status: u16, #[case] expected: &str) {
        let processor = ResponseProcessor::default();
        let status = StatusCode::from_u16(status).unwrap();
        assert_eq!(processor.classify(status, &Bytes::new()).kind(), expected);
    }

    #[test]
    fn test_classification_ignores_body_text() {
        let processor = ResponseProcessor::default();
        let body = Bytes::from_static(b"rate limit exceeded, invalid api key");
        assert_eq!(processor.classify(StatusCode::INTERNAL_SERVER_ERROR, &body).kind(), "transient");
        assert_eq!(processor.classify(StatusCode::OK, &body), CallOutcome::Success);
    }

    #[test]
    fn test_messages_carry_status_and_body() {
        let processor = ResponseProcessor::default();
        let outcome = processor.classify(StatusCode::BAD_GATEWAY, &Bytes::from_static(b"upstream down"));
        assert_eq!(outcome.message(), Some("HTTP 502: upstream down"));

        let outcome = processor.classify(StatusCode::TOO_MANY_REQUESTS, &Bytes::from_static(b"{\"error\":\"quota\"}"));
        assert_eq!(outcome.message(), Some("Rate limit/credits exhausted: {\"error\":\"quota\"}"));
    }

    #[test]
    fn test_empty_chain_falls_back_to_transient() {
        let processor = ResponseProcessor::new(Vec::new());
        assert_eq!(processor.classify(StatusCode::OK, &Bytes::new()).kind(), "transient");
    }
}
