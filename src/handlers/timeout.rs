// src/handlers/timeout.rs

use super::base::CallOutcome;
use crate::upstream::TransportError;

/// Maps a failure that happened before any HTTP status was received.
pub fn classify_transport_error(error: &TransportError) -> CallOutcome {
    let message = match error {
        TransportError::Timeout => "Request timeout".to_string(),
        TransportError::Connect(detail) => format!("Connection failed: {detail}"),
        TransportError::Body(detail) => format!("Failed to read response body: {detail}"),
        TransportError::Other(detail) => format!("Unexpected error: {detail}"),
    };
    CallOutcome::Transient { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_transient() {
        assert_eq!(
            classify_transport_error(&TransportError::Timeout),
            CallOutcome::Transient {
                message: "Request timeout".to_string()
            }
        );
    }

    #[test]
    fn test_connect_failure_keeps_detail() {
        let outcome = classify_transport_error(&TransportError::Connect("refused".into()));
        assert_eq!(outcome.message(), Some("Connection failed: refused"));
        assert!(!outcome.exhausts_key());
    }
}
