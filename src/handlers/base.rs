// src/handlers/base.rs

use axum::body::Bytes;
use http::StatusCode;
use std::time::Duration;

/// Longest slice of an upstream body kept in a key's `last_error`.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Classified result of one attempt against the upstream with one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    /// 429: quota or rate limit hit on this key.
    QuotaExceeded { message: String },
    /// 401: the key was rejected.
    Unauthorized { message: String },
    /// Any other non-2xx status, a timeout, or a transport failure.
    Transient { message: String },
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success)
    }

    /// Quota and auth failures take the key out of rotation for the full
    /// exhaustion cooldown.
    pub fn exhausts_key(&self) -> bool {
        matches!(
            self,
            CallOutcome::QuotaExceeded { .. } | CallOutcome::Unauthorized { .. }
        )
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            CallOutcome::Success => None,
            CallOutcome::QuotaExceeded { message }
            | CallOutcome::Unauthorized { message }
            | CallOutcome::Transient { message } => Some(message),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::QuotaExceeded { .. } => "quota_exceeded",
            CallOutcome::Unauthorized { .. } => "unauthorized",
            CallOutcome::Transient { .. } => "transient",
        }
    }
}

/// Defines the next step of the rotation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Hand the upstream response to the caller.
    ReturnToClient,
    /// Wait `delay`, then try again with the next eligible key.
    RetryNextKey { delay: Duration },
    /// Attempt budget used up.
    GiveUp,
}

/// A link in the response classification chain.
pub trait ResponseHandler: Send + Sync {
    /// Returns `Some` when this handler recognises the response, `None` to
    /// let the next handler in the chain try.
    fn handle(&self, status: StatusCode, body: &Bytes) -> Option<CallOutcome>;
}

/// Body text for diagnostics, cut down to a bounded length.
pub(crate) fn body_excerpt(body: &Bytes) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.chars().count() > MAX_ERROR_BODY_CHARS {
        let cut: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{cut}...")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_excerpt_is_bounded() {
        let long = Bytes::from("x".repeat(2_000));
        let excerpt = body_excerpt(&long);
        assert_eq!(excerpt.len(), MAX_ERROR_BODY_CHARS + 3);
        assert!(excerpt.ends_with("..."));

        assert_eq!(body_excerpt(&Bytes::from_static(b"  short \n")), "short");
    }

    #[test]
    fn test_outcome_helpers() {
        let quota = CallOutcome::QuotaExceeded { message: "q".into() };
        assert!(quota.exhausts_key());
        assert_eq!(quota.message(), Some("q"));
        assert!(!CallOutcome::Transient { message: "t".into() }.exhausts_key());
        assert!(CallOutcome::Success.is_success());
        assert_eq!(CallOutcome::Success.message(), None);
    }
}
