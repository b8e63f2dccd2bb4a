// src/handlers/policy.rs

use super::base::{Action, CallOutcome};
use std::time::Duration;

/// Decides what happens after attempt number `attempt` (1-based).
///
/// Pure: no clock, no I/O. The rotation loop performs whatever this returns.
pub fn next_action(
    outcome: &CallOutcome,
    attempt: u32,
    max_attempts: u32,
    retry_delay: Duration,
) -> Action {
    if outcome.is_success() {
        Action::ReturnToClient
    } else if attempt < max_attempts {
        Action::RetryNextKey { delay: retry_delay }
    } else {
        Action::GiveUp
    }
}
