// src/handlers/mod.rs

pub mod base;
pub mod invalid_api_key;
pub mod policy;
pub mod processor;
pub mod rate_limit;
pub mod server_error;
pub mod success;
pub mod timeout;

pub use base::{Action, CallOutcome, ResponseHandler};
pub use policy::next_action;
pub use processor::ResponseProcessor;
pub use timeout::classify_transport_error;
