//! Crate-level error type for domain validation failures

use thiserror::Error;

/// Errors raised by domain-type constructors and parsers
#[derive(Debug, Error)]
pub enum CoreError {
    /// A status string from storage did not match any known variant
    #[error("unknown {kind} status: {value}")]
    UnknownStatus { kind: &'static str, value: String },

    /// Attempted a lifecycle transition the state machine forbids
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// A speaker match must reference two distinct speakers
    #[error("speaker match requires two distinct speakers, got {0}")]
    SelfMatch(i64),

    /// An unknown task type reached the router
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
