use std::time::Duration;

use thiserror::Error;

/// Outcome of an isolated external call that did not produce a value.
/// Raised only at the watchdog boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The isolated process missed its deadline and was killed.
    #[error("{call} timed out after {after:?}; isolated process was terminated")]
    Timeout { call: String, after: Duration },

    /// The isolated process died, reported a failure or answered garbage.
    #[error("{call} crashed: {reason}")]
    Crash { call: String, reason: String },

    /// The platform helper is missing or does not support this call.
    #[error("{call} unavailable: {reason}")]
    Unavailable { call: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("map payload could not be encoded or decoded: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("could not prepare storage location: {0}")]
    Io(#[from] std::io::Error),
}

/// Request-level failure surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum UiMapError {
    #[error("timeout: {0}")]
    Timeout(CallError),

    #[error("crash: {0}")]
    Crash(CallError),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("window changed during capture: {0}")]
    CaptureMismatch(String),

    #[error("ambiguous resolution for '{id}': {candidates:?} score identically")]
    AmbiguousResolution { id: String, candidates: Vec<String> },

    #[error("verification failed for '{id}': {reason}")]
    VerificationFailed { id: String, reason: String },

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("deadline exceeded before {phase}")]
    DeadlineExceeded { phase: String },

    #[error("action on '{id}' failed: {source}")]
    ActionFailed { id: String, source: CallError },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("config error: {0}")]
    Config(String),
}

impl UiMapError {
    /// Transient faults that the orchestrator may retry with a fresh scan.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UiMapError::Timeout(_) | UiMapError::Crash(_) | UiMapError::CaptureMismatch(_)
        )
    }
}

impl From<CallError> for UiMapError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Timeout { .. } => UiMapError::Timeout(err),
            CallError::Crash { .. } => UiMapError::Crash(err),
            CallError::Unavailable { .. } => UiMapError::BackendUnavailable(err.to_string()),
        }
    }
}
