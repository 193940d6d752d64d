use std::time::{Duration, Instant};

use crate::error::{CallError, UiMapError};

/// Caller-supplied bound on a whole request. Every isolated call made on the
/// request's behalf gets at most the time that is left.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Deadline { at: None }
    }

    pub fn after(budget: Duration) -> Self {
        Deadline {
            at: Some(Instant::now() + budget),
        }
    }

    pub fn at(instant: Instant) -> Self {
        Deadline { at: Some(instant) }
    }

    /// `None` means unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(r) if r.is_zero())
    }

    /// Shrink a per-call timeout to what the deadline still allows.
    pub fn clip(&self, budget: Duration, phase: &str) -> Result<Duration, UiMapError> {
        match self.remaining() {
            None => Ok(budget),
            Some(left) if left.is_zero() => Err(UiMapError::DeadlineExceeded {
                phase: phase.to_string(),
            }),
            Some(left) => Ok(budget.min(left)),
        }
    }

    /// Time left for the next step of a multi-call stage bounded by this
    /// deadline. Running out here is a timeout of the stage, not a cancelled request.
    pub fn stage_slice(&self, stage_timeout: Duration, call: &str) -> Result<Duration, CallError> {
        match self.remaining() {
            None => Ok(stage_timeout),
            Some(left) if left.is_zero() => Err(CallError::Timeout {
                call: call.to_string(),
                after: stage_timeout,
            }),
            Some(left) => Ok(left),
        }
    }
}
