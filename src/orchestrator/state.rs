use std::fmt;

use serde::Serialize;

/// Request phases, in pipeline order. `Done` and `Escalate` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    CacheLookup,
    CacheHit,
    Scanning,
    Building,
    Resolving,
    Verifying,
    Acting,
    Done,
    Escalate,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Escalate)
    }
}

/// Why a request was handed to the external reasoning collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    /// The id is not in the map, or a label has no control within range.
    NoCandidate { id: String },
    VerificationExhausted { id: String, last: String },
    ScanExhausted { last: String },
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationReason::NoCandidate { id } => {
                write!(f, "no candidate found for '{}'", id)
            }
            EscalationReason::VerificationExhausted { id, last } => {
                write!(f, "verification of '{}' kept failing: {}", id, last)
            }
            EscalationReason::ScanExhausted { last } => {
                write!(f, "scan kept failing: {}", last)
            }
        }
    }
}
