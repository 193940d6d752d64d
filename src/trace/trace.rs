use chrono::Utc;
use serde::Serialize;

use crate::{model::fingerprint::WindowFingerprint, orchestrator::state::Phase};

/// One line of the pipeline trace: a single orchestrator step.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub timestamp_ms: i64,
    pub request_id: String,
    pub step: u64,

    pub phase: String,
    pub next_phase: Option<String>,

    pub fingerprint: Option<String>,
    pub semantic_id: Option<String>,

    pub decision: Option<String>,
    pub detail: Option<String>,
}

impl TraceEvent {
    pub fn now(request_id: &str, step: u64, phase: Phase) -> Self {
        Self {
            timestamp_ms: Utc::now().timestamp_millis(),
            request_id: request_id.to_string(),
            step,
            phase: format!("{:?}", phase),
            next_phase: None,
            fingerprint: None,
            semantic_id: None,
            decision: None,
            detail: None,
        }
    }

    pub fn with_next(mut self, next: Phase) -> Self {
        self.next_phase = Some(format!("{:?}", next));
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<&WindowFingerprint>) -> Self {
        self.fingerprint = fingerprint.map(|fp| fp.to_string());
        self
    }

    pub fn with_semantic_id(mut self, id: Option<&str>) -> Self {
        self.semantic_id = id.map(str::to_string);
        self
    }

    pub fn with_decision(mut self, decision: impl ToString) -> Self {
        self.decision = Some(decision.to_string());
        self
    }

    pub fn with_detail(mut self, detail: impl ToString) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}
