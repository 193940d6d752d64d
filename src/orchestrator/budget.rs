use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Extra scan attempts after a timeout, crash or capture mismatch.
    #[serde(default = "default_two")]
    pub scan_retries: u32,

    /// Rescan-and-reverify cycles after a failed verification.
    #[serde(default = "default_two")]
    pub verify_retries: u32,

    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,

    #[serde(default = "default_recognition_timeout_ms")]
    pub recognition_timeout_ms: u64,

    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,

    /// Rescan once when a cached map lacks the requested id.
    #[serde(default = "default_true")]
    pub rescan_on_stale_cache: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scan_retries: 2,
            verify_retries: 2,
            capture_timeout_ms: default_capture_timeout_ms(),
            recognition_timeout_ms: default_recognition_timeout_ms(),
            action_timeout_ms: default_action_timeout_ms(),
            rescan_on_stale_cache: true,
        }
    }
}

fn default_two() -> u32 { 2 }
fn default_capture_timeout_ms() -> u64 { 5000 }
fn default_recognition_timeout_ms() -> u64 { 5000 }
fn default_action_timeout_ms() -> u64 { 3000 }
fn default_true() -> bool { true }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    Retry,
    Exhausted(&'static str),
}

/// Per-request retry allowance.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    scan_remaining: u32,
    verify_remaining: u32,
    stale_rescan_available: bool,
}

impl RetryBudget {
    pub fn new(config: &OrchestratorConfig) -> Self {
        RetryBudget {
            scan_remaining: config.scan_retries,
            verify_remaining: config.verify_retries,
            stale_rescan_available: config.rescan_on_stale_cache,
        }
    }

    pub fn charge_scan(&mut self) -> BudgetDecision {
        if self.scan_remaining == 0 {
            return BudgetDecision::Exhausted("scan_budget_exhausted");
        }
        self.scan_remaining -= 1;
        BudgetDecision::Retry
    }

    pub fn charge_verification(&mut self) -> BudgetDecision {
        if self.verify_remaining == 0 {
            return BudgetDecision::Exhausted("verification_budget_exhausted");
        }
        self.verify_remaining -= 1;
        BudgetDecision::Retry
    }

    /// True the first time only.
    pub fn take_stale_rescan(&mut self) -> bool {
        std::mem::replace(&mut self.stale_rescan_available, false)
    }

    pub fn scan_remaining(&self) -> u32 {
        self.scan_remaining
    }

    pub fn verify_remaining(&self) -> u32 {
        self.verify_remaining
    }
}
