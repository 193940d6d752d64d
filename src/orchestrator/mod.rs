pub mod budget;
pub mod context;
pub mod escalation;
pub mod orchestrator;
pub mod state;
