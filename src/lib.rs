//! Semantic UI map: a cached, window-relative, named model of an application
//! window, fused from accessibility metadata and visual recognition, used to
//! find and act on UI elements reliably across runs.

pub mod backend;
pub mod builder;
pub mod capture;
pub mod cli;
pub mod error;
pub mod isolation;
pub mod memory;
pub mod model;
pub mod orchestrator;
pub mod resolver;
pub mod trace;
pub mod verify;

pub use error::{CallError, PersistenceError, UiMapError};
pub use orchestrator::{
    context::UiMapContext,
    orchestrator::{Orchestrator, Outcome, ResolvedTarget, UiAction},
};
