//! Journal of the last successful actions, for resuming after a crash.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PersistenceError;

pub const JOURNAL_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookStep {
    pub id: String,
    pub view: String,
    pub action: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct RecoveryPlaybook {
    path: Option<PathBuf>,
    steps: VecDeque<PlaybookStep>,
}

impl RecoveryPlaybook {
    /// Not backed by a file; steps live only as long as the value.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Read the journal at `path`. A missing file starts an empty journal; an
    /// unreadable one is logged and also starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let steps = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<PlaybookStep>>(&content) {
                Ok(steps) => steps,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "recovery journal is malformed; starting fresh");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read recovery journal");
                Vec::new()
            }
        };

        let mut steps: VecDeque<_> = steps.into();
        while steps.len() > JOURNAL_LIMIT {
            steps.pop_front();
        }
        RecoveryPlaybook { path: Some(path), steps }
    }

    pub fn steps(&self) -> impl Iterator<Item = &PlaybookStep> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append a step, keep the newest `JOURNAL_LIMIT`, and rewrite the file.
    pub fn record_step(&mut self, id: &str, view: &str, action: &str) -> Result<(), PersistenceError> {
        self.steps.push_back(PlaybookStep {
            id: id.to_string(),
            view: view.to_string(),
            action: action.to_string(),
            at: Utc::now(),
        });
        if self.steps.len() > JOURNAL_LIMIT {
            self.steps.pop_front();
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), PersistenceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        ensure_parent(path)?;
        let json = serde_json::to_string_pretty(&self.steps)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Markdown guide for whoever picks the session up after a restart.
    pub fn resume_instructions(&self) -> String {
        if self.steps.is_empty() {
            return "No history found. Start from the default entry point.".to_string();
        }

        let mut md = String::from("## Recovery Playbook: Resuming Session\n\n");
        md.push_str("The following steps are the last successful actions before the interruption:\n\n");
        for (i, step) in self.steps.iter().enumerate() {
            md.push_str(&format!(
                "{}. On **{}**, {} **{}** ({})\n",
                i + 1,
                step.view,
                step.action,
                step.id,
                step.at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        md.push_str("\n**Action required:** re-verify the visual state at the last step before proceeding.\n");
        md
    }
}

pub(crate) fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}
