//! Human-readable markdown audit trail of actions, halts and escalations.
//!
//! Entries go to `<dir>/audit_log.md`. When the file was last written on an
//! earlier day it is rotated to `audit_log.md.<date>` first; the newest
//! `BACKUP_DAYS` rotated files are kept.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, NaiveDate};
use parking_lot::Mutex;
use tracing::warn;

pub const AUDIT_FILE: &str = "audit_log.md";
pub const BACKUP_DAYS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    Action,
    SafetyHalt,
    Escalation,
    OnDemand,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::Action => "ACTION",
            AuditEvent::SafetyHalt => "SAFETY_HALT",
            AuditEvent::Escalation => "ESCALATION",
            AuditEvent::OnDemand => "ON_DEMAND",
        }
    }
}

pub struct AuditLog {
    dir: Option<PathBuf>,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        match fs::create_dir_all(&dir) {
            Ok(()) => AuditLog { dir: Some(dir), lock: Mutex::new(()) },
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "could not create audit directory; audit log disabled");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        AuditLog { dir: None, lock: Mutex::new(()) }
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(AUDIT_FILE))
    }

    /// Append one entry. Failures are logged, never returned.
    pub fn log_snapshot(&self, body: &str, event: AuditEvent) {
        let Some(dir) = &self.dir else {
            return;
        };
        let _guard = self.lock.lock();
        let path = dir.join(AUDIT_FILE);
        let now = Local::now();

        rotate_if_stale(dir, &path, now.date_naive());

        let entry = format!(
            "---\n### Event: {}\n**Timestamp:** {}\n\n{}\n\n---\n",
            event.as_str(),
            now.format("%Y-%m-%d %H:%M:%S"),
            body.trim_end()
        );

        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(entry.as_bytes()));
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "failed to write audit entry");
        }
    }
}

fn rotate_if_stale(dir: &Path, path: &Path, today: NaiveDate) {
    let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) else {
        return;
    };
    let written_on = DateTime::<Local>::from(modified).date_naive();
    if written_on >= today {
        return;
    }

    let rotated = dir.join(format!("{}.{}", AUDIT_FILE, written_on.format("%Y-%m-%d")));
    if let Err(e) = fs::rename(path, &rotated) {
        warn!(path = %path.display(), error = %e, "failed to rotate audit log");
        return;
    }
    prune_backups(dir);
}

fn prune_backups(dir: &Path) {
    let prefix = format!("{}.", AUDIT_FILE);
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    let mut backups: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix))
        })
        .collect();

    // Dates sort lexically.
    backups.sort();
    let excess = backups.len().saturating_sub(BACKUP_DAYS);
    for old in backups.into_iter().take(excess) {
        if let Err(e) = fs::remove_file(&old) {
            warn!(path = %old.display(), error = %e, "failed to prune audit backup");
        }
    }
}
