use std::{fs::OpenOptions, io::Write, path::Path};

use parking_lot::Mutex;
use tracing::warn;

use crate::{memory::playbook::ensure_parent, trace::trace::TraceEvent};

/// Appends `TraceEvent`s as JSON lines. Write failures are logged and
/// swallowed; tracing never fails a request.
pub struct TraceLogger {
    file: Option<Mutex<std::fs::File>>,
}

impl TraceLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let file = ensure_parent(path).and_then(|_| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
        });

        match file {
            Ok(f) => Self {
                file: Some(Mutex::new(f)),
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not open trace file; tracing disabled");
                Self { file: None }
            }
        }
    }

    pub fn disabled() -> Self {
        Self { file: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    pub fn log(&self, event: &TraceEvent) {
        let Some(file) = &self.file else {
            return;
        };

        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "failed to serialize trace event");
                return;
            }
        };

        if let Err(e) = writeln!(file.lock(), "{}", json) {
            warn!(error = %e, "failed to write trace event");
        }
    }
}
