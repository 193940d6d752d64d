//! Process-isolated execution of external calls.
//!
//! Every accessibility, capture, input and recognition call leaves this crate
//! as a short-lived helper process: one JSON request line on stdin, one JSON
//! reply line on stdout. A helper that hangs inside a native API is killed
//! with SIGKILL once its deadline passes, which a thread could never do.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::error::CallError;

const STDERR_LIMIT: u64 = 4096;

/// Program (plus fixed arguments) that performs one kind of external call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl HelperCommand {
    pub fn new(program: impl Into<String>) -> Self {
        HelperCommand {
            program: program.into(),
            args: vec![],
        }
    }

    pub fn with_args<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        HelperCommand {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Reply envelope written by a helper.
#[derive(Debug, Deserialize)]
pub struct IsolatedReply {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub unsupported: bool,
    #[serde(default)]
    pub data: Option<Value>,
}

impl IsolatedReply {
    fn into_result<T: DeserializeOwned>(self, call: &str) -> Result<T, CallError> {
        if !self.ok {
            let reason = self.error.unwrap_or_else(|| "unknown error".into());
            return Err(if self.unsupported {
                CallError::Unavailable {
                    call: call.to_string(),
                    reason,
                }
            } else {
                crash(call, reason)
            });
        }

        serde_json::from_value(self.data.unwrap_or(Value::Null))
            .map_err(|e| crash(call, format!("unexpected reply shape: {}", e)))
    }
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    teardown: Duration,
}

impl Default for Watchdog {
    fn default() -> Self {
        Watchdog::new(Duration::from_millis(500))
    }
}

impl Watchdog {
    /// `teardown` bounds how long we wait for a killed or finished helper to be reaped.
    pub fn new(teardown: Duration) -> Self {
        Watchdog { teardown }
    }

    pub fn teardown(&self) -> Duration {
        self.teardown
    }

    /// Run one call in a fresh helper process.
    ///
    /// Returns within `timeout + teardown` no matter what the helper does.
    /// Never retries.
    pub fn run_isolated<Req, Resp>(
        &self,
        call: &str,
        helper: &HelperCommand,
        request: &Req,
        timeout: Duration,
    ) -> Result<Resp, CallError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_string(request)
            .map_err(|e| crash(call, format!("request not serializable: {}", e)))?;

        let started = Instant::now();
        debug!(call, program = %helper.program, ?timeout, "starting isolated call");

        let mut child = Command::new(&helper.program)
            .args(&helper.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(call, &helper.program, e))?;

        // Written off-thread: a helper that never drains stdin must not stall
        // us past the deadline. A helper that exits before reading closes the
        // pipe; that shows up below.
        if let Some(mut stdin) = child.stdin.take() {
            thread::spawn(move || {
                let _ = writeln!(stdin, "{}", payload);
            });
        }

        let Some(stdout) = child.stdout.take() else {
            self.kill(&mut child);
            return Err(crash(call, "helper stdout was not captured"));
        };
        let stderr_rx = child.stderr.take().map(|stderr| {
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                let mut text = String::new();
                let _ = stderr.take(STDERR_LIMIT).read_to_string(&mut text);
                let _ = tx.send(text);
            });
            rx
        });

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut line = String::new();
            let result = BufReader::new(stdout).read_line(&mut line).map(|_| line);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(Ok(line)) => {
                let status = self.reap(&mut child);
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    let stderr = self.collect_stderr(stderr_rx);
                    return Err(crash(
                        call,
                        format!("helper {} without a reply: {}", status, stderr.trim()),
                    ));
                }

                let reply: IsolatedReply = serde_json::from_str(trimmed)
                    .map_err(|e| crash(call, format!("malformed reply: {}", e)))?;
                debug!(call, elapsed = ?started.elapsed(), ok = reply.ok, "isolated call finished");
                reply.into_result(call)
            }
            Ok(Err(e)) => {
                self.kill(&mut child);
                Err(crash(call, format!("could not read reply: {}", e)))
            }
            Err(RecvTimeoutError::Timeout) => {
                self.kill(&mut child);
                warn!(call, ?timeout, "isolated call timed out; helper killed");
                Err(CallError::Timeout {
                    call: call.to_string(),
                    after: timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.kill(&mut child);
                Err(crash(call, "reply reader vanished"))
            }
        }
    }

    fn kill(&self, child: &mut Child) {
        let _ = child.kill();
        if let Ok(None) = child.wait_timeout(self.teardown) {
            warn!(pid = child.id(), "helper not reaped within teardown window");
        }
    }

    /// Wait for a helper that already replied; kill it if it lingers.
    fn reap(&self, child: &mut Child) -> String {
        match child.wait_timeout(self.teardown) {
            Ok(Some(status)) => format!("exited with {}", status),
            Ok(None) => {
                self.kill(child);
                "lingered and was killed".to_string()
            }
            Err(e) => format!("could not be reaped ({})", e),
        }
    }

    fn collect_stderr(&self, rx: Option<mpsc::Receiver<String>>) -> String {
        rx.and_then(|rx| rx.recv_timeout(self.teardown).ok())
            .unwrap_or_default()
    }
}

fn crash(call: &str, reason: impl Into<String>) -> CallError {
    CallError::Crash {
        call: call.to_string(),
        reason: reason.into(),
    }
}

fn spawn_error(call: &str, program: &str, err: std::io::Error) -> CallError {
    match err.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            CallError::Unavailable {
                call: call.to_string(),
                reason: format!("cannot start helper '{}': {}", program, err),
            }
        }
        _ => crash(call, format!("cannot start helper '{}': {}", program, err)),
    }
}
