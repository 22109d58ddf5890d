//! Sandbox Runner (§4.2): spawns a hardened child process, feeds it the
//! user's source plus a serialized input payload, drains its pipes
//! concurrently with a hard deadline, and disposes of every OS resource it
//! allocates regardless of how the invocation ends.

pub mod capture;

use crate::config::EngineConfig;
use crate::error::EngineError;
use std::process::Stdio;
use std::time::Duration;
use tempfile::Builder as TempFileBuilder;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Output truncation cap shared with Capture (§4.3 step 4, §4.2 "> 1 MiB"
/// boundary behavior).
pub const MAX_CAPTURED_BYTES: usize = 1024 * 1024;
const TRUNCATION_MARKER: &str = "\n...[truncated]";
const READ_CHUNK_SIZE: usize = 8192;

/// Outcome of one sandbox invocation, per §4.2.
#[derive(Debug)]
pub enum SandboxOutcome {
    Completed {
        success: bool,
        stdout_bytes: Vec<u8>,
        stderr_bytes: Vec<u8>,
    },
    TimedOut {
        stdout_so_far: Vec<u8>,
        #[allow(dead_code)]
        stderr_so_far: Vec<u8>,
    },
    SpawnFailed {
        reason: String,
    },
}

/// Spawns the configured interpreter under a closed, least-privilege flag
/// set. The interpreter binary and its flags are read once at construction
/// time (§6.4) — never computed per request.
#[derive(Clone)]
pub struct SandboxRunner {
    interpreter_path: String,
    interpreter_args: Vec<String>,
    /// File extension for the scratch unit, matched to the interpreter's
    /// module-type detection (e.g. `.ts` for a TypeScript-aware runtime).
    scratch_suffix: String,
}

impl SandboxRunner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            interpreter_path: config.interpreter_path.clone(),
            interpreter_args: config.interpreter_args.clone(),
            scratch_suffix: ".ts".to_string(),
        }
    }

    /// Construct a runner pointed at an arbitrary interpreter binary and
    /// flag list — used by tests to stand in for the real interpreter with
    /// e.g. a plain shell, without touching the least-privilege flags that
    /// production uses.
    pub fn with_interpreter(
        interpreter_path: impl Into<String>,
        interpreter_args: Vec<String>,
        scratch_suffix: impl Into<String>,
    ) -> Self {
        Self {
            interpreter_path: interpreter_path.into(),
            interpreter_args,
            scratch_suffix: scratch_suffix.into(),
        }
    }

    /// Run `source_code` with `input` pre-bound to the symbol `input`,
    /// enforcing `deadline_ms` as a hard wall-clock cap (§4.2 steps 1-5).
    pub async fn run(
        &self,
        source_code: &str,
        input: Option<&serde_json::Value>,
        deadline_ms: u64,
    ) -> SandboxOutcome {
        let program = self.materialize(source_code, input);

        let scratch = match TempFileBuilder::new()
            .prefix("faas-invocation-")
            .suffix(&self.scratch_suffix)
            .tempfile()
        {
            Ok(f) => f,
            Err(e) => {
                return SandboxOutcome::SpawnFailed {
                    reason: format!("failed to create scratch file: {e}"),
                }
            }
        };

        if let Err(e) = tokio::fs::write(scratch.path(), program.as_bytes()).await {
            return SandboxOutcome::SpawnFailed {
                reason: format!("failed to write scratch file: {e}"),
            };
        }

        let mut command = Command::new(&self.interpreter_path);
        command
            .args(&self.interpreter_args)
            .arg(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            // Strip the parent's environment so nothing in it (database
            // URLs, API keys) is reachable even if the interpreter's own
            // `--deny-env` flag were ever misconfigured. PATH is the only
            // value carried through, so the interpreter binary itself can
            // still resolve its own dependencies.
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default());

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                // `scratch` (a `NamedTempFile`) deletes itself on drop here.
                return SandboxOutcome::SpawnFailed {
                    reason: format!("failed to spawn interpreter: {e}"),
                };
            }
        };

        let outcome = self
            .drain_with_deadline(child, Duration::from_millis(deadline_ms))
            .await;

        // Dispose the scratch unit unconditionally (§4.2 step 5). Cleanup
        // failures are swallowed — a stray temp file is not a correctness
        // bug, an orphaned child process is.
        if let Err(e) = scratch.close() {
            warn!(error = %e, "failed to remove sandbox scratch file");
        }

        outcome
    }

    fn materialize(&self, source_code: &str, input: Option<&serde_json::Value>) -> String {
        let input_json = input.cloned().unwrap_or(serde_json::Value::Null);
        format!(
            "const input = {};\n{}",
            serde_json::to_string(&input_json).unwrap_or_else(|_| "null".to_string()),
            source_code
        )
    }

    async fn drain_with_deadline(&self, mut child: Child, deadline: Duration) -> SandboxOutcome {
        let stdout = match child.stdout.take() {
            Some(s) => s,
            None => {
                return SandboxOutcome::SpawnFailed {
                    reason: "stdout pipe unavailable".to_string(),
                }
            }
        };
        let stderr = match child.stderr.take() {
            Some(s) => s,
            None => {
                return SandboxOutcome::SpawnFailed {
                    reason: "stderr pipe unavailable".to_string(),
                }
            }
        };

        // Drained concurrently with waiting on exit so a full pipe buffer
        // can never deadlock the child (§4.2 design notes).
        let stdout_task = tokio::spawn(read_capped(stdout));
        let stderr_task = tokio::spawn(read_capped(stderr));

        let wait_result = tokio::time::timeout(deadline, child.wait()).await;

        match wait_result {
            Ok(Ok(status)) => {
                let stdout_bytes = stdout_task.await.unwrap_or_default();
                let stderr_bytes = stderr_task.await.unwrap_or_default();
                SandboxOutcome::Completed {
                    success: status.success(),
                    stdout_bytes,
                    stderr_bytes,
                }
            }
            Ok(Err(e)) => SandboxOutcome::SpawnFailed {
                reason: format!("failed to wait for child: {e}"),
            },
            Err(_elapsed) => {
                debug!("sandbox exceeded deadline, forcing termination");
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "failed to send kill signal to sandbox child");
                }
                // Ensure OS resources are released before returning (§4.2
                // design notes: orphaned children are a correctness bug).
                let _ = child.wait().await;
                let stdout_so_far = stdout_task.await.unwrap_or_default();
                let stderr_so_far = stderr_task.await.unwrap_or_default();
                SandboxOutcome::TimedOut {
                    stdout_so_far,
                    stderr_so_far,
                }
            }
        }
    }
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }
    buf
}

/// Truncate a textual payload to `MAX_CAPTURED_BYTES`, appending the
/// truncation marker, per §4.3 step 4 / §8 boundary behavior.
pub fn truncate_captured(text: &str) -> String {
    if text.len() <= MAX_CAPTURED_BYTES {
        return text.to_string();
    }
    let mut cut = MAX_CAPTURED_BYTES;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &text[..cut], TRUNCATION_MARKER)
}

pub(crate) fn sandbox_error_from_outcome(outcome: &SandboxOutcome, max_wall_ms: u64) -> Option<EngineError> {
    match outcome {
        SandboxOutcome::SpawnFailed { reason } => Some(EngineError::SpawnFailed(reason.clone())),
        SandboxOutcome::TimedOut { .. } => Some(EngineError::Timeout(max_wall_ms / 1000)),
        SandboxOutcome::Completed { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_text_untouched() {
        assert_eq!(truncate_captured("hello"), "hello");
    }

    #[test]
    fn truncate_caps_long_text_with_marker() {
        let long = "a".repeat(MAX_CAPTURED_BYTES + 10);
        let truncated = truncate_captured(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.ends_with(TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn happy_path_echo_via_shell_stand_in() {
        let runner = SandboxRunner::with_interpreter("/bin/sh", vec![], ".sh");
        let outcome = runner.run("echo hello-from-sandbox", None, 5_000).await;
        match outcome {
            SandboxOutcome::Completed {
                success,
                stdout_bytes,
                ..
            } => {
                assert!(success);
                let out = String::from_utf8_lossy(&stdout_bytes);
                assert!(out.contains("hello-from-sandbox"));
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deadline_forces_termination_of_a_runaway_child() {
        let runner = SandboxRunner::with_interpreter("/bin/sh", vec![], ".sh");
        let start = std::time::Instant::now();
        let outcome = runner.run("sleep 30", None, 200).await;
        let elapsed = start.elapsed();
        assert!(matches!(outcome, SandboxOutcome::TimedOut { .. }));
        // Forced termination should return well before the runaway sleep.
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_as_unsuccessful() {
        let runner = SandboxRunner::with_interpreter("/bin/sh", vec![], ".sh");
        let outcome = runner.run("exit 1", None, 5_000).await;
        match outcome {
            SandboxOutcome::Completed { success, .. } => assert!(!success),
            other => panic!("expected Completed, got {other:?}"),
        }
    }
}
