//! Engine Orchestrator (§4.4): the public entry point. Ties Admission, the
//! Sandbox Runner, Capture, the Quota Store and the Execution Log together
//! into the single `execute` operation described in §6.1.

use crate::admission::AdmissionController;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{CaptureOutcome, ExecutionLogRecord, ExecutionRequest, ExecutionResult};
use crate::sandbox::capture::capture_stdout;
use crate::sandbox::{sandbox_error_from_outcome, SandboxOutcome, SandboxRunner};
use crate::store::{ExecutionLog, QuotaStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// The engine's two boundaries (§6) realized as one struct: the Engine API
/// (`execute`, `current_instance_count`, `max_instances`) plus the
/// collaborator dependencies it consumes (Quota Store, Execution Log).
#[derive(Clone)]
pub struct Engine {
    admission: AdmissionController,
    runner: SandboxRunner,
    quota_store: Arc<dyn QuotaStore>,
    execution_log: Arc<dyn ExecutionLog>,
    max_wall_ms: u64,
    max_user_cpu_ms: i64,
}

impl Engine {
    pub fn new(
        config: &EngineConfig,
        quota_store: Arc<dyn QuotaStore>,
        execution_log: Arc<dyn ExecutionLog>,
    ) -> Self {
        let admission = AdmissionController::new(
            quota_store.clone(),
            config.max_machine_instances,
            config.max_user_concurrent,
            config.max_user_cpu_ms,
        );
        Self {
            admission,
            runner: SandboxRunner::new(config),
            quota_store,
            execution_log,
            max_wall_ms: config.max_wall_ms,
            max_user_cpu_ms: config.max_user_cpu_ms,
        }
    }

    /// Test/advanced constructor that accepts an arbitrary `SandboxRunner`
    /// (e.g. one pointed at a shell stand-in interpreter).
    pub fn with_runner(
        config: &EngineConfig,
        runner: SandboxRunner,
        quota_store: Arc<dyn QuotaStore>,
        execution_log: Arc<dyn ExecutionLog>,
    ) -> Self {
        let mut engine = Self::new(config, quota_store, execution_log);
        engine.runner = runner;
        engine
    }

    pub async fn current_instance_count(&self) -> u32 {
        self.admission.current_instance_count().await
    }

    pub fn max_instances(&self) -> u32 {
        self.admission.max_instances()
    }

    /// §6.1 `execute`. Never panics out to the caller as an error type —
    /// always returns a structured `ExecutionResult`.
    #[instrument(skip(self, request), fields(function_id = %request.function_id, owner_id = %request.owner_id))]
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        // §4.4 step 1: admission short-circuits before any compute and
        // before any log row or quota increment.
        let ticket = match self.admission.acquire(request.owner_id.clone()).await {
            Ok(ticket) => ticket,
            Err(err) => {
                info!(error = %err, "admission rejected invocation");
                return ExecutionResult::error(err.to_string(), 0);
            }
        };

        let result = self.execute_admitted(&request).await;

        // §4.4 step 8: release is guaranteed on every exit path, including
        // the panic case the `Drop` impl on `AdmissionTicket` backstops.
        ticket.release().await;

        result
    }

    async fn execute_admitted(&self, request: &ExecutionRequest) -> ExecutionResult {
        let t0 = Instant::now();
        let outcome = self
            .runner
            .run(&request.source_code, request.input.as_ref(), self.max_wall_ms)
            .await;
        let elapsed_ms = t0.elapsed().as_millis() as u64;

        let mut result = self.translate_outcome(outcome, elapsed_ms);

        // §4.4 step 5: post-admission CPU-budget check. The elapsed time is
        // still billed even when this check trips (§9 open question,
        // preserved as specified).
        if let Ok(Some(quota)) = self.quota_store.get(&request.owner_id).await {
            if quota.cpu_time_used_ms + elapsed_ms as i64 > self.max_user_cpu_ms {
                result = ExecutionResult::error(
                    EngineError::CpuQuotaWouldBeExceeded.to_string(),
                    elapsed_ms,
                );
            }
        }

        // §4.4 step 6: always bill the measured elapsed time. Per the §9
        // decision recorded in SPEC_FULL.md, `concurrent_count` is NOT
        // touched here — only the ticket-release path decrements it.
        if let Err(e) = self.quota_store.add_cpu_ms(&request.owner_id, elapsed_ms as i64).await {
            warn!(error = %e, "failed to bill cpu time");
        }

        // §4.4 step 7: one Execution Log row per terminated admitted
        // invocation.
        let log_record = ExecutionLogRecord {
            function_id: request.function_id.clone(),
            owner_id: request.owner_id.clone(),
            status: result.status,
            output: result.output.clone(),
            error: result.error.clone(),
            elapsed_ms: result.elapsed_ms,
        };
        if let Err(e) = self.execution_log.append(log_record).await {
            // §7: LogWriteFailed is warned and swallowed, never masks a
            // successful execution.
            warn!(error = %e, "failed to append execution log row");
        }

        result
    }

    fn translate_outcome(&self, outcome: SandboxOutcome, elapsed_ms: u64) -> ExecutionResult {
        if let Some(err) = sandbox_error_from_outcome(&outcome, self.max_wall_ms) {
            return ExecutionResult::error(err.to_string(), elapsed_ms);
        }

        match outcome {
            SandboxOutcome::Completed {
                success,
                stdout_bytes,
                stderr_bytes,
            } => {
                if success {
                    match capture_stdout(&stdout_bytes) {
                        CaptureOutcome::Envelope(envelope) => {
                            let output = serde_json::to_string(&envelope)
                                .unwrap_or_else(|_| envelope.body.as_text());
                            ExecutionResult::success(output, elapsed_ms)
                        }
                        CaptureOutcome::Raw(text) => ExecutionResult::success(text, elapsed_ms),
                    }
                } else {
                    let stderr_text = String::from_utf8_lossy(&stderr_bytes).trim().to_string();
                    let message = if stderr_text.is_empty() {
                        "user code exited with a non-zero status".to_string()
                    } else {
                        stderr_text
                    };
                    ExecutionResult::error(
                        EngineError::UserCodeFailed(message).to_string(),
                        elapsed_ms,
                    )
                }
            }
            SandboxOutcome::TimedOut { .. } | SandboxOutcome::SpawnFailed { .. } => {
                unreachable!("handled by sandbox_error_from_outcome above")
            }
        }
    }
}
