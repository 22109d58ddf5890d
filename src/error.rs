use thiserror::Error;

/// Typed error taxonomy for the execution engine.
///
/// Every component returns one of these instead of a boxed `dyn Error` so that
/// the Orchestrator can match on the kind when deciding whether a failure is
/// user-visible, retryable, or an infrastructure concern to warn-and-swallow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Machine at capacity: maximum {0} concurrent instances reached")]
    MachineAtCapacity(u32),

    #[error("User concurrency limit exceeded: maximum {0} concurrent executions per user")]
    UserConcurrencyExceeded(u32),

    #[error("User CPU time quota exceeded")]
    UserCpuExceeded,

    #[error("execution would exceed CPU time quota")]
    CpuQuotaWouldBeExceeded,

    #[error("quota not initialized for user")]
    QuotaNotInitialized,

    #[error("failed to spawn sandbox: {0}")]
    SpawnFailed(String),

    #[error("Execution timeout: exceeded {0} second limit")]
    Timeout(u64),

    #[error("{0}")]
    UserCodeFailed(String),

    #[error("function not found")]
    FunctionNotFound,

    #[error("function is disabled")]
    FunctionDisabled,

    #[error("infrastructure error: {0}")]
    Infra(String),
}

impl EngineError {
    /// Whether this error kind should short-circuit before any sandbox is
    /// spawned (admission rejections never produce an Execution Log row or
    /// a quota CPU-time increment).
    pub fn is_admission_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::MachineAtCapacity(_)
                | EngineError::UserConcurrencyExceeded(_)
                | EngineError::UserCpuExceeded
                | EngineError::QuotaNotInitialized
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
