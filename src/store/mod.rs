pub mod memory;
pub mod postgres;

use crate::error::EngineResult;
use crate::model::{ExecutionLogRecord, Function, FunctionId, OwnerId, Quota};
use async_trait::async_trait;
use std::time::Duration;

pub use memory::{InMemoryExecutionLog, InMemoryFunctionStore, InMemoryQuotaStore};
pub use postgres::{PgExecutionLog, PgFunctionStore, PgQuotaStore};

/// Per-user durable counters, per §6.2. All mutation methods are atomic
/// with respect to concurrent callers on the same `owner_id` — the store is
/// the serialization point, not the caller.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn get(&self, owner_id: &OwnerId) -> EngineResult<Option<Quota>>;

    /// Idempotent create with zero counters.
    async fn init(&self, owner_id: &OwnerId) -> EngineResult<()>;

    async fn add_cpu_ms(&self, owner_id: &OwnerId, delta_ms: i64) -> EngineResult<()>;

    async fn inc_concurrent(&self, owner_id: &OwnerId) -> EngineResult<()>;

    async fn dec_concurrent(&self, owner_id: &OwnerId) -> EngineResult<()>;

    /// Administrative: zero `cpu_time_used_ms` for every row whose
    /// `last_reset_at` is older than `interval`. Returns the number of rows
    /// reset.
    async fn reset_cpu_if_older_than(&self, interval: Duration) -> EngineResult<u64>;
}

/// Append-only audit trail of terminated invocations, per §4.4 step 7.
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn append(&self, record: ExecutionLogRecord) -> EngineResult<()>;
}

/// Read-only view onto the out-of-scope function CRUD collaborator's data,
/// per §4.5. The engine never writes through this trait.
#[async_trait]
pub trait FunctionStore: Send + Sync {
    async fn get(&self, id: &FunctionId) -> EngineResult<Option<Function>>;
}
