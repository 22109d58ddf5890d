//! Postgres-backed adapters for the Quota Store, Execution Log and Function
//! Store, in the same `sqlx` style as the host application's
//! `ChatDatabaseService`: a thin struct wrapping a `PgPool`, one method per
//! operation, `anyhow`-flavoured context collapsed into `EngineError::Infra`
//! at the trait boundary.

use super::{ExecutionLog, FunctionStore, QuotaStore};
use crate::error::{EngineError, EngineResult};
use crate::model::{ExecutionLogRecord, Function, FunctionId, OwnerId, Quota};
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error, warn};

fn infra<E: std::fmt::Display>(context: &str, err: E) -> EngineError {
    EngineError::Infra(format!("{context}: {err}"))
}

#[derive(Clone)]
pub struct PgQuotaStore {
    pool: PgPool,
}

impl PgQuotaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    async fn get(&self, owner_id: &OwnerId) -> EngineResult<Option<Quota>> {
        let row = sqlx::query!(
            r#"
            SELECT owner_id, cpu_time_used_ms, concurrent_count, last_reset_at
            FROM user_quotas
            WHERE owner_id = $1
            "#,
            owner_id.0
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| infra("failed to read quota row", e))?;

        Ok(row.map(|r| Quota {
            owner_id: OwnerId(r.owner_id),
            cpu_time_used_ms: r.cpu_time_used_ms,
            concurrent_count: r.concurrent_count,
            last_reset_at: r.last_reset_at,
        }))
    }

    async fn init(&self, owner_id: &OwnerId) -> EngineResult<()> {
        sqlx::query!(
            r#"
            INSERT INTO user_quotas (owner_id, cpu_time_used_ms, concurrent_count, last_reset_at)
            VALUES ($1, 0, 0, NOW())
            ON CONFLICT (owner_id) DO NOTHING
            "#,
            owner_id.0
        )
        .execute(&self.pool)
        .await
        .map_err(|e| infra("failed to init quota row", e))?;

        Ok(())
    }

    async fn add_cpu_ms(&self, owner_id: &OwnerId, delta_ms: i64) -> EngineResult<()> {
        sqlx::query!(
            r#"
            UPDATE user_quotas
            SET cpu_time_used_ms = cpu_time_used_ms + $2
            WHERE owner_id = $1
            "#,
            owner_id.0,
            delta_ms
        )
        .execute(&self.pool)
        .await
        .map_err(|e| infra("failed to add cpu time", e))?;

        Ok(())
    }

    async fn inc_concurrent(&self, owner_id: &OwnerId) -> EngineResult<()> {
        sqlx::query!(
            r#"
            UPDATE user_quotas
            SET concurrent_count = concurrent_count + 1
            WHERE owner_id = $1
            "#,
            owner_id.0
        )
        .execute(&self.pool)
        .await
        .map_err(|e| infra("failed to increment concurrency", e))?;

        Ok(())
    }

    async fn dec_concurrent(&self, owner_id: &OwnerId) -> EngineResult<()> {
        sqlx::query!(
            r#"
            UPDATE user_quotas
            SET concurrent_count = GREATEST(concurrent_count - 1, 0)
            WHERE owner_id = $1
            "#,
            owner_id.0
        )
        .execute(&self.pool)
        .await
        .map_err(|e| infra("failed to decrement concurrency", e))?;

        Ok(())
    }

    async fn reset_cpu_if_older_than(&self, interval: Duration) -> EngineResult<u64> {
        let interval_secs = interval.as_secs() as f64;
        let result = sqlx::query!(
            r#"
            UPDATE user_quotas
            SET cpu_time_used_ms = 0, last_reset_at = NOW()
            WHERE last_reset_at <= NOW() - make_interval(secs => $1)
            "#,
            interval_secs
        )
        .execute(&self.pool)
        .await
        .map_err(|e| infra("failed to reset cpu quotas", e))?;

        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgExecutionLog {
    pool: PgPool,
}

impl PgExecutionLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionLog for PgExecutionLog {
    async fn append(&self, record: ExecutionLogRecord) -> EngineResult<()> {
        let status = record.status.to_string();
        let elapsed_ms = record.elapsed_ms as i64;

        let result = sqlx::query!(
            r#"
            INSERT INTO execution_log
                (function_id, owner_id, status, output, error, elapsed_ms, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
            record.function_id.0,
            record.owner_id.0,
            status,
            record.output,
            record.error,
            elapsed_ms,
        )
        .execute(&self.pool)
        .await;

        // Per §7: a log-write failure is warned and swallowed, not surfaced
        // as an engine error — it must never mask a successful execution.
        if let Err(e) = result {
            warn!(error = %e, "failed to write execution log row");
            error!(function_id = %record.function_id, owner_id = %record.owner_id, "LogWriteFailed");
        }

        Ok(())
    }
}

#[derive(Clone)]
pub struct PgFunctionStore {
    pool: PgPool,
}

impl PgFunctionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FunctionStore for PgFunctionStore {
    async fn get(&self, id: &FunctionId) -> EngineResult<Option<Function>> {
        let row = sqlx::query!(
            r#"
            SELECT id, owner_id, source_code, enabled
            FROM functions
            WHERE id = $1
            "#,
            id.0
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| infra("failed to read function", e))?;

        Ok(row.map(|r| Function {
            id: FunctionId(r.id),
            owner_id: OwnerId(r.owner_id),
            source_code: r.source_code,
            enabled: r.enabled,
        }))
    }
}
