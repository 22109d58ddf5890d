//! In-memory adapters used by unit tests so the Admission Controller and
//! Orchestrator can be exercised without a Postgres instance.

use super::{ExecutionLog, FunctionStore, QuotaStore};
use crate::error::EngineResult;
use crate::model::{ExecutionLogRecord, Function, FunctionId, OwnerId, Quota};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct InMemoryQuotaStore {
    rows: Arc<RwLock<HashMap<OwnerId, Quota>>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: seed a quota row directly, bypassing `init`.
    pub async fn seed(&self, quota: Quota) {
        self.rows.write().await.insert(quota.owner_id.clone(), quota);
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn get(&self, owner_id: &OwnerId) -> EngineResult<Option<Quota>> {
        Ok(self.rows.read().await.get(owner_id).cloned())
    }

    async fn init(&self, owner_id: &OwnerId) -> EngineResult<()> {
        let mut rows = self.rows.write().await;
        rows.entry(owner_id.clone())
            .or_insert_with(|| Quota::fresh(owner_id.clone(), Utc::now()));
        Ok(())
    }

    async fn add_cpu_ms(&self, owner_id: &OwnerId, delta_ms: i64) -> EngineResult<()> {
        let mut rows = self.rows.write().await;
        if let Some(row) = rows.get_mut(owner_id) {
            row.cpu_time_used_ms += delta_ms;
        }
        Ok(())
    }

    async fn inc_concurrent(&self, owner_id: &OwnerId) -> EngineResult<()> {
        let mut rows = self.rows.write().await;
        if let Some(row) = rows.get_mut(owner_id) {
            row.concurrent_count += 1;
        }
        Ok(())
    }

    async fn dec_concurrent(&self, owner_id: &OwnerId) -> EngineResult<()> {
        let mut rows = self.rows.write().await;
        if let Some(row) = rows.get_mut(owner_id) {
            row.concurrent_count = (row.concurrent_count - 1).max(0);
        }
        Ok(())
    }

    async fn reset_cpu_if_older_than(&self, interval: Duration) -> EngineResult<u64> {
        let mut rows = self.rows.write().await;
        let now = Utc::now();
        let mut reset = 0u64;
        for row in rows.values_mut() {
            let age = now.signed_duration_since(row.last_reset_at);
            if age.to_std().unwrap_or(Duration::ZERO) >= interval {
                row.cpu_time_used_ms = 0;
                row.last_reset_at = now;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryExecutionLog {
    records: Arc<RwLock<Vec<ExecutionLogRecord>>>,
}

impl InMemoryExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn all(&self) -> Vec<ExecutionLogRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl ExecutionLog for InMemoryExecutionLog {
    async fn append(&self, record: ExecutionLogRecord) -> EngineResult<()> {
        self.records.write().await.push(record);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryFunctionStore {
    functions: Arc<RwLock<HashMap<FunctionId, Function>>>,
}

impl InMemoryFunctionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, function: Function) {
        self.functions
            .write()
            .await
            .insert(function.id.clone(), function);
    }
}

#[async_trait]
impl FunctionStore for InMemoryFunctionStore {
    async fn get(&self, id: &FunctionId) -> EngineResult<Option<Function>> {
        Ok(self.functions.read().await.get(id).cloned())
    }
}
