#![cfg(feature = "local-tests")]

mod common;

use faas_engine::model::{ExecutionLogRecord, ExecutionStatus, Function, FunctionId, OwnerId};
use faas_engine::store::{ExecutionLog, FunctionStore, PgExecutionLog, PgFunctionStore, PgQuotaStore, QuotaStore};
use serial_test::serial;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn quota_store_round_trips_through_postgres() {
    let pool = common::setup_test_db().await;
    let store = PgQuotaStore::new(pool);
    let owner_id = OwnerId("test_quota_user".to_string());

    store.init(&owner_id).await.unwrap();
    // init is idempotent.
    store.init(&owner_id).await.unwrap();

    store.inc_concurrent(&owner_id).await.unwrap();
    store.add_cpu_ms(&owner_id, 1_500).await.unwrap();

    let quota = store.get(&owner_id).await.unwrap().unwrap();
    assert_eq!(quota.concurrent_count, 1);
    assert_eq!(quota.cpu_time_used_ms, 1_500);

    store.dec_concurrent(&owner_id).await.unwrap();
    let quota = store.get(&owner_id).await.unwrap().unwrap();
    assert_eq!(quota.concurrent_count, 0);
}

#[tokio::test]
#[serial]
async fn dec_concurrent_never_goes_negative() {
    let pool = common::setup_test_db().await;
    let store = PgQuotaStore::new(pool);
    let owner_id = OwnerId("test_quota_floor".to_string());
    store.init(&owner_id).await.unwrap();

    store.dec_concurrent(&owner_id).await.unwrap();
    let quota = store.get(&owner_id).await.unwrap().unwrap();
    assert_eq!(quota.concurrent_count, 0);
}

#[tokio::test]
#[serial]
async fn reset_cpu_if_older_than_only_touches_stale_rows() {
    let pool = common::setup_test_db().await;
    let store = PgQuotaStore::new(pool);
    let owner_id = OwnerId("test_quota_reset".to_string());
    store.init(&owner_id).await.unwrap();
    store.add_cpu_ms(&owner_id, 10_000).await.unwrap();

    // The row was just created, so a 1-hour staleness window shouldn't touch it.
    let reset = store
        .reset_cpu_if_older_than(Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(reset, 0);
    let quota = store.get(&owner_id).await.unwrap().unwrap();
    assert_eq!(quota.cpu_time_used_ms, 10_000);

    // A zero-second window always counts as stale.
    let reset = store
        .reset_cpu_if_older_than(Duration::from_secs(0))
        .await
        .unwrap();
    assert!(reset >= 1);
    let quota = store.get(&owner_id).await.unwrap().unwrap();
    assert_eq!(quota.cpu_time_used_ms, 0);
}

#[tokio::test]
#[serial]
async fn execution_log_append_persists_a_row() {
    let pool = common::setup_test_db().await;
    let log = PgExecutionLog::new(pool);

    log.append(ExecutionLogRecord {
        function_id: FunctionId("test_fn".to_string()),
        owner_id: OwnerId("test_log_user".to_string()),
        status: ExecutionStatus::Success,
        output: Some("ok".to_string()),
        error: None,
        elapsed_ms: 42,
    })
    .await
    .unwrap();
}

#[tokio::test]
#[serial]
async fn function_store_reads_back_a_seeded_function() {
    let pool = common::setup_test_db().await;
    sqlx::query(
        "INSERT INTO functions (id, owner_id, source_code, enabled) VALUES ($1, $2, $3, $4)
         ON CONFLICT (id) DO UPDATE SET source_code = EXCLUDED.source_code",
    )
    .bind("test_fn_store")
    .bind("test_fn_owner")
    .bind("console.log('hi')")
    .bind(true)
    .execute(&pool)
    .await
    .unwrap();

    let store = PgFunctionStore::new(pool);
    let function = store
        .get(&FunctionId("test_fn_store".to_string()))
        .await
        .unwrap();

    assert_eq!(
        function,
        Some(Function {
            id: FunctionId("test_fn_store".to_string()),
            owner_id: OwnerId("test_fn_owner".to_string()),
            source_code: "console.log('hi')".to_string(),
            enabled: true,
        })
    );
}
