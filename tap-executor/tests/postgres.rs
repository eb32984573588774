#![cfg(feature = "test-utils")]

use serde_json::json;
use tap_executor::error::ErrorKind;
use tap_executor::sink::postgres::PostgresSink;
use tap_executor::sink::{BatchOrigin, Sink};
use tap_executor::store::StateStore;
use tap_executor::store::postgres::PostgresStateStore;
use tap_executor::test_utils::database::{spawn_test_database, test_database_options};
use tap_executor::test_utils::messages::bookmark;
use tap_executor::types::{Record, RunId, RunStatus, TapId, Value};
use tap_telemetry::tracing::init_test_tracing;

fn record(id: i64) -> Record {
    Record::from([("id".to_string(), Value::from(id))])
}

#[tokio::test]
async fn postgres_store_commits_and_freezes_terminal_runs() {
    init_test_tracing();
    let Some(options) = test_database_options() else {
        return;
    };

    let store = PostgresStateStore::new(spawn_test_database(options).await);
    let tap_id = TapId::new("tap-woocommerce");
    let run_id = RunId::new();

    let created = store.create_run(run_id, tap_id.clone()).await.unwrap();
    assert_eq!(created.status, RunStatus::Pending);
    assert_eq!(created.commit_count, 0);

    let err = store.create_run(run_id, tap_id.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreConflict);

    store.update_status(run_id, RunStatus::Running).await.unwrap();
    store
        .commit(run_id, bookmark(json!({"orders_cursor": 1})))
        .await
        .unwrap();
    store
        .commit(run_id, bookmark(json!({"orders_cursor": 2})))
        .await
        .unwrap();

    let stored = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(stored.commit_count, 2);
    assert_eq!(stored.bookmark, Some(bookmark(json!({"orders_cursor": 2}))));

    store.update_status(run_id, RunStatus::Failed).await.unwrap();

    let err = store
        .commit(run_id, bookmark(json!({"orders_cursor": 3})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreConflict);
    let err = store
        .update_status(run_id, RunStatus::Running)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreConflict);

    assert_eq!(
        store.load(run_id).await.unwrap(),
        Some(bookmark(json!({"orders_cursor": 2})))
    );
    assert_eq!(
        store.latest_bookmark(&tap_id).await.unwrap(),
        Some(bookmark(json!({"orders_cursor": 2})))
    );
    assert_eq!(store.load(RunId::new()).await.unwrap(), None);
}

#[tokio::test]
async fn postgres_sink_inserts_batches_in_chunks() {
    init_test_tracing();
    let Some(options) = test_database_options() else {
        return;
    };

    let pool = spawn_test_database(options).await;
    let sink = PostgresSink::new(pool.clone(), 2);
    let origin = BatchOrigin {
        run_id: RunId::new(),
        tap_id: TapId::new("tap-woocommerce"),
    };

    sink.deliver(&origin, "orders", (1..=5).map(record).collect())
        .await
        .unwrap();

    let rows: Vec<(String, serde_json::Value)> = sqlx::query_as(
        "select stream, record from tap_executor.raw_records where run_id = $1 order by id",
    )
    .bind(origin.run_id.as_uuid())
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0], ("orders".to_string(), json!({"id": 1})));
    assert_eq!(rows[4].1, json!({"id": 5}));
}

#[tokio::test]
async fn postgres_sink_clamps_chunks_to_the_bind_parameter_limit() {
    init_test_tracing();
    let Some(options) = test_database_options() else {
        return;
    };

    let pool = spawn_test_database(options).await;
    let sink = PostgresSink::new(pool.clone(), 100_000);
    let origin = BatchOrigin {
        run_id: RunId::new(),
        tap_id: TapId::new("tap-woocommerce"),
    };

    // One statement with this many rows would need more than 65535 parameters.
    sink.deliver(&origin, "orders", (1..=20_000).map(record).collect())
        .await
        .unwrap();

    let (count,): (i64,) =
        sqlx::query_as("select count(*) from tap_executor.raw_records where run_id = $1")
            .bind(origin.run_id.as_uuid())
            .fetch_one(&pool)
            .await
            .unwrap();

    assert_eq!(count, 20_000);
}
