//! End-to-end ingestion tests over real warehouse files
//!
//! Every test opens its own throwaway SQLite warehouse, so tests are
//! independent and exercise the same pool/transaction paths production uses.

use siren_common::db;
use siren_ingest::dimensions::{DateValue, IncidentTypeValue, LocationValue, StagedDimensions};
use siren_ingest::fact::FactRow;
use siren_ingest::ledger::{self, RunCounts};
use siren_ingest::pipeline::IngestionPipeline;
use siren_ingest::{run_ingestion, writer, IngestError, RawRecord, RunStatus};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

async fn test_warehouse() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let pool = db::init_database(&dir.path().join("warehouse.db"))
        .await
        .unwrap();
    (dir, pool)
}

/// A fully populated record; tests vary fields from this baseline
fn record(incident_number: i64) -> RawRecord {
    RawRecord {
        incident_number: Some(incident_number),
        call_number: Some(incident_number + 900_000),
        received_dttm: Some("04/12/2023 10:00:00 AM".to_string()),
        dispatch_dttm: Some("04/12/2023 10:02:00 AM".to_string()),
        on_scene_dttm: Some("04/12/2023 10:09:00 AM".to_string()),
        close_dttm: Some("04/12/2023 10:40:00 AM".to_string()),
        incident_date: Some("04/12/2023".to_string()),
        call_type: Some("Medical Incident".to_string()),
        call_type_group: Some("Potentially Life-Threatening".to_string()),
        final_priority: Some(3),
        address: Some("1 Main St".to_string()),
        city: Some("San Francisco".to_string()),
        neighborhood: Some("Mission".to_string()),
        battalion: Some("B02".to_string()),
        station_area: Some("07".to_string()),
        als_unit: Some("True".to_string()),
        ..Default::default()
    }
}

async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Latest ledger row for a watermark: (status, records_accepted, committed_at)
async fn ledger_row(pool: &SqlitePool, watermark: &str) -> (String, i64, Option<String>) {
    sqlx::query_as::<_, (String, i64, Option<String>)>(
        r#"
        SELECT status, records_accepted, committed_at
        FROM ingestion_runs
        WHERE watermark = ?
        ORDER BY rowid DESC
        LIMIT 1
        "#,
    )
    .bind(watermark)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn commits_a_batch_and_populates_the_star_schema() {
    let (_dir, pool) = test_warehouse().await;

    let batch = vec![record(1), record(2)];
    let outcome = run_ingestion(&pool, batch, "2023-04-12").await.unwrap();

    assert_eq!(outcome.status, RunStatus::Committed);
    assert_eq!(outcome.records_accepted, 2);
    assert_eq!(outcome.records_duplicate, 0);
    assert_eq!(outcome.records_rejected, 0);

    assert_eq!(count(&pool, "fact_incident").await, 2);
    assert_eq!(count(&pool, "dim_date").await, 1);
    assert_eq!(count(&pool, "dim_location").await, 1);
    assert_eq!(count(&pool, "dim_incident_type").await, 1);

    let (status, accepted, committed_at) = ledger_row(&pool, "2023-04-12").await;
    assert_eq!(status, "COMMITTED");
    assert_eq!(accepted, 2);
    assert!(committed_at.is_some());
}

#[tokio::test]
async fn rerunning_a_committed_watermark_is_a_noop() {
    let (_dir, pool) = test_warehouse().await;

    let first = run_ingestion(&pool, vec![record(1)], "2023-04-12")
        .await
        .unwrap();
    assert_eq!(first.status, RunStatus::Committed);
    let facts_after_first = count(&pool, "fact_incident").await;
    let dates_after_first = count(&pool, "dim_date").await;

    let second = run_ingestion(&pool, vec![record(1)], "2023-04-12")
        .await
        .unwrap();
    assert_eq!(second.status, RunStatus::AlreadyProcessed);
    assert_eq!(second.records_accepted, 0);

    assert_eq!(count(&pool, "fact_incident").await, facts_after_first);
    assert_eq!(count(&pool, "dim_date").await, dates_after_first);
}

#[tokio::test]
async fn intra_batch_duplicates_keep_the_first_occurrence() {
    let (_dir, pool) = test_warehouse().await;

    let mut repeat = record(1);
    repeat.address = Some("999 Other St".to_string());

    let outcome = run_ingestion(&pool, vec![record(1), repeat], "2023-04-12")
        .await
        .unwrap();

    assert_eq!(outcome.records_accepted, 1);
    assert_eq!(outcome.records_duplicate, 1);
    assert_eq!(count(&pool, "fact_incident").await, 1);

    // First occurrence won: its address is the one in the warehouse
    let address: String = sqlx::query_scalar(
        r#"
        SELECT l.address FROM fact_incident f
        JOIN dim_location l ON l.location_id = f.location_id
        WHERE f.incident_number = 1
        "#,
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(address, "1 Main St");
}

#[tokio::test]
async fn previously_committed_keys_are_duplicates_in_later_runs() {
    let (_dir, pool) = test_warehouse().await;

    run_ingestion(&pool, vec![record(1)], "2023-04-12")
        .await
        .unwrap();

    let outcome = run_ingestion(&pool, vec![record(1), record(2)], "2023-04-13")
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Committed);
    assert_eq!(outcome.records_accepted, 1);
    assert_eq!(outcome.records_duplicate, 1);
    assert_eq!(count(&pool, "fact_incident").await, 2);
}

#[tokio::test]
async fn identical_locations_share_one_dimension_row() {
    let (_dir, pool) = test_warehouse().await;

    let outcome = run_ingestion(&pool, vec![record(1), record(2)], "2023-04-12")
        .await
        .unwrap();
    assert_eq!(outcome.records_accepted, 2);
    assert_eq!(count(&pool, "dim_location").await, 1);

    let location_ids: Vec<i64> =
        sqlx::query_scalar("SELECT DISTINCT location_id FROM fact_incident")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(location_ids.len(), 1);
}

#[tokio::test]
async fn malformed_records_are_rejected_without_failing_the_run() {
    let (_dir, pool) = test_warehouse().await;

    let keyless = RawRecord {
        call_number: Some(42),
        ..Default::default()
    };

    let outcome = run_ingestion(&pool, vec![keyless, record(1)], "2023-04-12")
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Committed);
    assert_eq!(outcome.records_accepted, 1);
    assert_eq!(outcome.records_rejected, 1);
    assert_eq!(count(&pool, "fact_incident").await, 1);
}

#[tokio::test]
async fn missing_on_scene_timestamp_still_produces_a_fact_row() {
    let (_dir, pool) = test_warehouse().await;

    let mut partial = record(1);
    partial.on_scene_dttm = None;

    run_ingestion(&pool, vec![partial], "2023-04-12")
        .await
        .unwrap();

    let (response, dispatch): (Option<i64>, Option<i64>) = sqlx::query_as(
        "SELECT response_time_sec, dispatch_delay_sec FROM fact_incident WHERE incident_number = 1",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(response, None);
    assert_eq!(dispatch, Some(120));
}

#[tokio::test]
async fn dateless_records_conform_to_the_unknown_date_row() {
    let (_dir, pool) = test_warehouse().await;

    let mut undated = record(1);
    undated.incident_date = None;
    undated.call_date = None;

    run_ingestion(&pool, vec![undated], "2023-04-12")
        .await
        .unwrap();

    let (date_id, date): (i64, Option<String>) =
        sqlx::query_as("SELECT d.date_id, d.date FROM fact_incident f JOIN dim_date d ON d.date_id = f.date_id")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(date_id, 0);
    assert_eq!(date, None);
}

#[tokio::test]
async fn monotonic_append_across_disjoint_runs() {
    let (_dir, pool) = test_warehouse().await;

    let mut total_accepted = 0;
    for (i, watermark) in ["2023-04-12", "2023-04-13", "2023-04-14"].iter().enumerate() {
        let base = (i as i64) * 100;
        let outcome = run_ingestion(&pool, vec![record(base + 1), record(base + 2)], watermark)
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Committed);
        total_accepted += outcome.records_accepted as i64;
    }

    assert_eq!(count(&pool, "fact_incident").await, total_accepted);

    let committed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ingestion_runs WHERE status = 'COMMITTED'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(committed, 3);
}

#[tokio::test]
async fn pending_watermark_rejects_a_second_run() {
    let (_dir, pool) = test_warehouse().await;

    // A run already holds the watermark's PENDING lease
    ledger::begin_run(&pool, "2023-04-12").await.unwrap();

    let result = run_ingestion(&pool, vec![record(1)], "2023-04-12").await;
    assert!(matches!(result, Err(IngestError::RunInProgress(_))));
    assert_eq!(count(&pool, "fact_incident").await, 0);
}

#[tokio::test]
async fn failed_commit_leaves_no_partial_state() {
    let (_dir, pool) = test_warehouse().await;

    let run_id = ledger::begin_run(&pool, "2023-04-12").await.unwrap();

    let staged = StagedDimensions {
        dates: vec![(20_230_412, DateValue(chrono::NaiveDate::from_ymd_opt(2023, 4, 12)))],
        locations: vec![(
            1,
            LocationValue::from_record(&record(1)),
        )],
        incident_types: vec![(
            1,
            IncidentTypeValue::from_record(&record(1)),
        )],
    };

    // Fact referencing a dimension row that was never staged: the insert
    // violates the foreign key after the dimension rows already went in.
    let mut fact = siren_ingest::fact::build(
        &record(1),
        siren_ingest::dimensions::DimensionKeys {
            date_id: 20_230_412,
            location_id: 1,
            incident_type_id: 1,
        },
    )
    .unwrap();
    fact.incident_type_id = 999;
    let facts: Vec<FactRow> = vec![fact];

    let result = writer::commit(
        &pool,
        run_id,
        &staged,
        &facts,
        RunCounts {
            accepted: 1,
            duplicate: 0,
            rejected: 0,
        },
    )
    .await;
    assert!(matches!(result, Err(IngestError::WriteFailure(_))));

    // Nothing from the run is visible: not even the dimension rows that
    // inserted cleanly before the failure
    assert_eq!(count(&pool, "dim_date").await, 0);
    assert_eq!(count(&pool, "dim_location").await, 0);
    assert_eq!(count(&pool, "dim_incident_type").await, 0);
    assert_eq!(count(&pool, "fact_incident").await, 0);

    ledger::abort_run(&pool, run_id, "write failed during commit")
        .await
        .unwrap();
    assert!(!ledger::has_processed(&pool, "2023-04-12").await.unwrap());
    let (status, _, _) = ledger_row(&pool, "2023-04-12").await;
    assert_eq!(status, "FAILED");

    // A FAILED entry does not block the retry, and the retry commits
    let outcome = run_ingestion(&pool, vec![record(1)], "2023-04-12")
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Committed);
    assert_eq!(count(&pool, "fact_incident").await, 1);
    assert!(ledger::has_processed(&pool, "2023-04-12").await.unwrap());
}

#[tokio::test]
async fn cancellation_aborts_with_full_rollback() {
    let (_dir, pool) = test_warehouse().await;

    let token = CancellationToken::new();
    token.cancel();

    let pipeline = IngestionPipeline::new(pool.clone()).with_cancellation(token);
    let outcome = pipeline.run(vec![record(1)], "2023-04-12").await.unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("cancelled"));

    assert_eq!(count(&pool, "fact_incident").await, 0);
    assert_eq!(count(&pool, "dim_location").await, 0);
    let (status, _, _) = ledger_row(&pool, "2023-04-12").await;
    assert_eq!(status, "FAILED");

    // The cancelled run released the watermark; a clean run succeeds
    let retry = run_ingestion(&pool, vec![record(1)], "2023-04-12")
        .await
        .unwrap();
    assert_eq!(retry.status, RunStatus::Committed);
}

#[tokio::test]
async fn dimension_rows_are_reused_across_runs() {
    let (_dir, pool) = test_warehouse().await;

    run_ingestion(&pool, vec![record(1)], "2023-04-12")
        .await
        .unwrap();
    run_ingestion(&pool, vec![record(2)], "2023-04-13")
        .await
        .unwrap();

    // Same normalized location and incident type in both runs: the second
    // run reused the first run's rows instead of allocating new keys
    assert_eq!(count(&pool, "dim_location").await, 1);
    assert_eq!(count(&pool, "dim_incident_type").await, 1);
    assert_eq!(count(&pool, "dim_date").await, 1);
}
