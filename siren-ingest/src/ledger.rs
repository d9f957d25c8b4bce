//! Run ledger
//!
//! Durable record of which batch watermarks have been committed, stored in
//! the same SQLite file as the warehouse so the COMMITTED transition can
//! share the data transaction. A PENDING row is the mutual-exclusion signal
//! between overlapping runs for one watermark; FAILED rows keep the error
//! for operators and never block a retry.

use crate::error::{IngestError, Result};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

/// Per-run record counts, persisted on the ledger row at commit
#[derive(Debug, Clone, Copy, Default)]
pub struct RunCounts {
    pub accepted: usize,
    pub duplicate: usize,
    pub rejected: usize,
}

/// Has this watermark already been committed?
///
/// The orchestrator consults this before doing any work, which makes
/// re-invocation with the same batch a no-op.
pub async fn has_processed(pool: &SqlitePool, watermark: &str) -> Result<bool> {
    let committed: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM ingestion_runs WHERE watermark = ? AND status = 'COMMITTED')",
    )
    .bind(watermark)
    .fetch_one(pool)
    .await?;

    Ok(committed)
}

/// Open a PENDING ledger entry for this watermark and return the run id.
///
/// The partial unique index on active rows rejects a second PENDING (or a
/// racing COMMITTED) for the same watermark; that surfaces here as
/// [`IngestError::RunInProgress`].
pub async fn begin_run(pool: &SqlitePool, watermark: &str) -> Result<Uuid> {
    let run_id = Uuid::new_v4();

    let inserted = sqlx::query(
        "INSERT INTO ingestion_runs (run_id, watermark, status) VALUES (?, ?, 'PENDING')",
    )
    .bind(run_id.to_string())
    .bind(watermark)
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => Ok(run_id),
        Err(e) if is_unique_violation(&e) => Err(IngestError::RunInProgress(watermark.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Transition PENDING -> COMMITTED inside the writer's transaction.
///
/// The transition is part of the same atomic unit as the data inserts;
/// finding the row in any other state means the run lost its lease.
pub async fn commit_run(
    tx: &mut Transaction<'_, Sqlite>,
    run_id: Uuid,
    counts: RunCounts,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE ingestion_runs
        SET status = 'COMMITTED',
            committed_at = datetime('now'),
            records_accepted = ?,
            records_duplicate = ?,
            records_rejected = ?
        WHERE run_id = ? AND status = 'PENDING'
        "#,
    )
    .bind(counts.accepted as i64)
    .bind(counts.duplicate as i64)
    .bind(counts.rejected as i64)
    .bind(run_id.to_string())
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() != 1 {
        return Err(IngestError::WriteFailure(format!(
            "ledger entry for run {} was not PENDING at commit",
            run_id
        )));
    }

    Ok(())
}

/// Transition PENDING -> FAILED after the run's writes were rolled back.
pub async fn abort_run(pool: &SqlitePool, run_id: Uuid, error: &str) -> Result<()> {
    let result = sqlx::query(
        "UPDATE ingestion_runs SET status = 'FAILED', error = ? WHERE run_id = ? AND status = 'PENDING'",
    )
    .bind(error)
    .bind(run_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        info!(%run_id, "run marked FAILED in ledger");
    } else {
        warn!(%run_id, "abort found no PENDING ledger entry to mark FAILED");
    }

    Ok(())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
