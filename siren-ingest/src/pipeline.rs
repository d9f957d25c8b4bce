//! Pipeline orchestrator
//!
//! Owns the run lifecycle: already-processed short-circuit, ledger lease,
//! the dedup -> conform -> build -> commit stage sequence, and failure
//! handling. Every stage is side-effect-free until the writer commits, so
//! a failure at any point rolls the warehouse back to its pre-run state
//! before the run reports FAILED.

use crate::dedup::{self, DedupOutcome};
use crate::dimensions::DimensionConformer;
use crate::error::{IngestError, Result};
use crate::fact::{self, FactRow};
use crate::ledger::{self, RunCounts};
use crate::record::{DedupKey, RawRecord};
use crate::writer;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Terminal status of one ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Committed,
    Failed,
    AlreadyProcessed,
}

/// What one invocation did, reported to the caller
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub watermark: String,
    pub run_id: Option<Uuid>,
    pub records_accepted: usize,
    pub records_duplicate: usize,
    pub records_rejected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Stage the run was in when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStage {
    NotStarted,
    Deduped,
    Conformed,
    Built,
}

impl RunStage {
    fn name(self) -> &'static str {
        match self {
            RunStage::NotStarted => "NOT_STARTED",
            RunStage::Deduped => "DEDUPED",
            RunStage::Conformed => "CONFORMED",
            RunStage::Built => "BUILT",
        }
    }

    fn fail(self) -> impl FnOnce(IngestError) -> StageFailure {
        move |error| StageFailure { stage: self, error }
    }
}

struct StageFailure {
    stage: RunStage,
    error: IngestError,
}

/// One-run-at-a-time ingestion pipeline over a warehouse pool
pub struct IngestionPipeline {
    pool: SqlitePool,
    cancel: CancellationToken,
}

impl IngestionPipeline {
    pub fn new(pool: SqlitePool) -> Self {
        IngestionPipeline {
            pool,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach an external cancellation signal; cancelling mid-run aborts the
    /// run exactly like a failure (full rollback, FAILED ledger entry).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute one ingestion run for `batch` under `watermark`.
    ///
    /// Returns `Err(RunInProgress)` when another run holds the watermark's
    /// PENDING lease; every other failure after the lease is taken comes
    /// back as a FAILED outcome with rollback already performed.
    pub async fn run(&self, batch: Vec<RawRecord>, watermark: &str) -> Result<RunOutcome> {
        if ledger::has_processed(&self.pool, watermark).await? {
            info!(watermark, "watermark already committed; nothing to do");
            return Ok(RunOutcome {
                status: RunStatus::AlreadyProcessed,
                watermark: watermark.to_string(),
                run_id: None,
                records_accepted: 0,
                records_duplicate: 0,
                records_rejected: 0,
                error: None,
            });
        }

        let run_id = ledger::begin_run(&self.pool, watermark).await?;
        info!(%run_id, watermark, records = batch.len(), "ingestion run started");

        match self.execute(run_id, batch).await {
            Ok(counts) => {
                info!(
                    %run_id,
                    accepted = counts.accepted,
                    duplicate = counts.duplicate,
                    rejected = counts.rejected,
                    "ingestion run committed"
                );
                Ok(RunOutcome {
                    status: RunStatus::Committed,
                    watermark: watermark.to_string(),
                    run_id: Some(run_id),
                    records_accepted: counts.accepted,
                    records_duplicate: counts.duplicate,
                    records_rejected: counts.rejected,
                    error: None,
                })
            }
            Err(failure) => {
                let message = format!("{} (stage {})", failure.error, failure.stage.name());
                error!(
                    %run_id,
                    stage = failure.stage.name(),
                    error = %failure.error,
                    "ingestion run failed; warehouse rolled back"
                );
                ledger::abort_run(&self.pool, run_id, &message).await?;
                Ok(RunOutcome {
                    status: RunStatus::Failed,
                    watermark: watermark.to_string(),
                    run_id: Some(run_id),
                    records_accepted: 0,
                    records_duplicate: 0,
                    records_rejected: 0,
                    error: Some(message),
                })
            }
        }
    }

    async fn execute(
        &self,
        run_id: Uuid,
        batch: Vec<RawRecord>,
    ) -> std::result::Result<RunCounts, StageFailure> {
        let mut stage = RunStage::NotStarted;

        let existing = self
            .existing_keys()
            .await
            .map_err(stage.fail())?;

        // Records with no extractable natural key cannot be deduplicated or
        // stored; reject them up front, the run proceeds without them.
        let mut rejected = 0usize;
        let mut keyed = Vec::with_capacity(batch.len());
        for record in batch {
            if record.natural_key().is_some() {
                keyed.push(record);
            } else {
                warn!("rejecting record without an incident number");
                rejected += 1;
            }
        }

        let DedupOutcome { new, duplicates } = dedup::dedupe(keyed, &existing);
        stage = RunStage::Deduped;
        self.checkpoint().map_err(stage.fail())?;
        info!(
            new = new.len(),
            duplicates = duplicates.len(),
            rejected,
            "batch deduplicated"
        );

        let mut conformer = DimensionConformer::seed(&self.pool)
            .await
            .map_err(stage.fail())?;
        let mut resolved = Vec::with_capacity(new.len());
        for record in &new {
            resolved.push(conformer.resolve(record).map_err(stage.fail())?);
        }
        stage = RunStage::Conformed;
        self.checkpoint().map_err(stage.fail())?;

        let mut facts: Vec<FactRow> = Vec::with_capacity(new.len());
        for (record, keys) in new.iter().zip(resolved) {
            match fact::build(record, keys) {
                Ok(row) => facts.push(row),
                Err(IngestError::MalformedRecord(reason)) => {
                    warn!(reason = %reason, "rejecting malformed record");
                    rejected += 1;
                }
                Err(other) => return Err(stage.fail()(other)),
            }
        }
        stage = RunStage::Built;
        self.checkpoint().map_err(stage.fail())?;

        let counts = RunCounts {
            accepted: facts.len(),
            duplicate: duplicates.len(),
            rejected,
        };
        let staged = conformer.into_staged();
        writer::commit(&self.pool, run_id, &staged, &facts, counts)
            .await
            .map_err(stage.fail())?;

        Ok(counts)
    }

    /// Snapshot of committed natural keys, taken at run start
    async fn existing_keys(&self) -> Result<HashSet<DedupKey>> {
        let keys = sqlx::query_scalar::<_, i64>("SELECT incident_number FROM fact_incident")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys.into_iter().collect())
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(IngestError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Ingest one batch under the given watermark.
///
/// The single entry point an external scheduler invokes once per cycle.
pub async fn run_ingestion(
    pool: &SqlitePool,
    batch: Vec<RawRecord>,
    watermark: &str,
) -> Result<RunOutcome> {
    IngestionPipeline::new(pool.clone())
        .run(batch, watermark)
        .await
}
