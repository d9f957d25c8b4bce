//! Error taxonomy for the ingestion engine
//!
//! Per-record errors (`MalformedRecord`) are recovered locally and counted;
//! run-level errors (`DimensionResolution`, `WriteFailure`, `Cancelled`)
//! abort the run after full rollback. Duplicates and already-processed
//! watermarks are not errors at all and never appear here.

use thiserror::Error;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Ingestion engine errors
#[derive(Error, Debug)]
pub enum IngestError {
    /// Record lacks a usable natural key; rejected individually, run proceeds
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Surrogate key allocation produced an invalid assignment; fatal to the run
    #[error("dimension resolution failed: {0}")]
    DimensionResolution(String),

    /// Failure during the atomic commit; the run's writes were rolled back
    #[error("write failed during commit: {0}")]
    WriteFailure(String),

    /// A PENDING or COMMITTED run already exists for this watermark
    #[error("a run for watermark '{0}' is already in progress")]
    RunInProgress(String),

    /// External cancellation; treated as a mid-run failure with full rollback
    #[error("run cancelled")]
    Cancelled,

    /// Extract file could not be parsed
    #[error("extract error: {0}")]
    Extract(#[from] csv::Error),

    /// Shared infrastructure error (database, IO, configuration)
    #[error(transparent)]
    Common(#[from] siren_common::Error),
}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self {
        IngestError::Common(siren_common::Error::Database(e))
    }
}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        IngestError::Common(siren_common::Error::Io(e))
    }
}
