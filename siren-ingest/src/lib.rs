//! # Siren Ingest
//!
//! Incremental ingestion and conformance engine for the siren incident
//! warehouse. Consumes one daily batch of raw emergency-response records,
//! deduplicates against warehouse state, conforms dimension values to
//! surrogate keys, derives response-time measures, and commits everything
//! (data plus run ledger) as one atomic unit. Re-running a committed batch
//! is a no-op; a failed run leaves the warehouse untouched.

pub mod dedup;
pub mod dimensions;
pub mod error;
pub mod extract;
pub mod fact;
pub mod ledger;
pub mod pipeline;
pub mod record;
pub mod writer;

pub use error::{IngestError, Result};
pub use pipeline::{run_ingestion, IngestionPipeline, RunOutcome, RunStatus};
pub use record::RawRecord;
