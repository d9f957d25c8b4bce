//! Extract file reading
//!
//! Thin adapter between one already-delivered CSV extract and the in-memory
//! batch the pipeline consumes. File acquisition and scheduling belong to
//! external collaborators; this module only parses what is handed to it.
//!
//! Source headers arrive in feed spelling ("Received DtTm", "Zipcode of
//! Incident") and are sanitized to snake_case before deserialization so the
//! same reader handles raw and pre-cleaned extracts.

use crate::error::Result;
use crate::record::RawRecord;
use std::path::Path;
use tracing::{debug, info};

/// Read one CSV extract into a batch of raw records.
pub fn read_extract(path: &Path) -> Result<Vec<RawRecord>> {
    let file = std::fs::File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(file);

    let headers = reader.headers()?.clone();
    let sanitized: csv::StringRecord = headers.iter().map(sanitize_header).collect();
    debug!(?sanitized, "extract headers sanitized");
    reader.set_headers(sanitized);

    let mut records = Vec::new();
    for row in reader.deserialize() {
        let record: RawRecord = row?;
        records.push(record);
    }

    info!(
        path = %path.display(),
        records = records.len(),
        "extract loaded"
    );
    Ok(records)
}

/// Lowercase, trim, spaces and dashes to underscores, dots stripped
fn sanitize_header(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
        .replace('.', "")
}
