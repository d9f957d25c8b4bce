//! Natural-key deduplication
//!
//! Partitions a batch into genuinely-new records and duplicates, against a
//! snapshot of the natural keys already committed to the fact table. The
//! snapshot is passed in explicitly at run start; there is no ambient
//! already-seen state. The warehouse is append-only, so a key collision is
//! always a discard, never an update.

use crate::record::{DedupKey, RawRecord};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Result of deduplicating one batch
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Records new to the warehouse, in arrival order
    pub new: Vec<RawRecord>,
    /// Intra-batch repeats and records already committed in earlier runs
    pub duplicates: Vec<RawRecord>,
}

/// Partition `batch` into new records and duplicates.
///
/// The first occurrence of a key (by arrival order) is kept; later
/// occurrences and keys present in `existing` are duplicates. Duplicates
/// are not an error. Callers must have rejected key-less records already.
pub fn dedupe(batch: Vec<RawRecord>, existing: &HashSet<DedupKey>) -> DedupOutcome {
    let mut seen: HashSet<DedupKey> = HashSet::new();
    let mut outcome = DedupOutcome::default();

    for record in batch {
        let Some(key) = record.natural_key() else {
            // Malformed records are filtered before this stage
            warn!("record without a natural key reached deduplication; skipping");
            continue;
        };

        if existing.contains(&key) {
            debug!(incident_number = key, "duplicate of committed fact row");
            outcome.duplicates.push(record);
        } else if !seen.insert(key) {
            debug!(incident_number = key, "intra-batch duplicate");
            outcome.duplicates.push(record);
        } else {
            outcome.new.push(record);
        }
    }

    outcome
}
