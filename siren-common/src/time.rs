//! Timestamp and date parsing for source extracts
//!
//! Source extracts carry timestamps in several historical formats (the feed
//! switched from 12-hour US notation to ISO at some point, and some columns
//! never switched). Parsing tries each known format in order and returns
//! `None` for anything unrecognized; the caller decides whether a missing
//! timestamp is tolerable.

use chrono::{NaiveDate, NaiveDateTime};

/// Timestamp formats observed in the calls/incidents extracts, most common first.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Date formats observed in the call_date / incident_date columns.
const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d"];

/// Parse a raw timestamp string from an extract.
///
/// Returns `None` for empty, whitespace-only, or unrecognized input.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
}

/// Parse a raw date string from an extract.
///
/// Falls back to the date part of a full timestamp, since some feeds put
/// `MM/DD/YYYY HH:MM:SS AM` into date columns.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .or_else(|| parse_timestamp(trimmed).map(|ts| ts.date()))
}
