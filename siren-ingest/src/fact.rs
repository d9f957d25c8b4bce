//! Fact row construction
//!
//! Parses raw timestamps, computes the derived response measures, and
//! assembles one append-only fact row per accepted record. Missing or
//! out-of-order timestamps null the affected measure; the record is still
//! accepted. Only a missing natural key rejects a record.

use crate::dimensions::DimensionKeys;
use crate::error::{IngestError, Result};
use crate::record::{parse_truthy, RawRecord};
use chrono::NaiveDateTime;
use siren_common::time;

/// One conformed incident fact row, ready for the transactional writer
///
/// `incident_id` is assigned by the warehouse at insert; everything else is
/// immutable once committed.
#[derive(Debug, Clone)]
pub struct FactRow {
    pub incident_number: i64,
    pub call_number: Option<i64>,

    pub date_id: i64,
    pub location_id: i64,
    pub incident_type_id: i64,

    pub received_ts: Option<NaiveDateTime>,
    pub dispatch_ts: Option<NaiveDateTime>,
    pub response_ts: Option<NaiveDateTime>,
    pub on_scene_ts: Option<NaiveDateTime>,
    pub close_ts: Option<NaiveDateTime>,

    pub response_time_sec: Option<i64>,
    pub dispatch_delay_sec: Option<i64>,
    pub travel_time_sec: Option<i64>,
    pub incident_duration_sec: Option<i64>,

    pub number_of_alarms: Option<i64>,
    pub suppression_units: Option<i64>,
    pub suppression_personnel: Option<i64>,
    pub ems_units: Option<i64>,
    pub ems_personnel: Option<i64>,
    pub other_units: Option<i64>,
    pub other_personnel: Option<i64>,
    pub estimated_property_loss: Option<i64>,
    pub estimated_contents_loss: Option<i64>,

    pub als_unit: Option<bool>,
    pub final_priority: Option<i64>,
}

/// Build a fact row from a record and its resolved dimension keys.
///
/// Fails only when the natural key is missing.
pub fn build(record: &RawRecord, keys: DimensionKeys) -> Result<FactRow> {
    let incident_number = record
        .natural_key()
        .ok_or_else(|| IngestError::MalformedRecord("missing incident number".to_string()))?;

    let received_ts = parse(&record.received_dttm);
    let dispatch_ts = parse(&record.dispatch_dttm);
    let response_ts = parse(&record.response_dttm);
    let on_scene_ts = parse(&record.on_scene_dttm);
    let close_ts = parse(&record.close_dttm);

    Ok(FactRow {
        incident_number,
        call_number: record.call_number,

        date_id: keys.date_id,
        location_id: keys.location_id,
        incident_type_id: keys.incident_type_id,

        response_time_sec: elapsed_seconds(received_ts, on_scene_ts),
        dispatch_delay_sec: elapsed_seconds(received_ts, dispatch_ts),
        travel_time_sec: elapsed_seconds(dispatch_ts, on_scene_ts),
        incident_duration_sec: elapsed_seconds(received_ts, close_ts),

        received_ts,
        dispatch_ts,
        response_ts,
        on_scene_ts,
        close_ts,

        number_of_alarms: record.number_of_alarms,
        suppression_units: record.suppression_units,
        suppression_personnel: record.suppression_personnel,
        ems_units: record.ems_units,
        ems_personnel: record.ems_personnel,
        other_units: record.other_units,
        other_personnel: record.other_personnel,
        estimated_property_loss: non_negative(record.estimated_property_loss),
        estimated_contents_loss: non_negative(record.estimated_contents_loss),

        als_unit: record.als_unit.as_deref().and_then(parse_truthy),
        final_priority: record.final_priority,
    })
}

fn parse(raw: &Option<String>) -> Option<NaiveDateTime> {
    raw.as_deref().and_then(time::parse_timestamp)
}

/// Whole seconds from `start` to `end`; None when either side is missing or
/// the interval is negative (out-of-order source timestamps)
fn elapsed_seconds(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Option<i64> {
    let seconds = (end? - start?).num_seconds();
    (seconds >= 0).then_some(seconds)
}

/// Loss estimates below zero are source noise, not refunds
fn non_negative(value: Option<i64>) -> Option<i64> {
    value.filter(|&v| v >= 0)
}
