//! Raw extract records
//!
//! A [`RawRecord`] is one row of the merged calls+incidents daily extract,
//! exactly as read from the source. Every source field is an explicit
//! `Option` so missing-data handling is visible at the type level instead of
//! buried in null checks downstream. Records are never mutated after read.
//!
//! The serde aliases mirror the column-name drift seen across feed vintages
//! (`received_dt_tm` vs `received_dttm`, the triple-o neighborhood typo, and
//! the calls/incidents naming splits).

use serde::{Deserialize, Deserializer};

/// Natural key of an incident, as supplied by the source system
pub type DedupKey = i64;

/// One incoming incident record, as read from the source extract
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    // Natural keys
    #[serde(default, deserialize_with = "lenient_i64")]
    pub call_number: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub incident_number: Option<i64>,

    // Raw timestamp strings; parsed by the fact builder
    #[serde(default, alias = "received_dt_tm")]
    pub received_dttm: Option<String>,
    #[serde(default, alias = "dispatch_dt_tm")]
    pub dispatch_dttm: Option<String>,
    #[serde(default, alias = "response_dt_tm")]
    pub response_dttm: Option<String>,
    #[serde(default, alias = "on_scene_dt_tm")]
    pub on_scene_dttm: Option<String>,
    #[serde(default, alias = "close_dt_tm")]
    pub close_dttm: Option<String>,

    // Raw date strings; resolved into the date dimension
    #[serde(default)]
    pub call_date: Option<String>,
    #[serde(default)]
    pub incident_date: Option<String>,

    // Incident type attributes
    #[serde(default)]
    pub call_type: Option<String>,
    #[serde(default)]
    pub call_type_group: Option<String>,
    #[serde(default)]
    pub primary_situation: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub final_priority: Option<i64>,

    // Location attributes
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default, alias = "zipcode_of_incident")]
    pub zipcode: Option<String>,
    #[serde(
        default,
        alias = "neighborhood_district",
        alias = "neighborhoods_analysis_boundaries",
        alias = "neighborhooods_analysis_boundaries"
    )]
    pub neighborhood: Option<String>,
    #[serde(default)]
    pub battalion: Option<String>,
    #[serde(default)]
    pub station_area: Option<String>,
    #[serde(default)]
    pub supervisor_district: Option<String>,
    #[serde(default)]
    pub fire_prevention_district: Option<String>,
    #[serde(default, rename = "box")]
    pub alarm_box: Option<String>,
    #[serde(default)]
    pub location: Option<String>,

    // Resource / severity measures
    #[serde(default, deserialize_with = "lenient_i64")]
    pub number_of_alarms: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub suppression_units: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub suppression_personnel: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub ems_units: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub ems_personnel: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub other_units: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub other_personnel: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub estimated_property_loss: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub estimated_contents_loss: Option<i64>,

    // Flags (flexible truthy strings in the source)
    #[serde(default)]
    pub als_unit: Option<String>,
}

impl RawRecord {
    /// Natural identity of the incident. Records without one cannot enter
    /// the warehouse and are rejected as malformed.
    pub fn natural_key(&self) -> Option<DedupKey> {
        self.incident_number
    }
}

/// Parse a flexible truthy string ("True", "yes", "1", ...) into a boolean.
///
/// Unrecognized or empty input is `None`, not an error.
pub fn parse_truthy(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Deserialize an optional integer from source fields that may be empty,
/// padded, or formatted as a float ("3.0").
fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_lenient_i64))
}

fn parse_lenient_i64(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|f| f as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_parsing_accepts_common_spellings() {
        assert_eq!(parse_truthy("True"), Some(true));
        assert_eq!(parse_truthy(" yes "), Some(true));
        assert_eq!(parse_truthy("1"), Some(true));
        assert_eq!(parse_truthy("False"), Some(false));
        assert_eq!(parse_truthy("N"), Some(false));
        assert_eq!(parse_truthy("0"), Some(false));
    }

    #[test]
    fn truthy_parsing_rejects_garbage() {
        assert_eq!(parse_truthy(""), None);
        assert_eq!(parse_truthy("maybe"), None);
    }

    #[test]
    fn lenient_integers_accept_floats_and_padding() {
        assert_eq!(parse_lenient_i64("42"), Some(42));
        assert_eq!(parse_lenient_i64(" 42 "), Some(42));
        assert_eq!(parse_lenient_i64("3.0"), Some(3));
        assert_eq!(parse_lenient_i64(""), None);
        assert_eq!(parse_lenient_i64("n/a"), None);
    }

    #[test]
    fn natural_key_is_the_incident_number() {
        let record = RawRecord {
            incident_number: Some(22_003_001),
            ..Default::default()
        };
        assert_eq!(record.natural_key(), Some(22_003_001));
        assert_eq!(RawRecord::default().natural_key(), None);
    }
}
