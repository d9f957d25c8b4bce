//! Dimension conformance
//!
//! Resolves normalized dimension values (date, location, incident type) to
//! stable surrogate keys. Each dimension keeps an in-memory cache pre-seeded
//! from the warehouse; unseen values get a freshly allocated key and a staged
//! row that the transactional writer persists at commit. Nothing touches the
//! warehouse tables until then, so a rolled-back run leaves no orphaned
//! dimension rows.
//!
//! Dimensions are type-0: the first attribute tuple seen for a value wins
//! and is never updated.

use crate::error::{IngestError, Result};
use crate::record::RawRecord;
use chrono::{Datelike, NaiveDate};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use tracing::debug;

/// Sentinel for missing or blank dimension attributes
pub const UNKNOWN: &str = "UNKNOWN";

/// Surrogate key of the sentinel date row
pub const UNKNOWN_DATE_ID: i64 = 0;

/// Normalize a raw string attribute: trim, blank/missing becomes the sentinel
fn norm(raw: Option<&str>) -> String {
    match raw {
        Some(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => UNKNOWN.to_string(),
    }
}

/// The event date of an incident, or the explicit unknown value
///
/// Identity is the date itself; the smart key YYYYMMDD doubles as the
/// surrogate key (0 for unknown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateValue(pub Option<NaiveDate>);

impl DateValue {
    /// Resolve the event date: incident date, falling back to call date
    pub fn from_record(record: &RawRecord) -> Self {
        let date = record
            .incident_date
            .as_deref()
            .and_then(siren_common::time::parse_date)
            .or_else(|| {
                record
                    .call_date
                    .as_deref()
                    .and_then(siren_common::time::parse_date)
            });
        DateValue(date)
    }

    /// Smart key YYYYMMDD, or [`UNKNOWN_DATE_ID`]
    pub fn surrogate_key(&self) -> i64 {
        match self.0 {
            Some(d) => i64::from(d.year()) * 10_000 + i64::from(d.month()) * 100 + i64::from(d.day()),
            None => UNKNOWN_DATE_ID,
        }
    }
}

/// Normalized location attribute tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationValue {
    pub address: String,
    pub city: String,
    pub zipcode: String,
    pub neighborhood: String,
    pub battalion: String,
    pub station_area: String,
    pub supervisor_district: String,
    pub fire_prevention_district: String,
    pub alarm_box: String,
    pub location_point: String,
}

impl LocationValue {
    pub fn from_record(record: &RawRecord) -> Self {
        LocationValue {
            address: norm(record.address.as_deref()),
            city: norm(record.city.as_deref()),
            zipcode: norm(record.zipcode.as_deref()),
            neighborhood: norm(record.neighborhood.as_deref()),
            battalion: norm(record.battalion.as_deref()),
            station_area: norm(record.station_area.as_deref()),
            supervisor_district: norm(record.supervisor_district.as_deref()),
            fire_prevention_district: norm(record.fire_prevention_district.as_deref()),
            alarm_box: norm(record.alarm_box.as_deref()),
            location_point: norm(record.location.as_deref()),
        }
    }

    /// Stable hash of the attribute tuple, stored alongside the surrogate key
    /// so fact-to-dimension joins survive attribute-order refactors
    pub fn location_key(&self) -> String {
        let joined = [
            &self.address,
            &self.city,
            &self.zipcode,
            &self.neighborhood,
            &self.battalion,
            &self.station_area,
            &self.supervisor_district,
            &self.fire_prevention_district,
            &self.alarm_box,
            &self.location_point,
        ]
        .map(String::as_str)
        .join("|");

        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Normalized incident type attribute tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IncidentTypeValue {
    pub call_type: String,
    pub call_type_group: String,
    pub primary_situation: String,
    pub final_priority: Option<i64>,
}

impl IncidentTypeValue {
    pub fn from_record(record: &RawRecord) -> Self {
        IncidentTypeValue {
            call_type: norm(record.call_type.as_deref()),
            call_type_group: norm(record.call_type_group.as_deref()),
            primary_situation: norm(record.primary_situation.as_deref()),
            final_priority: record.final_priority,
        }
    }
}

/// How a dimension allocates surrogate keys for unseen values
pub enum KeyAllocator<V> {
    /// Key derived from the value itself (date smart key)
    Derived(fn(&V) -> i64),
    /// Warehouse-sequential, seeded from the current maximum id
    Sequential { next: i64 },
}

/// In-memory surrogate-key cache for one dimension
///
/// Pre-seeded from existing warehouse rows; newly allocated keys are cached
/// immediately, so byte-identical values later in the same batch resolve to
/// the same key whether it pre-existed or was allocated moments earlier.
pub struct DimensionCache<V> {
    keys: HashMap<V, i64>,
    used_ids: HashSet<i64>,
    staged: Vec<(i64, V)>,
    alloc: KeyAllocator<V>,
}

impl<V: Clone + Eq + Hash> DimensionCache<V> {
    pub fn preseeded(existing: HashMap<V, i64>, alloc: KeyAllocator<V>) -> Self {
        let used_ids = existing.values().copied().collect();
        DimensionCache {
            keys: existing,
            used_ids,
            staged: Vec::new(),
            alloc,
        }
    }

    /// Resolve a value to its surrogate key, staging a new row on first
    /// encounter.
    pub fn resolve(&mut self, value: V) -> Result<i64> {
        if let Some(&key) = self.keys.get(&value) {
            return Ok(key);
        }

        let key = match &mut self.alloc {
            KeyAllocator::Derived(derive) => derive(&value),
            KeyAllocator::Sequential { next } => {
                let key = *next;
                *next += 1;
                key
            }
        };

        // A fresh key landing on an already-assigned id means the seed or the
        // allocator is corrupt; continuing would cross-wire fact rows.
        if !self.used_ids.insert(key) {
            return Err(IngestError::DimensionResolution(format!(
                "surrogate key {} allocated for a new value is already assigned",
                key
            )));
        }

        self.keys.insert(value.clone(), key);
        self.staged.push((key, value));
        Ok(key)
    }

    /// Rows allocated by this run, in allocation order
    pub fn staged(&self) -> &[(i64, V)] {
        &self.staged
    }
}

/// Surrogate keys for one record's three dimensions
#[derive(Debug, Clone, Copy)]
pub struct DimensionKeys {
    pub date_id: i64,
    pub location_id: i64,
    pub incident_type_id: i64,
}

/// Dimension rows staged by a run, handed to the transactional writer
pub struct StagedDimensions {
    pub dates: Vec<(i64, DateValue)>,
    pub locations: Vec<(i64, LocationValue)>,
    pub incident_types: Vec<(i64, IncidentTypeValue)>,
}

/// Conformance engine for one run: the three dimension caches
pub struct DimensionConformer {
    dates: DimensionCache<DateValue>,
    locations: DimensionCache<LocationValue>,
    incident_types: DimensionCache<IncidentTypeValue>,
}

impl DimensionConformer {
    /// Seed all three caches from the warehouse's existing dimension rows
    pub async fn seed(pool: &SqlitePool) -> Result<Self> {
        let dates = seed_dates(pool).await?;
        let locations = seed_locations(pool).await?;
        let incident_types = seed_incident_types(pool).await?;

        debug!(
            dates = dates.keys.len(),
            locations = locations.keys.len(),
            incident_types = incident_types.keys.len(),
            "dimension caches seeded"
        );

        Ok(DimensionConformer {
            dates,
            locations,
            incident_types,
        })
    }

    /// Resolve all three dimension keys for one record
    pub fn resolve(&mut self, record: &RawRecord) -> Result<DimensionKeys> {
        let date_id = self.dates.resolve(DateValue::from_record(record))?;
        let location_id = self.locations.resolve(LocationValue::from_record(record))?;
        let incident_type_id = self
            .incident_types
            .resolve(IncidentTypeValue::from_record(record))?;

        Ok(DimensionKeys {
            date_id,
            location_id,
            incident_type_id,
        })
    }

    /// Hand the staged rows over for the atomic commit
    pub fn into_staged(self) -> StagedDimensions {
        StagedDimensions {
            dates: self.dates.staged,
            locations: self.locations.staged,
            incident_types: self.incident_types.staged,
        }
    }
}

async fn seed_dates(pool: &SqlitePool) -> Result<DimensionCache<DateValue>> {
    let rows = sqlx::query_as::<_, (i64, Option<String>)>("SELECT date_id, date FROM dim_date")
        .fetch_all(pool)
        .await?;

    let mut existing = HashMap::new();
    for (date_id, date) in rows {
        let value = DateValue(date.as_deref().and_then(siren_common::time::parse_date));
        existing.insert(value, date_id);
    }

    Ok(DimensionCache::preseeded(
        existing,
        KeyAllocator::Derived(|v: &DateValue| v.surrogate_key()),
    ))
}

async fn seed_locations(pool: &SqlitePool) -> Result<DimensionCache<LocationValue>> {
    type Row = (
        i64,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    );

    let rows = sqlx::query_as::<_, Row>(
        r#"
        SELECT location_id, address, city, zipcode, neighborhood, battalion,
               station_area, supervisor_district, fire_prevention_district,
               box, location_point
        FROM dim_location
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut existing = HashMap::new();
    let mut max_id = 0;
    for row in rows {
        let (
            location_id,
            address,
            city,
            zipcode,
            neighborhood,
            battalion,
            station_area,
            supervisor_district,
            fire_prevention_district,
            alarm_box,
            location_point,
        ) = row;
        max_id = max_id.max(location_id);
        existing.insert(
            LocationValue {
                address,
                city,
                zipcode,
                neighborhood,
                battalion,
                station_area,
                supervisor_district,
                fire_prevention_district,
                alarm_box,
                location_point,
            },
            location_id,
        );
    }

    Ok(DimensionCache::preseeded(
        existing,
        KeyAllocator::Sequential { next: max_id + 1 },
    ))
}

async fn seed_incident_types(pool: &SqlitePool) -> Result<DimensionCache<IncidentTypeValue>> {
    let rows = sqlx::query_as::<_, (i64, String, String, String, Option<i64>)>(
        r#"
        SELECT incident_type_id, call_type, call_type_group, primary_situation, final_priority
        FROM dim_incident_type
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut existing = HashMap::new();
    let mut max_id = 0;
    for (incident_type_id, call_type, call_type_group, primary_situation, final_priority) in rows {
        max_id = max_id.max(incident_type_id);
        existing.insert(
            IncidentTypeValue {
                call_type,
                call_type_group,
                primary_situation,
                final_priority,
            },
            incident_type_id,
        );
    }

    Ok(DimensionCache::preseeded(
        existing,
        KeyAllocator::Sequential { next: max_id + 1 },
    ))
}
