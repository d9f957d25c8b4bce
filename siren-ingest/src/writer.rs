//! Transactional writer
//!
//! Applies one run's staged dimension rows, fact rows, and the ledger
//! transition to COMMITTED as a single SQLite transaction. On any failure
//! the transaction is rolled back and nothing the run wrote is visible;
//! the caller then marks the ledger entry FAILED.

use crate::dimensions::StagedDimensions;
use crate::error::{IngestError, Result};
use crate::fact::FactRow;
use crate::ledger::{self, RunCounts};
use chrono::Datelike;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

/// Commit one run atomically: all staged rows and the ledger transition, or
/// nothing.
pub async fn commit(
    pool: &SqlitePool,
    run_id: Uuid,
    dims: &StagedDimensions,
    facts: &[FactRow],
    counts: RunCounts,
) -> Result<()> {
    let mut tx = pool.begin().await.map_err(write_failure)?;

    match apply(&mut tx, run_id, dims, facts, counts).await {
        Ok(()) => {
            tx.commit().await.map_err(write_failure)?;
            debug!(
                %run_id,
                dates = dims.dates.len(),
                locations = dims.locations.len(),
                incident_types = dims.incident_types.len(),
                facts = facts.len(),
                "run committed"
            );
            Ok(())
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(%run_id, error = %rollback_err, "rollback after failed commit also failed");
            }
            // Everything that breaks inside the commit sequence is a write failure
            Err(match e {
                IngestError::WriteFailure(_) => e,
                other => IngestError::WriteFailure(other.to_string()),
            })
        }
    }
}

async fn apply(
    tx: &mut Transaction<'_, Sqlite>,
    run_id: Uuid,
    dims: &StagedDimensions,
    facts: &[FactRow],
    counts: RunCounts,
) -> Result<()> {
    for (date_id, value) in &dims.dates {
        let date = value.0;
        sqlx::query(
            r#"
            INSERT INTO dim_date (date_id, date, year, month, day, weekday, week_of_year, is_weekend)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(date_id)
        .bind(date.map(|d| d.format("%Y-%m-%d").to_string()))
        .bind(date.map(|d| i64::from(d.year())))
        .bind(date.map(|d| i64::from(d.month())))
        .bind(date.map(|d| i64::from(d.day())))
        .bind(date.map(|d| i64::from(d.weekday().num_days_from_sunday())))
        .bind(date.map(|d| i64::from(d.iso_week().week())))
        .bind(date.map(|d| {
            let dow = d.weekday().num_days_from_sunday();
            dow == 0 || dow == 6
        }))
        .execute(&mut **tx)
        .await
        .map_err(write_failure)?;
    }

    for (location_id, value) in &dims.locations {
        sqlx::query(
            r#"
            INSERT INTO dim_location (
                location_id, location_key,
                address, city, zipcode, neighborhood, battalion, station_area,
                supervisor_district, fire_prevention_district, box, location_point
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(location_id)
        .bind(value.location_key())
        .bind(&value.address)
        .bind(&value.city)
        .bind(&value.zipcode)
        .bind(&value.neighborhood)
        .bind(&value.battalion)
        .bind(&value.station_area)
        .bind(&value.supervisor_district)
        .bind(&value.fire_prevention_district)
        .bind(&value.alarm_box)
        .bind(&value.location_point)
        .execute(&mut **tx)
        .await
        .map_err(write_failure)?;
    }

    for (incident_type_id, value) in &dims.incident_types {
        sqlx::query(
            r#"
            INSERT INTO dim_incident_type (
                incident_type_id, call_type, call_type_group, primary_situation, final_priority
            )
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(incident_type_id)
        .bind(&value.call_type)
        .bind(&value.call_type_group)
        .bind(&value.primary_situation)
        .bind(value.final_priority)
        .execute(&mut **tx)
        .await
        .map_err(write_failure)?;
    }

    for fact in facts {
        sqlx::query(
            r#"
            INSERT INTO fact_incident (
                incident_number, call_number,
                date_id, location_id, incident_type_id,
                received_ts, dispatch_ts, response_ts, on_scene_ts, close_ts,
                response_time_sec, dispatch_delay_sec, travel_time_sec, incident_duration_sec,
                number_of_alarms, suppression_units, suppression_personnel,
                ems_units, ems_personnel, other_units, other_personnel,
                estimated_property_loss, estimated_contents_loss,
                als_unit, final_priority
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(fact.incident_number)
        .bind(fact.call_number)
        .bind(fact.date_id)
        .bind(fact.location_id)
        .bind(fact.incident_type_id)
        .bind(fact.received_ts)
        .bind(fact.dispatch_ts)
        .bind(fact.response_ts)
        .bind(fact.on_scene_ts)
        .bind(fact.close_ts)
        .bind(fact.response_time_sec)
        .bind(fact.dispatch_delay_sec)
        .bind(fact.travel_time_sec)
        .bind(fact.incident_duration_sec)
        .bind(fact.number_of_alarms)
        .bind(fact.suppression_units)
        .bind(fact.suppression_personnel)
        .bind(fact.ems_units)
        .bind(fact.ems_personnel)
        .bind(fact.other_units)
        .bind(fact.other_personnel)
        .bind(fact.estimated_property_loss)
        .bind(fact.estimated_contents_loss)
        .bind(fact.als_unit)
        .bind(fact.final_priority)
        .execute(&mut **tx)
        .await
        .map_err(write_failure)?;
    }

    // Ledger transition rides in the same transaction as the data writes
    ledger::commit_run(tx, run_id, counts).await?;

    Ok(())
}

fn write_failure(e: sqlx::Error) -> IngestError {
    IngestError::WriteFailure(e.to_string())
}
