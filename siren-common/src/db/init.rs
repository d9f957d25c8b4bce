//! Warehouse initialization
//!
//! Opens (or creates) the warehouse SQLite file and ensures the star schema
//! exists: three dimension tables, the incident fact table, and the
//! ingestion run ledger. All DDL is idempotent; startup re-runs it safely.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize the warehouse connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Connection options apply to every pooled connection:
    // - foreign keys guard the fact -> dimension references
    // - WAL allows concurrent readers (dashboards) with one writer (the run)
    // - busy_timeout bounds waits on the write lock instead of SQLITE_BUSY
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new warehouse: {}", db_path.display());
    } else {
        info!("Opened existing warehouse: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all warehouse tables (idempotent)
///
/// Split out from [`init_database`] so tests can apply the schema to a pool
/// they opened themselves.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_dim_date_table(pool).await?;
    create_dim_location_table(pool).await?;
    create_dim_incident_type_table(pool).await?;
    create_fact_incident_table(pool).await?;
    create_ingestion_runs_table(pool).await?;

    Ok(())
}

/// Create the date dimension
///
/// `date_id` is the smart key YYYYMMDD; row 0 is the sentinel for records
/// whose event date could not be resolved (its attribute columns are NULL).
async fn create_dim_date_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dim_date (
            date_id INTEGER PRIMARY KEY,
            date TEXT,
            year INTEGER,
            month INTEGER,
            day INTEGER,
            weekday INTEGER,
            week_of_year INTEGER,
            is_weekend INTEGER,
            CHECK (month IS NULL OR (month >= 1 AND month <= 12)),
            CHECK (day IS NULL OR (day >= 1 AND day <= 31)),
            CHECK (weekday IS NULL OR (weekday >= 0 AND weekday <= 6)),
            CHECK (is_weekend IS NULL OR is_weekend IN (0, 1))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dim_date_date ON dim_date(date)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the location dimension
///
/// `location_key` is the hex SHA-256 of the normalized attribute tuple and
/// carries the dimension's value identity; attribute columns hold the
/// normalized values with the UNKNOWN sentinel for missing data.
async fn create_dim_location_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dim_location (
            location_id INTEGER PRIMARY KEY,
            location_key TEXT NOT NULL UNIQUE,
            address TEXT NOT NULL,
            city TEXT NOT NULL,
            zipcode TEXT NOT NULL,
            neighborhood TEXT NOT NULL,
            battalion TEXT NOT NULL,
            station_area TEXT NOT NULL,
            supervisor_district TEXT NOT NULL,
            fire_prevention_district TEXT NOT NULL,
            box TEXT NOT NULL,
            location_point TEXT NOT NULL,
            CHECK (length(location_key) = 64)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dim_location_neighborhood ON dim_location(neighborhood)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dim_location_battalion ON dim_location(battalion)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the incident type dimension
async fn create_dim_incident_type_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dim_incident_type (
            incident_type_id INTEGER PRIMARY KEY,
            call_type TEXT NOT NULL,
            call_type_group TEXT NOT NULL,
            primary_situation TEXT NOT NULL,
            final_priority INTEGER,
            UNIQUE (call_type, call_type_group, primary_situation, final_priority)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dim_incident_type_call_type ON dim_incident_type(call_type)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the incident fact table
///
/// Grain: one row per incident (natural key `incident_number`, enforced
/// UNIQUE). Rows are append-only; derived measures are NULL when the source
/// timestamps were missing or out of order.
async fn create_fact_incident_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fact_incident (
            incident_id INTEGER PRIMARY KEY AUTOINCREMENT,
            incident_number INTEGER NOT NULL UNIQUE,
            call_number INTEGER,
            date_id INTEGER NOT NULL REFERENCES dim_date(date_id),
            location_id INTEGER NOT NULL REFERENCES dim_location(location_id),
            incident_type_id INTEGER NOT NULL REFERENCES dim_incident_type(incident_type_id),
            received_ts TEXT,
            dispatch_ts TEXT,
            response_ts TEXT,
            on_scene_ts TEXT,
            close_ts TEXT,
            response_time_sec INTEGER,
            dispatch_delay_sec INTEGER,
            travel_time_sec INTEGER,
            incident_duration_sec INTEGER,
            number_of_alarms INTEGER,
            suppression_units INTEGER,
            suppression_personnel INTEGER,
            ems_units INTEGER,
            ems_personnel INTEGER,
            other_units INTEGER,
            other_personnel INTEGER,
            estimated_property_loss INTEGER,
            estimated_contents_loss INTEGER,
            als_unit INTEGER,
            final_priority INTEGER,
            ingested_at TEXT NOT NULL DEFAULT (datetime('now')),
            CHECK (response_time_sec IS NULL OR response_time_sec >= 0),
            CHECK (dispatch_delay_sec IS NULL OR dispatch_delay_sec >= 0),
            CHECK (travel_time_sec IS NULL OR travel_time_sec >= 0),
            CHECK (incident_duration_sec IS NULL OR incident_duration_sec >= 0),
            CHECK (estimated_property_loss IS NULL OR estimated_property_loss >= 0),
            CHECK (estimated_contents_loss IS NULL OR estimated_contents_loss >= 0),
            CHECK (als_unit IS NULL OR als_unit IN (0, 1))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_fact_incident_date ON fact_incident(date_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fact_incident_location ON fact_incident(location_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fact_incident_type ON fact_incident(incident_type_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the ingestion run ledger
///
/// The partial unique index allows any number of FAILED rows per watermark
/// (retries) while admitting at most one PENDING-or-COMMITTED row, which is
/// the mutual-exclusion signal between overlapping runs.
async fn create_ingestion_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_runs (
            run_id TEXT PRIMARY KEY,
            watermark TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('PENDING', 'COMMITTED', 'FAILED')),
            started_at TEXT NOT NULL DEFAULT (datetime('now')),
            committed_at TEXT,
            records_accepted INTEGER NOT NULL DEFAULT 0,
            records_duplicate INTEGER NOT NULL DEFAULT 0,
            records_rejected INTEGER NOT NULL DEFAULT 0,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_ingestion_runs_active
            ON ingestion_runs(watermark) WHERE status IN ('PENDING', 'COMMITTED')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ingestion_runs_watermark ON ingestion_runs(watermark)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
