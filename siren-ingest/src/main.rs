//! siren-ingest - incident warehouse loader
//!
//! Single invocable entry point for the external scheduler: load one daily
//! CSV extract into the warehouse under a batch watermark. Safe to re-run;
//! a watermark that already committed reports ALREADY_PROCESSED and changes
//! nothing.

use anyhow::Result;
use clap::Parser;
use siren_ingest::{extract, run_ingestion, RunStatus};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "siren-ingest",
    about = "Load one daily incident extract into the siren warehouse"
)]
struct Args {
    /// Path to the CSV extract to ingest
    #[arg(long)]
    extract: PathBuf,

    /// Batch watermark; defaults to the extract file stem
    #[arg(long)]
    watermark: Option<String>,

    /// Warehouse database path (overrides SIREN_WAREHOUSE and the config file)
    #[arg(long)]
    warehouse: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = siren_common::config::load_toml_config()
        .ok()
        .and_then(|c| c.logging.level)
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    info!("Starting siren-ingest");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let watermark = match &args.watermark {
        Some(w) => w.clone(),
        None => args
            .extract
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("cannot derive a watermark from the extract path"))?,
    };

    let db_path = siren_common::config::resolve_warehouse_path(
        args.warehouse.as_deref().and_then(Path::to_str),
    );
    info!("Warehouse: {}", db_path.display());

    let pool = siren_common::db::init_database(&db_path).await?;

    let batch = extract::read_extract(&args.extract)?;
    let outcome = run_ingestion(&pool, batch, &watermark).await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.status == RunStatus::Failed {
        std::process::exit(1);
    }

    Ok(())
}
