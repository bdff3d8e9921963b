//! SQL Server Restore Tool
//!
//! Restores the latest FULL backup and its newest applicable DIFF from object
//! storage, forcing the target database into exclusive mode when it is online.

// restoretool/src/main.rs
mod config;
mod engine;
mod errors;
mod logging;
mod restore;
mod retrieval;

use anyhow::{Context, Result};
use config::RestoreConfig;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Main entry point for the restore tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    // Config decides where logs go, so failures before that point go to stderr.
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init_tracing(config.log_file.as_deref()) {
        eprintln!("❌ Error: {:?}", e);
        return ExitCode::FAILURE;
    }

    match run_app(&config).await {
        Ok(_) => {
            info!("✅ Restore completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> Result<RestoreConfig> {
    let config_path = env::args()
        .nth(1)
        .map(|arg| PathBuf::from(arg.trim()))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    RestoreConfig::load_from_json(&config_path).with_context(|| {
        format!(
            "Failed to load restore configuration from {}",
            config_path.display()
        )
    })
}

async fn run_app(config: &RestoreConfig) -> Result<()> {
    info!(
        database = %config.database_name,
        bucket = %config.storage_bucket_id,
        backup_directory = %config.backup_directory.display(),
        poll_interval_secs = config.poll_schedule.interval().as_secs(),
        max_wait_secs = config.poll_schedule.max_wait().as_secs(),
        "🔄 Starting Restore Process..."
    );
    let report = restore::run_restore_flow(config)
        .await
        .context("Restore process failed")?;

    info!(
        run_id = %report.run_id,
        database = %report.database,
        full = %report.full_key,
        diff = report.diff_key.as_deref().unwrap_or("<none>"),
        differential_base_lsn = ?report.differential_base_lsn,
        diff_first_lsn = ?report.diff_first_lsn,
        forced_exclusive = report.forced_exclusive,
        elapsed_secs = (report.finished_at - report.started_at).num_seconds(),
        "Restore finished"
    );
    Ok(())
}
