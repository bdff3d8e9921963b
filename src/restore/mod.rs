pub(crate) mod chain;
pub(crate) mod evictor;
pub(crate) mod exclusive;
pub(crate) mod poller;
pub(crate) mod sequencer;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::RestoreConfig;
use crate::engine::DatabaseHandle;
use crate::engine::sqlcmd::SqlcmdEngine;
use crate::retrieval::s3_download::S3BackupSource;

pub use sequencer::{RestoreReport, RestoreSequencer, RestoreState};

/// Public entry point for the restore process: wires the sqlcmd engine and
/// the S3 backup source into a sequencer and runs it once.
pub async fn run_restore_flow(config: &RestoreConfig) -> Result<RestoreReport> {
    let engine = SqlcmdEngine::connect(&config.engine_connection_string)
        .context("Failed to prepare the engine command interface")?;
    let source = S3BackupSource::from_config(config).await;

    let db = DatabaseHandle::new(config.database_name.clone(), Arc::new(engine));
    let sequencer = RestoreSequencer::new(db, Arc::new(source), config.sequencer_settings());

    let report = sequencer.run().await?;
    Ok(report)
}
