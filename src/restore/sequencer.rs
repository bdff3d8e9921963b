// restoretool/src/restore/sequencer.rs
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::chain::{BackupChain, resolve_chain};
use super::evictor::evict_all;
use super::exclusive::{ExclusiveModeSettings, force_exclusive_mode};
use super::poller::{PollSchedule, wait_for_state};
use crate::engine::{DatabaseHandle, DatabaseState, Lsn};
use crate::errors::{RestoreError, RunFailure};
use crate::retrieval::BackupSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    Inspecting,
    ResolvingChain,
    ForcingExclusive,
    ApplyingFull,
    ApplyingDiff,
    Recovering,
    Done,
    Failed,
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreState::Inspecting => "INSPECTING",
            RestoreState::ResolvingChain => "RESOLVING_CHAIN",
            RestoreState::ForcingExclusive => "FORCING_EXCLUSIVE",
            RestoreState::ApplyingFull => "APPLYING_FULL",
            RestoreState::ApplyingDiff => "APPLYING_DIFF",
            RestoreState::Recovering => "RECOVERING",
            RestoreState::Done => "DONE",
            RestoreState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SequencerSettings {
    pub storage_bucket_id: String,
    pub poll: PollSchedule,
    pub exclusive: ExclusiveModeSettings,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub run_id: Uuid,
    pub database: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub full_key: String,
    pub diff_key: Option<String>,
    pub differential_base_lsn: Option<Lsn>,
    pub diff_first_lsn: Option<Lsn>,
    pub forced_exclusive: bool,
}

/// Drives one restore run from inspection to recovery.
///
/// Steps run strictly in order and each state change is confirmed by polling
/// before the next command is issued. On failure the run stops where it is;
/// a half-restored database is left for an operator and never force-recovered.
pub struct RestoreSequencer {
    db: DatabaseHandle,
    source: Arc<dyn BackupSource>,
    settings: SequencerSettings,
    state: RestoreState,
}

impl RestoreSequencer {
    pub fn new(db: DatabaseHandle, source: Arc<dyn BackupSource>, settings: SequencerSettings) -> Self {
        Self {
            db,
            source,
            settings,
            state: RestoreState::Inspecting,
        }
    }

    pub async fn run(mut self) -> Result<RestoreReport, RunFailure> {
        let run_id = Uuid::new_v4();
        let span = info_span!("restore_run", run_id = %run_id, database = %self.db.name());

        async move {
            let started_at = Utc::now();
            info!(state = %self.state, "Starting the database restoration process");

            match self.drive().await {
                Ok((chain, forced_exclusive)) => {
                    self.transition(RestoreState::Done);
                    let report = RestoreReport {
                        run_id,
                        database: self.db.name().to_string(),
                        started_at,
                        finished_at: Utc::now(),
                        full_key: chain.full().key().to_string(),
                        diff_key: chain.diff().map(|d| d.key().to_string()),
                        differential_base_lsn: chain
                            .full()
                            .lsn()
                            .and_then(|meta| meta.differential_base_lsn),
                        diff_first_lsn: chain.diff().and_then(|d| d.lsn()).map(|meta| meta.first_lsn),
                        forced_exclusive,
                    };
                    info!(
                        state = %self.state,
                        full = %report.full_key,
                        diff = report.diff_key.as_deref().unwrap_or("<none>"),
                        elapsed_secs = (report.finished_at - started_at).num_seconds(),
                        "Database restoration completed successfully"
                    );
                    Ok(report)
                }
                Err(source) => {
                    let failed_in = self.state;
                    self.state = RestoreState::Failed;
                    error!(
                        state = %self.state,
                        failed_in = %failed_in,
                        category = %source.category(),
                        error = %source,
                        "Restore aborted. Database left as the last successful step produced it"
                    );
                    Err(RunFailure {
                        state: failed_in,
                        source,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    fn transition(&mut self, next: RestoreState) {
        info!(from = %self.state, state = %next, "State transition");
        self.state = next;
    }

    async fn drive(&mut self) -> Result<(BackupChain, bool), RestoreError> {
        let db = self.db.clone();
        let database = db.name();

        let current = db.state().await?;
        info!(state = %self.state, observed = %current, "Checked database state");
        let needs_exclusive = match current {
            DatabaseState::Online => {
                warn!(state = %self.state, "Database is ONLINE. Restore will force it into exclusive mode");
                true
            }
            DatabaseState::Restoring | DatabaseState::SingleUser => false,
            other => {
                return Err(RestoreError::UnexpectedState {
                    database: database.to_string(),
                    state: other,
                });
            }
        };

        // Chain resolution only reads metadata; it runs before any mutation.
        self.transition(RestoreState::ResolvingChain);
        let fetched = self
            .source
            .fetch_latest_backups(&self.settings.storage_bucket_id)
            .await
            .map_err(RestoreError::Retrieval)?;
        let chain = resolve_chain(db.engine(), fetched.full, fetched.diffs)
            .await?
            .into_chain()
            .map_err(RestoreError::ChainResolution)?;

        let mut full_applied = false;
        if needs_exclusive {
            self.transition(RestoreState::ForcingExclusive);
            force_exclusive_mode(&db, chain.full().local_path(), &self.settings.exclusive).await?;
            full_applied = true;
        }

        self.transition(RestoreState::ApplyingFull);
        if full_applied {
            info!(state = %self.state, "FULL backup already applied while forcing exclusive mode");
        } else {
            // A session holding the single-user slot makes RESTORE fail.
            if current == DatabaseState::SingleUser {
                warn!(state = %self.state, "Database is in SINGLE_USER mode. Terminating sessions before the FULL restore");
                evict_all(&db).await?;
                sleep(self.settings.exclusive.eviction_settle).await;
            }
            info!(
                state = %self.state,
                archive = %chain.full().archive_path().display(),
                path = %chain.full().local_path().display(),
                "Executing FULL restore"
            );
            db.engine().restore_full(database, chain.full().local_path()).await?;
            self.confirm(DatabaseState::Restoring).await?;
        }

        if let Some(diff) = chain.diff() {
            self.transition(RestoreState::ApplyingDiff);
            info!(
                state = %self.state,
                archive = %diff.archive_path().display(),
                path = %diff.local_path().display(),
                "Executing DIFF restore"
            );
            db.engine()
                .restore_diff(database, diff.local_path())
                .await?;
            self.confirm(DatabaseState::Restoring).await?;
        }

        self.transition(RestoreState::Recovering);
        info!(state = %self.state, "Finalizing database recovery");
        db.engine().recover(database).await?;
        self.confirm(DatabaseState::Online).await?;

        Ok((chain, needs_exclusive))
    }

    async fn confirm(&self, expected: DatabaseState) -> Result<(), RestoreError> {
        if wait_for_state(&self.db, expected, &self.settings.poll).await? {
            Ok(())
        } else {
            Err(RestoreError::StateTimeout {
                database: self.db.name().to_string(),
                expected,
                waited: self.settings.poll.max_wait(),
            })
        }
    }
}
