// restoretool/src/restore/exclusive.rs
use std::path::Path;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use super::evictor::evict_all;
use super::poller::{PollSchedule, wait_for_state};
use crate::engine::{DatabaseHandle, DatabaseState};
use crate::errors::{RestoreError, Result};

/// Bounds for the exclusive-mode transition and the FULL restore that follows it.
#[derive(Debug, Clone, Copy)]
pub struct ExclusiveModeSettings {
    pub max_attempts: u32,
    /// Pause after killing sessions so the engine processes the kills.
    pub eviction_settle: Duration,
    /// Pause between the mode switch and the state re-check.
    pub switch_settle: Duration,
    pub full_restore_wait: PollSchedule,
}

/// Moves the database into single-user mode and applies the FULL backup with
/// `NORECOVERY, REPLACE`, confirming the pending-restore state.
///
/// Exclusive-mode switches race against reconnecting clients, so the switch
/// is retried up to `max_attempts` times. Sessions are only evicted when an
/// attempt starts with the database already in single-user mode. Once the
/// FULL restore is issued nothing is retried.
pub async fn force_exclusive_mode(
    db: &DatabaseHandle,
    full_backup_path: &Path,
    settings: &ExclusiveModeSettings,
) -> Result<()> {
    let database = db.name();
    info!(database, "Checking whether the database is stuck in SINGLE_USER mode");

    let mut confirmed = false;
    for attempt in 1..=settings.max_attempts {
        let state = db
            .state()
            .await
            .inspect_err(|e| error!(database, attempt, error = %e, "State query failed"))?;

        if state == DatabaseState::SingleUser {
            warn!(
                database,
                attempt,
                max_attempts = settings.max_attempts,
                "Database is in SINGLE_USER mode but may have an active connection. Terminating sessions"
            );
            evict_all(db)
                .await
                .inspect_err(|e| error!(database, attempt, error = %e, "Session enumeration failed"))?;
            sleep(settings.eviction_settle).await;
        }

        info!(database, attempt, "Switching database to SINGLE_USER mode for restore");
        db.engine()
            .set_exclusive_mode(database)
            .await
            .inspect_err(|e| error!(database, attempt, error = %e, "Exclusive-mode command failed"))?;
        sleep(settings.switch_settle).await;

        let new_state = db
            .state()
            .await
            .inspect_err(|e| error!(database, attempt, error = %e, "State query failed"))?;
        if new_state == DatabaseState::SingleUser {
            info!(database, attempt, "SINGLE_USER mode confirmed");
            confirmed = true;
            break;
        }
        warn!(database, attempt, state = %new_state, "SINGLE_USER mode did not stick");
    }

    if !confirmed {
        error!(
            database,
            attempts = settings.max_attempts,
            "Failed to set SINGLE_USER mode. Restore cannot proceed"
        );
        return Err(RestoreError::ExclusiveModeNotReached {
            database: database.to_string(),
            attempts: settings.max_attempts,
        });
    }

    info!(database, path = %full_backup_path.display(), "Restoring FULL backup");
    db.engine()
        .restore_full(database, full_backup_path)
        .await
        .inspect_err(|e| error!(database, error = %e, "FULL restore command failed"))?;

    let schedule = settings.full_restore_wait;
    if !wait_for_state(db, DatabaseState::Restoring, &schedule).await? {
        error!(database, "Database did not transition to RESTORING state after FULL restore");
        return Err(RestoreError::StateTimeout {
            database: database.to_string(),
            expected: DatabaseState::Restoring,
            waited: schedule.max_wait(),
        });
    }

    info!(database, "Database is now in RESTORING mode");
    Ok(())
}
