// restoretool/src/restore/poller.rs
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info};

use crate::engine::{DatabaseHandle, DatabaseState};
use crate::errors::EngineError;

/// Bounded wait used by [`wait_for_state`]. `interval` is positive and never
/// exceeds `max_wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    max_wait: Duration,
    interval: Duration,
}

impl PollSchedule {
    pub fn new(max_wait: Duration, interval: Duration) -> anyhow::Result<Self> {
        if interval.is_zero() {
            anyhow::bail!("poll interval must be positive");
        }
        if interval > max_wait {
            anyhow::bail!(
                "poll interval ({:?}) must not exceed the maximum wait ({:?})",
                interval,
                max_wait
            );
        }
        Ok(Self { max_wait, interval })
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Polls the database state until it equals `expected` or `max_wait` elapses.
///
/// The first query is issued immediately. Timing out is reported as
/// `Ok(false)`; the caller decides whether that is fatal. A failing state
/// query aborts the wait and propagates.
pub async fn wait_for_state(
    db: &DatabaseHandle,
    expected: DatabaseState,
    schedule: &PollSchedule,
) -> Result<bool, EngineError> {
    let mut elapsed = Duration::ZERO;
    let mut attempt = 0u32;

    while elapsed < schedule.max_wait {
        attempt += 1;
        let current = db.state().await?;
        if current == expected {
            info!(
                database = db.name(),
                state = %current,
                attempt,
                elapsed_secs = elapsed.as_secs(),
                "Database reached expected state"
            );
            return Ok(true);
        }

        info!(
            database = db.name(),
            state = %current,
            expected = %expected,
            attempt,
            elapsed_secs = elapsed.as_secs(),
            "Database not yet in expected state. Waiting {}s...",
            schedule.interval.as_secs()
        );
        sleep(schedule.interval).await;
        elapsed += schedule.interval;
    }

    error!(
        database = db.name(),
        expected = %expected,
        attempts = attempt,
        "Database did not reach expected state within {} minutes",
        schedule.max_wait.as_secs() / 60
    );
    Ok(false)
}
