// restoretool/src/restore/evictor.rs
use tracing::{info, warn};

use crate::engine::{DatabaseHandle, SessionId};
use crate::errors::{EngineError, ErrorCategory};

/// Result of one eviction pass.
#[derive(Debug, Default)]
pub struct EvictionReport {
    pub attempted: usize,
    pub failed: Vec<(SessionId, EngineError)>,
}

/// Terminates every session attached to the database.
///
/// Each session is killed independently; a failed kill is recorded and the
/// pass continues. Only a failure to enumerate sessions propagates. Eviction
/// does not guarantee that a subsequent mode switch succeeds, so callers
/// re-check state afterwards.
pub async fn evict_all(db: &DatabaseHandle) -> Result<EvictionReport, EngineError> {
    let sessions = db.engine().list_sessions(db.name()).await?;
    let mut report = EvictionReport::default();

    for session in sessions {
        report.attempted += 1;
        info!(database = db.name(), session = %session, "Killing session");
        if let Err(e) = db.engine().kill_session(session).await {
            warn!(
                database = db.name(),
                session = %session,
                category = %ErrorCategory::ConnectionEvictionFailure,
                error = %e,
                "Failed to kill session"
            );
            report.failed.push((session, e));
        }
    }

    if report.failed.is_empty() {
        info!(database = db.name(), attempted = report.attempted, "Session eviction finished");
    } else {
        warn!(
            database = db.name(),
            attempted = report.attempted,
            failed = report.failed.len(),
            "Session eviction finished with failures"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DatabaseState;
    use crate::engine::scripted::{Call, ScriptedEngine};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_kills_every_listed_session() -> anyhow::Result<()> {
        let engine = Arc::new(ScriptedEngine::new(DatabaseState::SingleUser).with_sessions([51, 52, 60]));
        let db = DatabaseHandle::new("ETO", engine.clone());

        let report = evict_all(&db).await?;

        assert_eq!(report.attempted, 3);
        assert!(report.failed.is_empty());
        assert_eq!(
            engine.calls(),
            vec![
                Call::ListSessions,
                Call::Kill(SessionId(51)),
                Call::Kill(SessionId(52)),
                Call::Kill(SessionId(60)),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_one_failed_kill_does_not_stop_the_others() -> anyhow::Result<()> {
        let engine = Arc::new(
            ScriptedEngine::new(DatabaseState::SingleUser)
                .with_sessions([51, 52, 53])
                .with_failing_kill(52),
        );
        let db = DatabaseHandle::new("ETO", engine.clone());

        let report = evict_all(&db).await?;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, SessionId(52));
        assert_eq!(engine.count(|c| matches!(c, Call::Kill(_))), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_sessions_means_nothing_attempted() -> anyhow::Result<()> {
        let engine = Arc::new(ScriptedEngine::new(DatabaseState::SingleUser));
        let db = DatabaseHandle::new("ETO", engine.clone());

        let report = evict_all(&db).await?;

        assert_eq!(report.attempted, 0);
        assert_eq!(engine.calls(), vec![Call::ListSessions]);
        Ok(())
    }

    #[tokio::test]
    async fn test_enumeration_failure_propagates() {
        let engine = Arc::new(ScriptedEngine::new(DatabaseState::SingleUser).failing("list_sessions"));
        let db = DatabaseHandle::new("ETO", engine.clone());

        assert!(evict_all(&db).await.is_err());
    }
}
