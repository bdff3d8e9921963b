//! Command interface to the database engine.
//!
//! The orchestrator only depends on the operations of [`Engine`]. The
//! production transport is [`sqlcmd::SqlcmdEngine`].

pub(crate) mod sqlcmd;

#[cfg(test)]
pub(crate) mod scripted;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::EngineError;

/// Operational state reported by the engine. Never cached beyond one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseState {
    Online,
    Restoring,
    SingleUser,
    Recovering,
    Unknown,
}

impl DatabaseState {
    /// Maps `sys.databases.state_desc` / `user_access_desc` onto a state.
    /// A missing row (database does not exist) is `Unknown`.
    pub fn from_descriptions(state_desc: Option<&str>, user_access_desc: Option<&str>) -> Self {
        let Some(state_desc) = state_desc else {
            return DatabaseState::Unknown;
        };
        match state_desc.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => {
                let single = user_access_desc
                    .map(|access| access.trim().eq_ignore_ascii_case("SINGLE_USER"))
                    .unwrap_or(false);
                if single {
                    DatabaseState::SingleUser
                } else {
                    DatabaseState::Online
                }
            }
            "RESTORING" => DatabaseState::Restoring,
            "RECOVERING" | "RECOVERY_PENDING" => DatabaseState::Recovering,
            _ => DatabaseState::Unknown,
        }
    }
}

impl fmt::Display for DatabaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatabaseState::Online => "ONLINE",
            DatabaseState::Restoring => "RESTORING",
            DatabaseState::SingleUser => "SINGLE_USER",
            DatabaseState::Recovering => "RECOVERING",
            DatabaseState::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Opaque engine session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub i32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Log sequence number. SQL Server exposes these as `numeric(25,0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lsn(pub u128);

impl FromStr for Lsn {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u128>().map(Lsn)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// LSN metadata read from a backup artifact header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LsnMetadata {
    pub first_lsn: Lsn,
    pub differential_base_lsn: Option<Lsn>,
}

#[async_trait]
pub trait Engine: Send + Sync {
    async fn query_state(&self, database: &str) -> Result<DatabaseState, EngineError>;

    /// Sessions attached to `database`, excluding the caller's own session.
    async fn list_sessions(&self, database: &str) -> Result<Vec<SessionId>, EngineError>;

    async fn kill_session(&self, session: SessionId) -> Result<(), EngineError>;

    /// Switches to single-user mode, rolling back other sessions immediately.
    async fn set_exclusive_mode(&self, database: &str) -> Result<(), EngineError>;

    /// Restores a FULL backup over any existing database, leaving it pending restore.
    async fn restore_full(&self, database: &str, backup_path: &Path) -> Result<(), EngineError>;

    /// Applies a DIFF on top of a pending FULL, leaving the database pending
    /// restore. Recovery is always a separate [`Engine::recover`] call.
    async fn restore_diff(&self, database: &str, backup_path: &Path) -> Result<(), EngineError>;

    async fn recover(&self, database: &str) -> Result<(), EngineError>;

    /// Reads header metadata of a backup file that has not been restored.
    async fn read_lsn_metadata(&self, backup_path: &Path) -> Result<LsnMetadata, EngineError>;
}

/// The target database of one restore run and the engine it lives on.
#[derive(Clone)]
pub struct DatabaseHandle {
    name: String,
    engine: Arc<dyn Engine>,
}

impl DatabaseHandle {
    pub fn new(name: impl Into<String>, engine: Arc<dyn Engine>) -> Self {
        Self {
            name: name.into(),
            engine,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub async fn state(&self) -> Result<DatabaseState, EngineError> {
        self.engine.query_state(&self.name).await
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle").field("name", &self.name).finish()
    }
}
