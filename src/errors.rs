use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::engine::DatabaseState;
use crate::restore::RestoreState;

/// Failure of a single call through the engine command interface.
///
/// Every variant is fatal for the run. Commands are never retried blindly
/// because a repeated FULL restore without re-reading state can double-apply.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0} executable not found in PATH. Please ensure the client tools are installed and in your PATH.")]
    ExecutableNotFound(&'static str),

    #[error("Failed to spawn {program} for {label}: {source}")]
    Spawn {
        program: String,
        label: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{label}' failed with status {status}: {stderr}")]
    Command {
        label: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("Unexpected output from '{label}': {reason}")]
    Parse { label: String, reason: String },

    #[error("Invalid engine connection string: {0}")]
    ConnectionString(String),
}

/// Why a backup chain could not be formed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainFailure {
    #[error("no FULL backup candidate available")]
    NoFullCandidate,

    #[error("{examined} DIFF candidate(s) examined but none is applicable to FULL backup {full_key}")]
    NoApplicableDiff { full_key: String, examined: usize },
}

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Database '{database}' did not reach state {expected} within {waited:?}")]
    StateTimeout {
        database: String,
        expected: DatabaseState,
        waited: Duration,
    },

    #[error("Database '{database}' did not enter exclusive mode after {attempts} attempt(s)")]
    ExclusiveModeNotReached { database: String, attempts: u32 },

    #[error("Backup chain resolution failed: {0}")]
    ChainResolution(ChainFailure),

    #[error("Engine command failed: {0}")]
    Engine(#[from] EngineError),

    #[error("Database '{database}' is in unexpected state {state}. Reset it before running the restore.")]
    UnexpectedState {
        database: String,
        state: DatabaseState,
    },

    #[error("Backup retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),
}

/// Error taxonomy used when reporting a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    TransientStateMismatch,
    ConnectionEvictionFailure,
    ChainResolutionFailure,
    EngineCommandFailure,
    UnexpectedDatabaseState,
    RetrievalFailure,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::TransientStateMismatch => "TransientStateMismatch",
            ErrorCategory::ConnectionEvictionFailure => "ConnectionEvictionFailure",
            ErrorCategory::ChainResolutionFailure => "ChainResolutionFailure",
            ErrorCategory::EngineCommandFailure => "EngineCommandFailure",
            ErrorCategory::UnexpectedDatabaseState => "UnexpectedDatabaseState",
            ErrorCategory::RetrievalFailure => "RetrievalFailure",
        };
        f.write_str(name)
    }
}

impl RestoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RestoreError::StateTimeout { .. } | RestoreError::ExclusiveModeNotReached { .. } => {
                ErrorCategory::TransientStateMismatch
            }
            RestoreError::ChainResolution(_) => ErrorCategory::ChainResolutionFailure,
            RestoreError::Engine(_) => ErrorCategory::EngineCommandFailure,
            RestoreError::UnexpectedState { .. } => ErrorCategory::UnexpectedDatabaseState,
            RestoreError::Retrieval(_) => ErrorCategory::RetrievalFailure,
        }
    }
}

/// Outcome of a run that stopped before `DONE`.
#[derive(Error, Debug)]
#[error("Restore failed during {state} [{}]: {source}", .source.category())]
pub struct RunFailure {
    pub state: RestoreState,
    #[source]
    pub source: RestoreError,
}

pub type Result<T, E = RestoreError> = std::result::Result<T, E>;
