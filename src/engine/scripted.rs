//! In-memory engine for tests. It models the state transitions the real
//! engine performs for each command and records every call it receives.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{DatabaseState, Engine, LsnMetadata, SessionId};
use crate::errors::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    QueryState,
    ListSessions,
    Kill(SessionId),
    SetExclusive,
    RestoreFull(PathBuf),
    RestoreDiff(PathBuf),
    Recover,
    ReadLsn(PathBuf),
}

impl Call {
    fn kind(&self) -> &'static str {
        match self {
            Call::QueryState => "query_state",
            Call::ListSessions => "list_sessions",
            Call::Kill(_) => "kill_session",
            Call::SetExclusive => "set_exclusive_mode",
            Call::RestoreFull(_) => "restore_full",
            Call::RestoreDiff(..) => "restore_diff",
            Call::Recover => "recover",
            Call::ReadLsn(_) => "read_lsn_metadata",
        }
    }

    pub(crate) fn is_mutation(&self) -> bool {
        !matches!(self, Call::QueryState | Call::ListSessions | Call::ReadLsn(_))
    }
}

struct Model {
    state: DatabaseState,
    scripted_states: VecDeque<DatabaseState>,
    sessions: Vec<SessionId>,
    failing_kills: HashSet<SessionId>,
    ignored_exclusive_requests: u32,
    reconnect_after_kill: bool,
    lsn: HashMap<PathBuf, LsnMetadata>,
    failing: HashSet<&'static str>,
    calls: Vec<Call>,
}

pub(crate) struct ScriptedEngine {
    model: Mutex<Model>,
}

impl ScriptedEngine {
    pub(crate) fn new(initial: DatabaseState) -> Self {
        Self {
            model: Mutex::new(Model {
                state: initial,
                scripted_states: VecDeque::new(),
                sessions: Vec::new(),
                failing_kills: HashSet::new(),
                ignored_exclusive_requests: 0,
                reconnect_after_kill: false,
                lsn: HashMap::new(),
                failing: HashSet::new(),
                calls: Vec::new(),
            }),
        }
    }

    /// States returned by the next state queries, ahead of the modelled state.
    pub(crate) fn with_state_script(self, states: impl IntoIterator<Item = DatabaseState>) -> Self {
        self.model.lock().unwrap().scripted_states.extend(states);
        self
    }

    pub(crate) fn with_sessions(self, sessions: impl IntoIterator<Item = i32>) -> Self {
        self.model
            .lock()
            .unwrap()
            .sessions
            .extend(sessions.into_iter().map(SessionId));
        self
    }

    pub(crate) fn with_failing_kill(self, session: i32) -> Self {
        self.model.lock().unwrap().failing_kills.insert(SessionId(session));
        self
    }

    /// The next `count` exclusive-mode requests are accepted but do not stick,
    /// as when a client reconnects before the switch lands.
    pub(crate) fn ignoring_exclusive_requests(self, count: u32) -> Self {
        self.model.lock().unwrap().ignored_exclusive_requests = count;
        self
    }

    /// Killed sessions come straight back.
    pub(crate) fn with_reconnecting_clients(self) -> Self {
        self.model.lock().unwrap().reconnect_after_kill = true;
        self
    }

    pub(crate) fn with_lsn(self, path: impl Into<PathBuf>, meta: LsnMetadata) -> Self {
        self.model.lock().unwrap().lsn.insert(path.into(), meta);
        self
    }

    /// Every call of the named operation fails with a command error.
    pub(crate) fn failing(self, operation: &'static str) -> Self {
        self.model.lock().unwrap().failing.insert(operation);
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.model.lock().unwrap().calls.clone()
    }

    pub(crate) fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    pub(crate) fn current_state(&self) -> DatabaseState {
        self.model.lock().unwrap().state
    }

    fn record(&self, call: Call) -> Result<std::sync::MutexGuard<'_, Model>, EngineError> {
        let mut model = self.model.lock().unwrap();
        let kind = call.kind();
        model.calls.push(call);
        if model.failing.contains(kind) {
            return Err(EngineError::Command {
                label: kind.to_string(),
                status: "exit status: 1".to_string(),
                stdout: String::new(),
                stderr: format!("scripted failure of {}", kind),
            });
        }
        Ok(model)
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn query_state(&self, _database: &str) -> Result<DatabaseState, EngineError> {
        let mut model = self.record(Call::QueryState)?;
        Ok(match model.scripted_states.pop_front() {
            Some(state) => state,
            None => model.state,
        })
    }

    async fn list_sessions(&self, _database: &str) -> Result<Vec<SessionId>, EngineError> {
        let model = self.record(Call::ListSessions)?;
        Ok(model.sessions.clone())
    }

    async fn kill_session(&self, session: SessionId) -> Result<(), EngineError> {
        let mut model = self.record(Call::Kill(session))?;
        if model.failing_kills.contains(&session) {
            return Err(EngineError::Command {
                label: "kill_session".to_string(),
                status: "exit status: 1".to_string(),
                stdout: String::new(),
                stderr: format!("Process ID {} is not an active process ID.", session),
            });
        }
        if !model.reconnect_after_kill {
            model.sessions.retain(|s| *s != session);
        }
        Ok(())
    }

    async fn set_exclusive_mode(&self, _database: &str) -> Result<(), EngineError> {
        let mut model = self.record(Call::SetExclusive)?;
        if model.ignored_exclusive_requests > 0 {
            model.ignored_exclusive_requests -= 1;
        } else {
            model.state = DatabaseState::SingleUser;
            model.sessions.clear();
        }
        Ok(())
    }

    async fn restore_full(&self, _database: &str, backup_path: &Path) -> Result<(), EngineError> {
        let mut model = self.record(Call::RestoreFull(backup_path.to_path_buf()))?;
        if !model.sessions.is_empty() {
            return Err(EngineError::Command {
                label: "restore FULL".to_string(),
                status: "exit status: 1".to_string(),
                stdout: String::new(),
                stderr: "Exclusive access could not be obtained because the database is in use."
                    .to_string(),
            });
        }
        model.state = DatabaseState::Restoring;
        Ok(())
    }

    async fn restore_diff(&self, _database: &str, backup_path: &Path) -> Result<(), EngineError> {
        let mut model = self.record(Call::RestoreDiff(backup_path.to_path_buf()))?;
        model.state = DatabaseState::Restoring;
        Ok(())
    }

    async fn recover(&self, _database: &str) -> Result<(), EngineError> {
        let mut model = self.record(Call::Recover)?;
        model.state = DatabaseState::Online;
        Ok(())
    }

    async fn read_lsn_metadata(&self, backup_path: &Path) -> Result<LsnMetadata, EngineError> {
        let model = self.record(Call::ReadLsn(backup_path.to_path_buf()))?;
        model
            .lsn
            .get(backup_path)
            .copied()
            .ok_or_else(|| EngineError::Parse {
                label: "read backup header".to_string(),
                reason: format!("no backup set in {}", backup_path.display()),
            })
    }
}
