//! Process id to session map.

use super::{Session, SessionState};
use coz_common::{Error, Experiment, ProcessId, ProgressPoint, Result, Scope, StatusCode};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Shared handle on one session. Holding its lock serializes every call to
/// that target, so at most one fetch per session is in flight.
pub type SessionHandle = Arc<Mutex<Session>>;

/// The single authority over which processes are attached.
///
/// The map lock is held only for lookups and insertions; calls to a target
/// hold that session's own lock, so different sessions proceed in parallel.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<ProcessId, SessionHandle>>,
}

/// Lock a session, recovering from a poisoned mutex.
pub(crate) fn lock_session(handle: &SessionHandle) -> MutexGuard<'_, Session> {
    handle.lock().unwrap_or_else(|e| e.into_inner())
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, BTreeMap<ProcessId, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a freshly attached session. An existing entry for the same pid is
    /// left untouched.
    pub fn register(&self, session: Session) -> Result<SessionHandle> {
        let pid = session.pid();
        let mut map = self.map();
        if map.contains_key(&pid) {
            return Err(Error::AlreadyAttached { pid });
        }
        let handle = Arc::new(Mutex::new(session));
        map.insert(pid, handle.clone());
        debug!(pid = pid.0, sessions = map.len(), "session registered");
        Ok(handle)
    }

    pub fn get(&self, pid: ProcessId) -> Result<SessionHandle> {
        self.map()
            .get(&pid)
            .cloned()
            .ok_or(Error::NotAttached { pid })
    }

    pub fn remove(&self, pid: ProcessId) -> Option<SessionHandle> {
        let removed = self.map().remove(&pid);
        if removed.is_some() {
            debug!(pid = pid.0, "session removed");
        }
        removed
    }

    pub fn contains(&self, pid: ProcessId) -> bool {
        self.map().contains_key(&pid)
    }

    /// Attached pids in ascending order.
    pub fn process_ids(&self) -> Vec<ProcessId> {
        self.map().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    fn with_session<T>(&self, pid: ProcessId, f: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let handle = self.get(pid)?;
        let mut session = lock_session(&handle);
        f(&mut session)
    }

    pub fn state(&self, pid: ProcessId) -> Result<SessionState> {
        self.with_session(pid, |s| Ok(s.state()))
    }

    pub fn set_progress_point(&self, pid: ProcessId, point: ProgressPoint) -> Result<StatusCode> {
        self.with_session(pid, |s| s.set_progress_point(point))
    }

    pub fn set_scope(&self, pid: ProcessId, scope: Scope) -> Result<StatusCode> {
        self.with_session(pid, |s| s.set_scope(scope))
    }

    pub fn start_profiling(&self, pid: ProcessId) -> Result<StatusCode> {
        self.with_session(pid, Session::start_profiling)
    }

    pub fn end_profiling(&self, pid: ProcessId) -> Result<StatusCode> {
        self.with_session(pid, Session::end_profiling)
    }

    pub fn get_profiler_output(&self, pid: ProcessId) -> Result<Vec<Experiment>> {
        self.with_session(pid, Session::get_profiler_output)
    }

    pub fn get_current_scope(&self, pid: ProcessId) -> Result<Option<String>> {
        self.with_session(pid, Session::get_current_scope)
    }

    pub fn get_progress_point(&self, pid: ProcessId) -> Result<Option<String>> {
        self.with_session(pid, Session::get_progress_point)
    }
}
