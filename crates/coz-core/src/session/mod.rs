//! Profiling sessions.
//!
//! A [`Session`] wraps the proxy of one attached process and enforces the
//! lifecycle:
//!
//! ```text
//! Unattached -> Attached -> Configured -> Profiling -> Ended
//! ```
//!
//! States only move forward and `Ended` is terminal. Requests that are not
//! valid in the current state fail locally without contacting the target
//! and without changing anything.

mod registry;

pub use registry::{SessionHandle, SessionRegistry};

use crate::logging::event_names;
use crate::proxy::TargetProxy;
use coz_common::{Error, Experiment, ProcessId, ProgressPoint, Result, Scope, StatusCode, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unattached,
    Attached,
    Configured,
    Profiling,
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Unattached => "unattached",
            SessionState::Attached => "attached",
            SessionState::Configured => "configured",
            SessionState::Profiling => "profiling",
            SessionState::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// One attached process and everything configured on it.
pub struct Session {
    pid: ProcessId,
    transport: Transport,
    proxy: Box<dyn TargetProxy>,
    state: SessionState,
    progress_point: Option<ProgressPoint>,
    scope: Option<Scope>,
    start_status: Option<StatusCode>,
    end_status: Option<StatusCode>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("pid", &self.pid)
            .field("transport", &self.transport)
            .field("endpoint", &self.proxy.endpoint())
            .field("state", &self.state)
            .field("progress_point", &self.progress_point)
            .field("scope", &self.scope)
            .finish()
    }
}

impl Session {
    /// A freshly attached session. Takes sole ownership of the proxy.
    pub fn new(proxy: Box<dyn TargetProxy>) -> Self {
        Session {
            pid: proxy.pid(),
            transport: proxy.transport(),
            proxy,
            state: SessionState::Attached,
            progress_point: None,
            scope: None,
            start_status: None,
            end_status: None,
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn endpoint(&self) -> String {
        self.proxy.endpoint()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn progress_point(&self) -> Option<&ProgressPoint> {
        self.progress_point.as_ref()
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    /// Status returned by the target when profiling started.
    pub fn start_status(&self) -> Option<StatusCode> {
        self.start_status
    }

    fn advance(&mut self, to: SessionState) {
        if to > self.state {
            debug!(pid = self.pid.0, from = %self.state, to = %to, "session state");
            self.state = to;
        }
    }

    fn invalid(&self, message: impl Into<String>, status: Option<StatusCode>) -> Error {
        Error::InvalidConfiguration {
            pid: self.pid,
            message: message.into(),
            status,
        }
    }

    /// Configuration is only accepted before profiling starts.
    fn check_configurable(&self, what: &str) -> Result<()> {
        match self.state {
            SessionState::Attached | SessionState::Configured => Ok(()),
            SessionState::Unattached => Err(Error::NotAttached { pid: self.pid }),
            SessionState::Profiling => Err(self.invalid(
                format!("{} cannot change after profiling has started", what),
                None,
            )),
            SessionState::Ended => Err(self.invalid("session has ended", None)),
        }
    }

    pub fn set_progress_point(&mut self, point: ProgressPoint) -> Result<StatusCode> {
        if let Err(e) = self.check_configurable("progress point") {
            warn!(target: event_names::CONFIGURE_REJECTED, pid = self.pid.0, point = %point, error = %e, "progress point rejected");
            return Err(e);
        }
        let status = self.proxy.set_progress_point(&point)?;
        if !status.is_ok() {
            return Err(self.invalid(
                format!("target rejected progress point {}: {}", point, status),
                Some(status),
            ));
        }
        info!(target: event_names::CONFIGURE_PROGRESS_POINT, pid = self.pid.0, point = %point, "progress point set");
        self.progress_point = Some(point);
        self.advance(SessionState::Configured);
        Ok(status)
    }

    pub fn set_scope(&mut self, scope: Scope) -> Result<StatusCode> {
        if let Err(e) = self.check_configurable("scope") {
            warn!(target: event_names::CONFIGURE_REJECTED, pid = self.pid.0, scope = %scope, error = %e, "scope rejected");
            return Err(e);
        }
        let status = self.proxy.set_scope(&scope)?;
        if !status.is_ok() {
            return Err(self.invalid(
                format!("target rejected scope {}: {}", scope, status),
                Some(status),
            ));
        }
        info!(target: event_names::CONFIGURE_SCOPE, pid = self.pid.0, scope = %scope, "scope set");
        self.scope = Some(scope);
        self.advance(SessionState::Configured);
        Ok(status)
    }

    /// Start profiling. Repeating it while profiling returns the first
    /// status without contacting the target.
    pub fn start_profiling(&mut self) -> Result<StatusCode> {
        match self.state {
            SessionState::Profiling => return Ok(self.start_status.unwrap_or(StatusCode::OK)),
            SessionState::Ended => return Err(self.invalid("session has ended", None)),
            SessionState::Unattached => return Err(Error::NotAttached { pid: self.pid }),
            SessionState::Attached | SessionState::Configured => {}
        }
        if self.progress_point.is_none() {
            return Err(self.invalid(
                "a progress point must be set before profiling starts",
                Some(StatusCode::NO_PROGRESS_POINT),
            ));
        }
        let status = self.proxy.start_profiling()?;
        if !status.is_ok() {
            return Err(self.invalid(
                format!("target refused to start profiling: {}", status),
                Some(status),
            ));
        }
        info!(target: event_names::PROFILE_STARTED, pid = self.pid.0, transport = %self.transport, "profiling started");
        self.start_status = Some(status);
        self.advance(SessionState::Profiling);
        Ok(status)
    }

    /// Stop profiling. Contacts the target at most once over the session's
    /// lifetime; the session is `Ended` afterwards even if that call fails.
    pub fn end_profiling(&mut self) -> Result<StatusCode> {
        match self.state {
            SessionState::Ended => Ok(self.end_status.unwrap_or(StatusCode::OK)),
            SessionState::Profiling => {
                self.advance(SessionState::Ended);
                let status = self.proxy.end_profiling()?;
                if !status.is_ok() {
                    warn!(pid = self.pid.0, status = %status, "target reported a status when ending profiling");
                }
                self.end_status = Some(status);
                Ok(status)
            }
            SessionState::Unattached | SessionState::Attached | SessionState::Configured => {
                self.advance(SessionState::Ended);
                self.end_status = Some(StatusCode::OK);
                Ok(StatusCode::OK)
            }
        }
    }

    /// Pull the next batch. Empty, without contacting the target, unless
    /// profiling.
    pub fn get_profiler_output(&mut self) -> Result<Vec<Experiment>> {
        if self.state != SessionState::Profiling {
            return Ok(Vec::new());
        }
        self.proxy.get_profiler_output()
    }

    pub fn get_current_scope(&mut self) -> Result<Option<String>> {
        if self.state == SessionState::Ended {
            return Ok(self.scope.as_ref().map(|s| s.package_prefix.clone()));
        }
        self.proxy.get_current_scope()
    }

    pub fn get_progress_point(&mut self) -> Result<Option<String>> {
        if self.state == SessionState::Ended {
            return Ok(self.progress_point.as_ref().map(ToString::to_string));
        }
        self.proxy.get_progress_point()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::fake::{experiments, Fetch, FakeProxy};

    fn session() -> (Session, std::sync::Arc<std::sync::Mutex<crate::proxy::fake::FakeState>>) {
        let (proxy, state) = FakeProxy::new(4242);
        (Session::new(Box::new(proxy)), state)
    }

    fn configured() -> (Session, std::sync::Arc<std::sync::Mutex<crate::proxy::fake::FakeState>>) {
        let (mut s, state) = session();
        s.set_progress_point(ProgressPoint::new("Foo.java", 12)).unwrap();
        s.set_scope(Scope::new("com.example")).unwrap();
        (s, state)
    }

    #[test]
    fn new_session_is_attached() {
        let (s, _) = session();
        assert_eq!(s.state(), SessionState::Attached);
        assert_eq!(s.pid(), ProcessId(4242));
        assert_eq!(s.transport(), &Transport::Local);
    }

    #[test]
    fn configuring_moves_to_configured() {
        let (s, _) = configured();
        assert_eq!(s.state(), SessionState::Configured);
        assert_eq!(s.progress_point().unwrap().to_string(), "Foo.java:12");
        assert_eq!(s.scope().unwrap().package_prefix, "com.example");
    }

    #[test]
    fn target_rejection_is_invalid_configuration() {
        let (mut s, state) = session();
        state.lock().unwrap().progress_point_status = Some(StatusCode::UNRESOLVED_LOCATION);
        let err = s
            .set_progress_point(ProgressPoint::new("Nope.java", 1))
            .unwrap_err();
        match err {
            Error::InvalidConfiguration { status, .. } => {
                assert_eq!(status, Some(StatusCode::UNRESOLVED_LOCATION))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.state(), SessionState::Attached);
        assert!(s.progress_point().is_none());
    }

    #[test]
    fn start_twice_is_idempotent() {
        let (mut s, state) = configured();
        assert_eq!(s.start_profiling().unwrap(), StatusCode::OK);
        assert_eq!(s.start_profiling().unwrap(), StatusCode::OK);
        assert_eq!(state.lock().unwrap().start_calls, 1);
        assert_eq!(s.state(), SessionState::Profiling);
    }

    #[test]
    fn start_needs_a_progress_point() {
        let (mut s, state) = session();
        s.set_scope(Scope::new("com.example")).unwrap();
        assert!(matches!(
            s.start_profiling(),
            Err(Error::InvalidConfiguration { .. })
        ));
        assert_eq!(state.lock().unwrap().start_calls, 0);
        assert_eq!(s.state(), SessionState::Configured);
    }

    #[test]
    fn reconfiguring_while_profiling_is_rejected_locally() {
        let (mut s, state) = configured();
        s.start_profiling().unwrap();
        let calls_before = state.lock().unwrap().set_calls;

        assert!(matches!(
            s.set_progress_point(ProgressPoint::new("Bar.java", 3)),
            Err(Error::InvalidConfiguration { status: None, .. })
        ));
        assert!(matches!(
            s.set_scope(Scope::new("org.other")),
            Err(Error::InvalidConfiguration { .. })
        ));
        assert_eq!(state.lock().unwrap().set_calls, calls_before);
        assert_eq!(s.progress_point().unwrap().class_name, "Foo.java");
        assert_eq!(s.state(), SessionState::Profiling);
    }

    #[test]
    fn end_without_start_is_benign() {
        let (mut s, state) = configured();
        assert_eq!(s.end_profiling().unwrap(), StatusCode::OK);
        assert_eq!(s.state(), SessionState::Ended);
        assert_eq!(state.lock().unwrap().end_calls, 0);
    }

    #[test]
    fn end_contacts_target_once() {
        let (mut s, state) = configured();
        s.start_profiling().unwrap();
        s.end_profiling().unwrap();
        s.end_profiling().unwrap();
        assert_eq!(state.lock().unwrap().end_calls, 1);
        assert!(matches!(
            s.start_profiling(),
            Err(Error::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn failed_end_still_ends() {
        let (mut s, state) = configured();
        s.start_profiling().unwrap();
        state.lock().unwrap().end_unreachable = true;
        assert!(matches!(
            s.end_profiling(),
            Err(Error::TargetUnreachable { .. })
        ));
        assert_eq!(s.state(), SessionState::Ended);
        assert_eq!(s.end_profiling().unwrap(), StatusCode::OK);
        assert_eq!(state.lock().unwrap().end_calls, 1);
    }

    #[test]
    fn fetch_outside_profiling_is_empty_and_local() {
        let (mut s, state) = configured();
        state
            .lock()
            .unwrap()
            .fetches
            .push_back(Fetch::Batch(experiments(1..=3)));
        assert!(s.get_profiler_output().unwrap().is_empty());
        assert_eq!(state.lock().unwrap().fetch_calls, 0);

        s.start_profiling().unwrap();
        assert_eq!(s.get_profiler_output().unwrap().len(), 3);
        s.end_profiling().unwrap();
        assert!(s.get_profiler_output().unwrap().is_empty());
        assert_eq!(state.lock().unwrap().fetch_calls, 1);
    }

    #[test]
    fn introspection_reports_unset() {
        let (mut s, _) = session();
        assert_eq!(s.get_current_scope().unwrap(), None);
        assert_eq!(s.get_progress_point().unwrap(), None);
        s.set_scope(Scope::new("com.example")).unwrap();
        assert_eq!(s.get_current_scope().unwrap().as_deref(), Some("com.example"));
    }

    #[test]
    fn states_are_ordered() {
        assert!(SessionState::Unattached < SessionState::Attached);
        assert!(SessionState::Profiling < SessionState::Ended);
    }
}
