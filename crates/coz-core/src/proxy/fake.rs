//! Scripted proxy for unit tests.

use super::TargetProxy;
use coz_common::{Error, Experiment, ProcessId, ProgressPoint, Result, Scope, StatusCode, Transport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted answer to `get_profiler_output`.
#[derive(Debug, Clone)]
pub(crate) enum Fetch {
    Batch(Vec<Experiment>),
    Unreachable,
    Protocol,
}

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub fetches: VecDeque<Fetch>,
    pub progress_point_status: Option<StatusCode>,
    pub scope_status: Option<StatusCode>,
    pub end_unreachable: bool,
    pub progress_point: Option<ProgressPoint>,
    pub scope: Option<Scope>,
    pub set_calls: u32,
    pub start_calls: u32,
    pub end_calls: u32,
    pub fetch_calls: u32,
}

/// Shares its state with the test so calls can be inspected after the
/// proxy has been moved into a session.
pub(crate) struct FakeProxy {
    pid: ProcessId,
    state: Arc<Mutex<FakeState>>,
}

impl FakeProxy {
    pub(crate) fn new(pid: u32) -> (Self, Arc<Mutex<FakeState>>) {
        let state = Arc::new(Mutex::new(FakeState::default()));
        (
            FakeProxy {
                pid: ProcessId(pid),
                state: state.clone(),
            },
            state,
        )
    }

    fn unreachable(&self) -> Error {
        Error::TargetUnreachable {
            pid: self.pid,
            endpoint: "fake".to_string(),
            cause: "connection refused".to_string(),
        }
    }
}

pub(crate) fn experiments(range: std::ops::RangeInclusive<u64>) -> Vec<Experiment> {
    range
        .map(|w| Experiment::new(w as i64, 10, Duration::from_millis(w), w))
        .collect()
}

impl TargetProxy for FakeProxy {
    fn set_progress_point(&mut self, point: &ProgressPoint) -> Result<StatusCode> {
        let mut s = self.state.lock().unwrap();
        s.set_calls += 1;
        let status = s.progress_point_status.unwrap_or(StatusCode::OK);
        if status.is_ok() {
            s.progress_point = Some(point.clone());
        }
        Ok(status)
    }

    fn set_scope(&mut self, scope: &Scope) -> Result<StatusCode> {
        let mut s = self.state.lock().unwrap();
        s.set_calls += 1;
        let status = s.scope_status.unwrap_or(StatusCode::OK);
        if status.is_ok() {
            s.scope = Some(scope.clone());
        }
        Ok(status)
    }

    fn start_profiling(&mut self) -> Result<StatusCode> {
        self.state.lock().unwrap().start_calls += 1;
        Ok(StatusCode::OK)
    }

    fn end_profiling(&mut self) -> Result<StatusCode> {
        let mut s = self.state.lock().unwrap();
        s.end_calls += 1;
        if s.end_unreachable {
            drop(s);
            return Err(self.unreachable());
        }
        Ok(StatusCode::OK)
    }

    fn get_profiler_output(&mut self) -> Result<Vec<Experiment>> {
        let next = {
            let mut s = self.state.lock().unwrap();
            s.fetch_calls += 1;
            s.fetches.pop_front()
        };
        match next {
            None => Ok(Vec::new()),
            Some(Fetch::Batch(batch)) => Ok(batch),
            Some(Fetch::Unreachable) => Err(self.unreachable()),
            Some(Fetch::Protocol) => Err(Error::Protocol {
                endpoint: "fake".to_string(),
                message: "garbled response".to_string(),
            }),
        }
    }

    fn get_current_scope(&mut self) -> Result<Option<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .scope
            .as_ref()
            .map(|s| s.package_prefix.clone()))
    }

    fn get_progress_point(&mut self) -> Result<Option<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .progress_point
            .as_ref()
            .map(ToString::to_string))
    }

    fn pid(&self) -> ProcessId {
        self.pid
    }

    fn transport(&self) -> Transport {
        Transport::Local
    }

    fn endpoint(&self) -> String {
        "fake".to_string()
    }
}
