//! Agent endpoint embedded in a profiled process.
//!
//! The measurement engine itself is opaque: it is reached only through the
//! [`ProfilerBackend`] trait. [`AgentServer`] exposes a backend on a Unix
//! socket at a well-known per-pid path so that `cozctl` (or a control
//! service on the same host) can attach to it.

mod server;

pub use server::AgentServer;

use coz_common::{Experiment, ProcessId, ProgressPoint, Scope, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Socket path of the agent endpoint for `pid`.
pub fn agent_socket_path(dir: &Path, pid: ProcessId) -> PathBuf {
    dir.join(format!("coz-agent-{}.sock", pid))
}

/// Capability surface of the in-process measurement engine.
///
/// Status codes are decided here; the client only relays them.
pub trait ProfilerBackend: Send + Sync {
    fn set_progress_point(&self, point: &ProgressPoint) -> StatusCode;
    fn set_scope(&self, scope: &Scope) -> StatusCode;
    fn start_profiling(&self) -> StatusCode;
    fn end_profiling(&self) -> StatusCode;
    /// Return and clear everything measured since the previous call.
    fn drain_experiments(&self) -> Vec<Experiment>;
    fn current_scope(&self) -> Option<Scope>;
    fn progress_point(&self) -> Option<ProgressPoint>;
}

type Resolver = Box<dyn Fn(&ProgressPoint) -> bool + Send + Sync>;

#[derive(Debug, Default)]
struct BackendState {
    progress_point: Option<ProgressPoint>,
    scope: Option<Scope>,
    profiling: bool,
    pending: Vec<Experiment>,
    stats: BackendStats,
}

/// Call counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub start_calls: u32,
    pub end_calls: u32,
    pub drain_calls: u32,
}

/// Backend that buffers experiments handed to it by the measurement engine
/// until a client drains them.
///
/// An optional resolver decides which progress points exist in the target.
pub struct BufferedBackend {
    state: Mutex<BackendState>,
    resolver: Option<Resolver>,
}

impl Default for BufferedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedBackend {
    pub fn new() -> Self {
        BufferedBackend {
            state: Mutex::new(BackendState::default()),
            resolver: None,
        }
    }

    /// Only progress points accepted by `resolver` can be set.
    pub fn with_resolver<F>(resolver: F) -> Self
    where
        F: Fn(&ProgressPoint) -> bool + Send + Sync + 'static,
    {
        BufferedBackend {
            state: Mutex::new(BackendState::default()),
            resolver: Some(Box::new(resolver)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one finished experiment. Dropped unless profiling.
    pub fn push(&self, experiment: Experiment) -> bool {
        let mut state = self.lock();
        if !state.profiling {
            return false;
        }
        state.pending.push(experiment);
        true
    }

    /// Record a batch; returns how many were kept.
    pub fn push_batch<I: IntoIterator<Item = Experiment>>(&self, batch: I) -> usize {
        let mut state = self.lock();
        if !state.profiling {
            return 0;
        }
        let before = state.pending.len();
        state.pending.extend(batch);
        state.pending.len() - before
    }

    pub fn is_profiling(&self) -> bool {
        self.lock().profiling
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn stats(&self) -> BackendStats {
        self.lock().stats
    }
}

impl ProfilerBackend for BufferedBackend {
    fn set_progress_point(&self, point: &ProgressPoint) -> StatusCode {
        if let Some(resolve) = &self.resolver {
            if !resolve(point) {
                return StatusCode::UNRESOLVED_LOCATION;
            }
        }
        let mut state = self.lock();
        if state.profiling {
            return StatusCode::ALREADY_PROFILING;
        }
        state.progress_point = Some(point.clone());
        StatusCode::OK
    }

    fn set_scope(&self, scope: &Scope) -> StatusCode {
        if scope.package_prefix.trim().is_empty() {
            return StatusCode::NO_SCOPE;
        }
        let mut state = self.lock();
        if state.profiling {
            return StatusCode::ALREADY_PROFILING;
        }
        state.scope = Some(scope.clone());
        StatusCode::OK
    }

    fn start_profiling(&self) -> StatusCode {
        let mut state = self.lock();
        state.stats.start_calls += 1;
        if state.progress_point.is_none() {
            return StatusCode::NO_PROGRESS_POINT;
        }
        if state.profiling {
            return StatusCode::ALREADY_PROFILING;
        }
        state.profiling = true;
        StatusCode::OK
    }

    fn end_profiling(&self) -> StatusCode {
        let mut state = self.lock();
        state.stats.end_calls += 1;
        if !state.profiling {
            return StatusCode::NOT_PROFILING;
        }
        state.profiling = false;
        StatusCode::OK
    }

    fn drain_experiments(&self) -> Vec<Experiment> {
        let mut state = self.lock();
        state.stats.drain_calls += 1;
        std::mem::take(&mut state.pending)
    }

    fn current_scope(&self) -> Option<Scope> {
        self.lock().scope.clone()
    }

    fn progress_point(&self) -> Option<ProgressPoint> {
        self.lock().progress_point.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn exp(window: u64) -> Experiment {
        Experiment::new(1, 10, Duration::from_millis(5), window)
    }

    #[test]
    fn socket_path_is_per_pid() {
        let path = agent_socket_path(Path::new("/run/cozctl"), ProcessId(4242));
        assert_eq!(path, PathBuf::from("/run/cozctl/coz-agent-4242.sock"));
    }

    #[test]
    fn start_requires_progress_point() {
        let backend = BufferedBackend::new();
        assert_eq!(backend.start_profiling(), StatusCode::NO_PROGRESS_POINT);
        backend.set_progress_point(&ProgressPoint::new("Foo.java", 12));
        assert_eq!(backend.start_profiling(), StatusCode::OK);
        assert_eq!(backend.start_profiling(), StatusCode::ALREADY_PROFILING);
        assert_eq!(backend.stats().start_calls, 3);
    }

    #[test]
    fn resolver_rejects_unknown_locations() {
        let backend = BufferedBackend::with_resolver(|p| p.class_name == "Foo.java");
        assert_eq!(
            backend.set_progress_point(&ProgressPoint::new("Bar.java", 1)),
            StatusCode::UNRESOLVED_LOCATION
        );
        assert!(backend.progress_point().is_none());
        assert_eq!(
            backend.set_progress_point(&ProgressPoint::new("Foo.java", 12)),
            StatusCode::OK
        );
    }

    #[test]
    fn experiments_buffer_only_while_profiling() {
        let backend = BufferedBackend::new();
        assert!(!backend.push(exp(0)));

        backend.set_progress_point(&ProgressPoint::new("Foo.java", 12));
        backend.start_profiling();
        assert_eq!(backend.push_batch((1..=3).map(exp)), 3);
        assert_eq!(backend.pending(), 3);

        let drained = backend.drain_experiments();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].sampling_window_id, 1);
        assert!(backend.drain_experiments().is_empty());

        assert_eq!(backend.end_profiling(), StatusCode::OK);
        assert_eq!(backend.end_profiling(), StatusCode::NOT_PROFILING);
        assert!(!backend.push(exp(9)));
    }

    #[test]
    fn configuration_frozen_while_profiling() {
        let backend = BufferedBackend::new();
        backend.set_progress_point(&ProgressPoint::new("Foo.java", 12));
        assert_eq!(backend.set_scope(&Scope::new("")), StatusCode::NO_SCOPE);
        assert_eq!(backend.set_scope(&Scope::new("com.example")), StatusCode::OK);
        backend.start_profiling();
        assert_eq!(
            backend.set_scope(&Scope::new("org.other")),
            StatusCode::ALREADY_PROFILING
        );
        assert_eq!(backend.current_scope(), Some(Scope::new("com.example")));
    }
}
