//! Fetches that time out a few times in a row, over real sockets, and then
//! recover. The session keeps profiling and nothing already drained is lost.

use coz_common::{
    Experiment, ProcessDescriptor, ProcessId, ProgressPoint, Scope, StatusCode,
};
use coz_core::agent::{AgentServer, BufferedBackend, ProfilerBackend};
use coz_core::collect::StaticEnumerator;
use coz_core::config::ClientConfig;
use coz_core::service::ControlService;
use coz_core::{
    AttachGateway, CancelToken, PollingDriver, ProfilingGuard, SessionRegistry, SessionState,
    StopReason,
};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Answers the first `stalls` drains only after `delay`, with the
/// experiments already taken out of the buffer.
struct StallingBackend {
    inner: BufferedBackend,
    stalls: AtomicU32,
    delay: Duration,
}

impl StallingBackend {
    fn new(stalls: u32, delay: Duration) -> Self {
        StallingBackend {
            inner: BufferedBackend::new(),
            stalls: AtomicU32::new(stalls),
            delay,
        }
    }
}

impl ProfilerBackend for StallingBackend {
    fn set_progress_point(&self, point: &ProgressPoint) -> StatusCode {
        self.inner.set_progress_point(point)
    }

    fn set_scope(&self, scope: &Scope) -> StatusCode {
        self.inner.set_scope(scope)
    }

    fn start_profiling(&self) -> StatusCode {
        self.inner.start_profiling()
    }

    fn end_profiling(&self) -> StatusCode {
        self.inner.end_profiling()
    }

    fn drain_experiments(&self) -> Vec<Experiment> {
        let batch = self.inner.drain_experiments();
        let stall = self
            .stalls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stall {
            thread::sleep(self.delay);
        }
        batch
    }

    fn current_scope(&self) -> Option<Scope> {
        self.inner.current_scope()
    }

    fn progress_point(&self) -> Option<ProgressPoint> {
        self.inner.progress_point()
    }
}

fn config(dir: &Path, rpc_timeout_ms: u64) -> ClientConfig {
    ClientConfig {
        agent_socket_dir: Some(dir.to_path_buf()),
        connect_timeout_ms: 500,
        rpc_timeout_ms,
        ..ClientConfig::default()
    }
}

fn gateway(dir: &Path, rpc_timeout_ms: u64, listed: Option<ProcessId>) -> AttachGateway {
    let processes = listed
        .map(|pid| vec![ProcessDescriptor::new(pid, "java -jar app.jar")])
        .unwrap_or_default();
    AttachGateway::new(
        &config(dir, rpc_timeout_ms),
        Box::new(StaticEnumerator::new(processes)),
    )
}

fn window(id: u64) -> Experiment {
    Experiment::new(id as i64, 25, Duration::from_millis(100), id)
}

fn configure(registry: &SessionRegistry, pid: ProcessId) {
    registry
        .set_progress_point(pid, ProgressPoint::new("com.example.Worker", 88))
        .unwrap();
    registry.set_scope(pid, Scope::new("com.example")).unwrap();
    registry.start_profiling(pid).unwrap();
}

/// Poll at a short cadence until cancelled after `run_for`.
fn profile_for(
    registry: Arc<SessionRegistry>,
    pid: ProcessId,
    out: &Path,
    run_for: Duration,
) -> coz_core::DriveReport {
    let cancel = CancelToken::new();
    let stopper = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(run_for);
            cancel.cancel();
        })
    };
    let mut guard = ProfilingGuard::new(
        registry,
        pid,
        coz_profile::Profile::new("localhost"),
        PollingDriver::new(Duration::from_millis(50)).with_output(out),
    );
    let report = guard.run(&cancel).unwrap();
    stopper.join().unwrap();
    report
}

#[test]
fn local_fetch_survives_two_timeouts() {
    let pid = ProcessId(4343);
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("stall.coz");
    let backend = Arc::new(StallingBackend::new(2, Duration::from_millis(400)));
    let _agent = AgentServer::start(dir.path(), pid, backend.clone()).unwrap();

    let registry = Arc::new(SessionRegistry::new());
    registry
        .register(gateway(dir.path(), 300, Some(pid)).attach(pid, None).unwrap())
        .unwrap();
    configure(&registry, pid);
    assert_eq!(backend.inner.push_batch((1..=3).map(window)), 3);

    let report = profile_for(registry.clone(), pid, &out, Duration::from_millis(1500));

    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.final_state, SessionState::Ended);
    assert!(report.last_error.is_some(), "the stalls should have been seen");
    assert_eq!(report.total_experiments, 3);
    // Profiling was only ended once, by the drain.
    assert_eq!(backend.inner.stats().end_calls, 1);
    assert!(!backend.inner.is_profiling());

    let windows: Vec<u64> = coz_profile::load(&out)
        .unwrap()
        .experiments()
        .iter()
        .map(|e| e.sampling_window_id)
        .collect();
    assert_eq!(windows, vec![1, 2, 3]);
}

#[test]
fn remote_fetch_survives_a_timeout_behind_the_service() {
    let pid = ProcessId(5252);
    let agent_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let out = client_dir.path().join("stall.coz");
    let backend = Arc::new(StallingBackend::new(1, Duration::from_millis(600)));
    let _agent = AgentServer::start(agent_dir.path(), pid, backend.clone()).unwrap();
    // The service gives up on the agent well before the client gives up on
    // the service, so the client sees TargetUnreachable rather than a timeout.
    let service = ControlService::bind(
        "127.0.0.1:0",
        Arc::new(gateway(agent_dir.path(), 300, Some(pid))),
    )
    .unwrap();
    let host = service.local_addr().to_string();

    let registry = Arc::new(SessionRegistry::new());
    registry
        .register(
            gateway(client_dir.path(), 1500, None)
                .attach(pid, Some(&host))
                .unwrap(),
        )
        .unwrap();
    configure(&registry, pid);
    assert_eq!(backend.inner.push_batch((1..=3).map(window)), 3);

    let report = profile_for(registry.clone(), pid, &out, Duration::from_millis(1200));

    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert!(report.last_error.is_some(), "the stall should have been seen");
    assert_eq!(report.total_experiments, 3);
    assert_eq!(backend.inner.stats().end_calls, 1);
    assert!(!service.registry().contains(pid));
    assert_eq!(coz_profile::load(&out).unwrap().len(), 3);
}
