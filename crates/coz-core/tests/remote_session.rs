//! Profiling through the control service: client -> TCP -> service -> agent.

use coz_common::{Experiment, ProcessDescriptor, ProcessId, ProgressPoint, Scope};
use coz_core::agent::{AgentServer, BufferedBackend};
use coz_core::collect::StaticEnumerator;
use coz_core::config::ClientConfig;
use coz_core::service::ControlService;
use coz_core::{
    AttachGateway, CancelToken, PollingDriver, ProfilingGuard, SessionRegistry, SessionState,
    StopReason,
};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const PID: ProcessId = ProcessId(5150);

fn config(dir: &Path) -> ClientConfig {
    ClientConfig {
        agent_socket_dir: Some(dir.to_path_buf()),
        connect_timeout_ms: 500,
        rpc_timeout_ms: 1000,
        ..ClientConfig::default()
    }
}

fn service(dir: &Path) -> ControlService {
    let gateway = AttachGateway::new(
        &config(dir),
        Box::new(StaticEnumerator::new(vec![ProcessDescriptor::new(
            PID,
            "java -cp app.jar Main",
        )])),
    );
    ControlService::bind("127.0.0.1:0", Arc::new(gateway)).unwrap()
}

/// Client side: its own (empty) agent dir, so only the remote path works.
fn client(dir: &Path) -> AttachGateway {
    AttachGateway::new(&config(dir), Box::new(StaticEnumerator::default()))
}

#[test]
fn remote_listing_goes_through_the_service() {
    let agent_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let _agent = AgentServer::start(agent_dir.path(), PID, Arc::new(BufferedBackend::new())).unwrap();
    let service = service(agent_dir.path());
    let host = service.local_addr().to_string();

    let processes = client(client_dir.path()).list_processes(Some(&host)).unwrap();
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].process_id, PID);
    assert!(processes[0].attachable);
}

#[test]
fn remote_profile_until_cancelled() {
    let agent_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let out = client_dir.path().join("remote.coz");
    let backend = Arc::new(BufferedBackend::new());
    let _agent = AgentServer::start(agent_dir.path(), PID, backend.clone()).unwrap();
    let service = service(agent_dir.path());
    let host = service.local_addr().to_string();

    let gateway = client(client_dir.path());
    let registry = Arc::new(SessionRegistry::new());
    let session = gateway.attach(PID, Some(&host)).unwrap();
    assert_eq!(session.transport().to_string(), format!("remote({})", host));
    registry.register(session).unwrap();
    assert!(service.registry().contains(PID));

    registry
        .set_progress_point(PID, ProgressPoint::new("com.example.Server", 210))
        .unwrap();
    registry.set_scope(PID, Scope::new("com.example")).unwrap();
    registry.start_profiling(PID).unwrap();
    assert!(backend.is_profiling());
    assert_eq!(
        registry.get_progress_point(PID).unwrap().as_deref(),
        Some("com.example.Server:210")
    );

    backend.push_batch((1..=4).map(|id| {
        Experiment::new(id as i64, 50, Duration::from_millis(250), id)
    }));

    let cancel = CancelToken::new();
    let stopper = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            cancel.cancel();
        })
    };
    let mut guard = ProfilingGuard::new(
        registry.clone(),
        PID,
        coz_profile::Profile::new(host.clone()),
        PollingDriver::new(Duration::from_millis(50)).with_output(&out),
    );
    let report = guard.run(&cancel).unwrap();
    stopper.join().unwrap();
    drop(guard);

    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.final_state, SessionState::Ended);
    assert_eq!(report.total_experiments, 4);
    assert!(!backend.is_profiling());
    assert_eq!(backend.stats().end_calls, 1);
    // Ending profiling through the service releases its session too.
    assert!(!service.registry().contains(PID));

    let saved = coz_profile::load(&out).unwrap();
    assert_eq!(saved.source_identity(), host);
    assert_eq!(saved.len(), 4);
}

#[test]
fn remote_attach_to_unknown_pid_is_not_found() {
    let agent_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let service = service(agent_dir.path());
    let host = service.local_addr().to_string();

    let err = client(client_dir.path())
        .attach(ProcessId(1), Some(&host))
        .unwrap_err();
    assert!(matches!(err, coz_common::Error::ProcessNotFound { pid } if pid == ProcessId(1)));
}

#[test]
fn service_shutdown_ends_held_sessions() {
    let agent_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(BufferedBackend::new());
    let _agent = AgentServer::start(agent_dir.path(), PID, backend.clone()).unwrap();
    let service = service(agent_dir.path());
    let host = service.local_addr().to_string();

    let registry = SessionRegistry::new();
    registry
        .register(client(client_dir.path()).attach(PID, Some(&host)).unwrap())
        .unwrap();
    registry
        .set_progress_point(PID, ProgressPoint::new("Main.java", 1))
        .unwrap();
    registry.start_profiling(PID).unwrap();
    assert!(backend.is_profiling());

    service.shutdown();
    assert!(!backend.is_profiling());
}
