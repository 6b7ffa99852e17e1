//! Attach gateway: turns a process id (and optional host) into a session.
//!
//! - Local: the process must be in the live process table, then its agent
//!   socket is opened and a `hello` handshake checks the protocol version.
//! - Remote: the control service on `host[:port]` is greeted, then asked to
//!   attach to the pid on its side.
//!
//! Attach is never retried here; failures carry the pid, the endpoint and
//! the cause.

use crate::agent::agent_socket_path;
use crate::collect::ProcessEnumerator;
use crate::config::ClientConfig;
use crate::logging::event_names;
use crate::proxy::{LocalProxy, RemoteProxy};
use crate::rpc::protocol::{methods, HelloResult, PeerRole, ProcessesResult, PROTOCOL_VERSION};
use crate::rpc::{Endpoint, RpcConnection, RpcError};
use crate::session::Session;
use coz_common::{Error, ProcessDescriptor, ProcessId, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub struct AttachGateway {
    enumerator: Box<dyn ProcessEnumerator>,
    agent_dir: PathBuf,
    default_port: u16,
    connect_timeout: Duration,
    rpc_timeout: Duration,
}

impl AttachGateway {
    pub fn new(config: &ClientConfig, enumerator: Box<dyn ProcessEnumerator>) -> Self {
        AttachGateway {
            enumerator,
            agent_dir: config.agent_dir(),
            default_port: config.default_port,
            connect_timeout: config.connect_timeout(),
            rpc_timeout: config.rpc_timeout(),
        }
    }

    pub fn agent_dir(&self) -> &Path {
        &self.agent_dir
    }

    /// Attach locally when `host` is `None`, through a control service
    /// otherwise.
    pub fn attach(&self, pid: ProcessId, host: Option<&str>) -> Result<Session> {
        info!(
            target: event_names::ATTACH_STARTED,
            pid = pid.0,
            host = host.unwrap_or("local"),
            "attaching"
        );
        let result = match host {
            None => self.attach_local(pid),
            Some(host) => self.attach_remote(pid, host),
        };
        match &result {
            Ok(session) => info!(
                target: event_names::ATTACH_SUCCEEDED,
                pid = pid.0,
                endpoint = %session.endpoint(),
                "attached"
            ),
            Err(e) => warn!(target: event_names::ATTACH_FAILED, pid = pid.0, error = %e, "attach failed"),
        }
        result
    }

    pub fn attach_local(&self, pid: ProcessId) -> Result<Session> {
        let found = self.enumerator.find(pid).map_err(|e| Error::AttachFailed {
            pid,
            endpoint: "process table".to_string(),
            cause: e.to_string(),
        })?;
        if found.is_none() {
            return Err(Error::ProcessNotFound { pid });
        }

        let endpoint = Endpoint::Unix(agent_socket_path(&self.agent_dir, pid));
        let mut conn = self.connection(endpoint.clone());
        let hello = handshake(&mut conn, pid)?;
        if hello.role != PeerRole::Agent || hello.pid != Some(pid) {
            return Err(Error::AttachFailed {
                pid,
                endpoint: endpoint.to_string(),
                cause: format!(
                    "endpoint belongs to {:?} (pid {:?}), not the agent of pid {}",
                    hello.role, hello.pid, pid
                ),
            });
        }
        Ok(Session::new(Box::new(LocalProxy::new(pid, conn))))
    }

    pub fn attach_remote(&self, pid: ProcessId, host: &str) -> Result<Session> {
        let endpoint = Endpoint::Tcp(resolve_host(host, self.default_port));
        let mut conn = self.connection(endpoint.clone());
        let hello = handshake(&mut conn, pid)?;
        if hello.role != PeerRole::Control {
            return Err(Error::AttachFailed {
                pid,
                endpoint: endpoint.to_string(),
                cause: "peer is not a control service".to_string(),
            });
        }
        conn.call(methods::ATTACH, json!({ "pid": pid }))
            .map_err(|e| e.into_attach_failed(pid, &endpoint))?;
        Ok(Session::new(Box::new(RemoteProxy::new(pid, host, conn))))
    }

    /// Candidate processes on this host (or on `host`), with `attachable`
    /// set where an agent endpoint exists.
    pub fn list_processes(&self, host: Option<&str>) -> Result<Vec<ProcessDescriptor>> {
        match host {
            None => self.list_local(),
            Some(host) => self.list_remote(host),
        }
    }

    pub(crate) fn list_local(&self) -> Result<Vec<ProcessDescriptor>> {
        let processes = self
            .enumerator
            .list()
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        Ok(processes
            .into_iter()
            .map(|d| {
                let attachable = agent_socket_path(&self.agent_dir, d.process_id).exists();
                d.with_attachable(attachable)
            })
            .collect())
    }

    fn list_remote(&self, host: &str) -> Result<Vec<ProcessDescriptor>> {
        let endpoint = Endpoint::Tcp(resolve_host(host, self.default_port));
        let mut conn = self.connection(endpoint.clone());
        let result: ProcessesResult = conn
            .call_as(methods::LIST_PROCESSES, Value::Null)
            .map_err(|e| match e {
                RpcError::Remote(err) => Error::Protocol {
                    endpoint: endpoint.to_string(),
                    message: err.to_string(),
                },
                other => Error::Io(std::io::Error::other(format!(
                    "cannot reach {}: {}",
                    endpoint, other
                ))),
            })?;
        Ok(result.processes)
    }

    fn connection(&self, endpoint: Endpoint) -> RpcConnection {
        RpcConnection::new(endpoint, self.connect_timeout, self.rpc_timeout)
    }
}

/// Greet the peer and check it speaks our protocol version. Every failure
/// here, including an error answer, is an attach failure.
fn handshake(conn: &mut RpcConnection, pid: ProcessId) -> Result<HelloResult> {
    let endpoint = conn.endpoint().clone();
    let attach_failed = |cause: String| Error::AttachFailed {
        pid,
        endpoint: endpoint.to_string(),
        cause,
    };
    let hello: HelloResult = conn
        .call_as(
            methods::HELLO,
            json!({ "protocol_version": PROTOCOL_VERSION, "client": client_name() }),
        )
        .map_err(|e| attach_failed(format!("handshake failed: {}", e)))?;
    if hello.protocol_version != PROTOCOL_VERSION {
        return Err(attach_failed(format!(
            "protocol mismatch: peer speaks {}, client speaks {}",
            hello.protocol_version, PROTOCOL_VERSION
        )));
    }
    Ok(hello)
}

fn client_name() -> String {
    format!("cozctl/{}", env!("CARGO_PKG_VERSION"))
}

/// `host`, `host:port`, `[v6]`, `[v6]:port` or a bare IPv6 address, as a
/// connectable `host:port`.
pub fn resolve_host(host: &str, default_port: u16) -> String {
    let host = host.trim();
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((_, "")) => format!("{}:{}", host, default_port),
            _ => host.to_string(),
        };
    }
    match host.matches(':').count() {
        0 => format!("{}:{}", host, default_port),
        1 => host.to_string(),
        _ => format!("[{}]:{}", host, default_port),
    }
}
