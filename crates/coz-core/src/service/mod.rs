//! Control service: exposes attach and the target capabilities of local
//! processes to clients on other hosts.
//!
//! One thread per client connection. Requests carry the target `pid`, which
//! is resolved in the service's session registry. Sessions attached over a
//! connection are ended and removed when that connection closes.

use crate::attach::AttachGateway;
use crate::logging::event_names;
use crate::rpc::protocol::*;
use crate::rpc::{serve_lines, SHUTDOWN_POLL};
use crate::session::SessionRegistry;
use coz_common::{Error, ProcessId, ProgressPoint, Scope};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, error, info, warn};

/// Handle to the running control service.
pub struct ControlService {
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
}

impl ControlService {
    /// Bind `addr` and serve on a background thread.
    pub fn bind(addr: &str, gateway: Arc<AttachGateway>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let addr = listener.local_addr()?;
        let registry = Arc::new(SessionRegistry::new());

        info!(target: event_names::SERVE_STARTED, addr = %addr, agent_dir = %gateway.agent_dir().display(), "control service started");

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let registry_clone = registry.clone();
        let thread = thread::Builder::new()
            .name("coz-serve".to_string())
            .spawn(move || accept_loop(listener, gateway, registry_clone, &shutdown_clone))?;

        Ok(ControlService {
            shutdown,
            thread: Some(thread),
            addr,
            registry,
        })
    }

    /// Get the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Block until `stop` is set, then shut down.
    pub fn serve_until(self, stop: impl Fn() -> bool) {
        while !stop() && !self.shutdown.load(Ordering::SeqCst) {
            thread::sleep(SHUTDOWN_POLL);
        }
        self.shutdown();
    }

    /// Shut down the service, ending every session it still holds.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Unblock the accept loop
        let _ = TcpStream::connect(self.addr);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        for pid in self.registry.process_ids() {
            let _ = self.registry.end_profiling(pid);
            self.registry.remove(pid);
        }
        info!(target: event_names::SERVE_STOPPED, addr = %self.addr, "control service stopped");
    }
}

impl Drop for ControlService {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    gateway: Arc<AttachGateway>,
    registry: Arc<SessionRegistry>,
    shutdown: &Arc<AtomicBool>,
) {
    let clients: Mutex<Vec<thread::JoinHandle<()>>> = Mutex::new(Vec::new());

    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "control service accept error");
                continue;
            }
        };
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        debug!(peer = %peer, "client connected");

        let handler = ServiceHandler::new(gateway.clone(), registry.clone());
        let shutdown = shutdown.clone();
        let spawned = thread::Builder::new()
            .name("coz-serve-conn".to_string())
            .spawn(move || {
                if let Err(e) = serve_client(stream, handler, &shutdown) {
                    debug!(peer = %peer, error = %e, "client connection ended with error");
                }
            });
        match spawned {
            Ok(handle) => {
                let mut clients = clients.lock().unwrap_or_else(|e| e.into_inner());
                clients.retain(|h| !h.is_finished());
                clients.push(handle);
            }
            Err(e) => error!(error = %e, "failed to spawn client thread"),
        }
    }

    let handles = std::mem::take(&mut *clients.lock().unwrap_or_else(|e| e.into_inner()));
    for handle in handles {
        let _ = handle.join();
    }
}

fn serve_client(
    stream: TcpStream,
    mut handler: ServiceHandler,
    shutdown: &AtomicBool,
) -> io::Result<()> {
    stream.set_read_timeout(Some(SHUTDOWN_POLL))?;
    let _ = stream.set_nodelay(true);
    let writer = stream.try_clone()?;
    let result = serve_lines(&stream, writer, shutdown, |raw| handler.handle_message(raw));
    handler.release_all();
    result
}

type HandlerResult = Result<Value, JsonRpcError>;

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, Error> {
    Ok(serde_json::to_value(value)?)
}

fn rpc_error((code, message): (i32, String)) -> JsonRpcError {
    JsonRpcError {
        code,
        message,
        data: None,
    }
}

/// Dispatches control protocol requests for one client connection.
pub(crate) struct ServiceHandler {
    gateway: Arc<AttachGateway>,
    registry: Arc<SessionRegistry>,
    /// Sessions attached through this connection.
    owned: BTreeSet<ProcessId>,
}

impl ServiceHandler {
    pub(crate) fn new(gateway: Arc<AttachGateway>, registry: Arc<SessionRegistry>) -> Self {
        ServiceHandler {
            gateway,
            registry,
            owned: BTreeSet::new(),
        }
    }

    /// Handle a single JSON-RPC message and return a response (or None for notifications).
    pub(crate) fn handle_message(&mut self, raw: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(raw) {
            Ok(req) => req,
            Err(_) => {
                return Some(JsonRpcResponse::error(
                    None,
                    PARSE_ERROR,
                    "Parse error: invalid JSON",
                ));
            }
        };

        if request.id.is_none() {
            debug!(method = %request.method, "control notification ignored");
            return None;
        }
        let id = request.id.clone();

        let result = match request.method.as_str() {
            methods::HELLO => self.handle_hello(),
            methods::LIST_PROCESSES => self.handle_list(),
            methods::ATTACH
            | methods::DETACH
            | methods::SET_PROGRESS_POINT
            | methods::SET_SCOPE
            | methods::START_PROFILING
            | methods::END_PROFILING
            | methods::GET_PROFILER_OUTPUT
            | methods::GET_CURRENT_SCOPE
            | methods::GET_PROGRESS_POINT => {
                self.handle_addressed(&request.method, &request.params)
            }
            _ => Err(rpc_error((
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ))),
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => JsonRpcResponse::failure(id, err),
        })
    }

    fn handle_hello(&self) -> HandlerResult {
        encode_result(&HelloResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            role: PeerRole::Control,
            pid: None,
            server: format!("cozctl-serve/{}", env!("CARGO_PKG_VERSION")),
        })
        .map_err(rpc_error)
    }

    fn handle_list(&self) -> HandlerResult {
        let processes = self
            .gateway
            .list_processes(None)
            .map_err(|e| error_to_rpc(&e))?;
        encode_result(&ProcessesResult { processes }).map_err(rpc_error)
    }

    /// Methods that name a target pid.
    fn handle_addressed(&mut self, method: &str, params: &Value) -> HandlerResult {
        let pid = param_pid(params).map_err(rpc_error)?;
        let outcome = match method {
            methods::ATTACH => self.attach(pid),
            methods::DETACH => Ok(self.detach(pid)),
            methods::SET_PROGRESS_POINT => {
                let point: ProgressPoint = parse_params(params).map_err(rpc_error)?;
                self.registry
                    .set_progress_point(pid, point)
                    .and_then(|status| to_json(StatusResult { status }))
            }
            methods::SET_SCOPE => {
                let ScopeParams { package_prefix } = parse_params(params).map_err(rpc_error)?;
                self.registry
                    .set_scope(pid, Scope::new(package_prefix))
                    .and_then(|status| to_json(StatusResult { status }))
            }
            methods::START_PROFILING => self
                .registry
                .start_profiling(pid)
                .and_then(|status| to_json(StatusResult { status })),
            methods::END_PROFILING => {
                let result = self.registry.end_profiling(pid);
                if !matches!(result, Err(Error::NotAttached { .. })) {
                    self.registry.remove(pid);
                    self.owned.remove(&pid);
                }
                result.and_then(|status| to_json(StatusResult { status }))
            }
            methods::GET_PROFILER_OUTPUT => self
                .registry
                .get_profiler_output(pid)
                .and_then(|experiments| to_json(ExperimentsResult { experiments })),
            methods::GET_CURRENT_SCOPE => self
                .registry
                .get_current_scope(pid)
                .and_then(|value| to_json(ValueResult { value })),
            methods::GET_PROGRESS_POINT => self
                .registry
                .get_progress_point(pid)
                .and_then(|value| to_json(ValueResult { value })),
            _ => {
                return Err(rpc_error((
                    METHOD_NOT_FOUND,
                    format!("Method not found: {}", method),
                )))
            }
        };
        outcome.map_err(|e| {
            debug!(pid = pid.0, method, error = %e, "request failed");
            error_to_rpc(&e)
        })
    }

    fn attach(&mut self, pid: ProcessId) -> Result<Value, Error> {
        let session = self.gateway.attach(pid, None)?;
        self.registry.register(session)?;
        self.owned.insert(pid);
        Ok(json!({ "attached": true, "pid": pid }))
    }

    fn detach(&mut self, pid: ProcessId) -> Value {
        let known = self.registry.contains(pid);
        if known {
            if let Err(e) = self.registry.end_profiling(pid) {
                warn!(pid = pid.0, error = %e, "end profiling on detach failed");
            }
            self.registry.remove(pid);
        }
        self.owned.remove(&pid);
        json!({ "detached": known })
    }

    /// The client went away: end and drop everything it attached.
    pub(crate) fn release_all(&mut self) {
        for pid in std::mem::take(&mut self.owned) {
            if self.registry.contains(pid) {
                info!(pid = pid.0, "client disconnected; releasing session");
                if let Err(e) = self.registry.end_profiling(pid) {
                    warn!(pid = pid.0, error = %e, "end profiling on release failed");
                }
                self.registry.remove(pid);
            }
        }
    }
}
