//! Unix-socket server exposing a [`ProfilerBackend`].

use super::{agent_socket_path, ProfilerBackend};
use crate::rpc::protocol::*;
use crate::rpc::{serve_lines, SHUTDOWN_POLL};
use coz_common::{ProcessId, ProgressPoint, Scope};
use serde_json::Value;
use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, error, info, warn};

/// Handle to a running agent endpoint.
///
/// Dropping the handle stops accepting, closes client connections and
/// removes the socket file.
pub struct AgentServer {
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    path: PathBuf,
    pid: ProcessId,
}

impl AgentServer {
    /// Bind `<dir>/coz-agent-<pid>.sock` and serve `backend` on a
    /// background thread.
    pub fn start(
        dir: &Path,
        pid: ProcessId,
        backend: Arc<dyn ProfilerBackend>,
    ) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = agent_socket_path(dir, pid);
        // A socket left behind by a previous run of this pid refuses
        // connections; replace it.
        if path.exists() && UnixStream::connect(&path).is_err() {
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;

        info!(pid = pid.0, socket = %path.display(), "agent endpoint started");

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let thread = thread::Builder::new()
            .name("coz-agent".to_string())
            .spawn(move || accept_loop(listener, backend, pid, &shutdown_clone))?;

        Ok(AgentServer {
            shutdown,
            thread: Some(thread),
            path,
            pid,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Stop the endpoint and wait for its threads.
    pub fn shutdown(mut self) {
        self.stop();
        info!(pid = self.pid.0, "agent endpoint stopped");
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Unblock the accept loop
        let _ = UnixStream::connect(&self.path);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for AgentServer {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

fn accept_loop(
    listener: UnixListener,
    backend: Arc<dyn ProfilerBackend>,
    pid: ProcessId,
    shutdown: &Arc<AtomicBool>,
) {
    let clients: Arc<Mutex<Vec<thread::JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "agent accept error");
                continue;
            }
        };

        let backend = backend.clone();
        let shutdown = shutdown.clone();
        let spawned = thread::Builder::new()
            .name("coz-agent-conn".to_string())
            .spawn(move || {
                if let Err(e) = serve_client(stream, backend, pid, &shutdown) {
                    debug!(error = %e, "agent client connection ended with error");
                }
            });
        match spawned {
            Ok(handle) => {
                let mut clients = clients.lock().unwrap_or_else(|e| e.into_inner());
                clients.retain(|h| !h.is_finished());
                clients.push(handle);
            }
            Err(e) => error!(error = %e, "failed to spawn agent connection thread"),
        }
    }

    let handles = std::mem::take(&mut *clients.lock().unwrap_or_else(|e| e.into_inner()));
    for handle in handles {
        let _ = handle.join();
    }
}

fn serve_client(
    stream: UnixStream,
    backend: Arc<dyn ProfilerBackend>,
    pid: ProcessId,
    shutdown: &AtomicBool,
) -> io::Result<()> {
    stream.set_read_timeout(Some(SHUTDOWN_POLL))?;
    let writer = stream.try_clone()?;
    let mut handler = AgentHandler::new(backend, pid);
    let result = serve_lines(&stream, writer, shutdown, |raw| handler.handle_message(raw));
    handler.abandon();
    result
}

/// Dispatches agent protocol requests for one client connection.
pub(crate) struct AgentHandler {
    backend: Arc<dyn ProfilerBackend>,
    pid: ProcessId,
    /// This client started profiling and has not ended it.
    profiling: bool,
}

impl AgentHandler {
    pub(crate) fn new(backend: Arc<dyn ProfilerBackend>, pid: ProcessId) -> Self {
        AgentHandler {
            backend,
            pid,
            profiling: false,
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
            debug!(method = %request.method, "agent notification ignored");
            return None;
        }
        let id = request.id.clone();

        let result = match request.method.as_str() {
            methods::HELLO => self.handle_hello(),
            methods::SET_PROGRESS_POINT => self.handle_set_progress_point(&request.params),
            methods::SET_SCOPE => self.handle_set_scope(&request.params),
            methods::START_PROFILING => self.handle_start(),
            methods::END_PROFILING => self.handle_end(),
            methods::GET_PROFILER_OUTPUT => self.handle_output(),
            methods::GET_CURRENT_SCOPE => encode_result(&ValueResult {
                value: self.backend.current_scope().map(|s| s.package_prefix),
            }),
            methods::GET_PROGRESS_POINT => encode_result(&ValueResult {
                value: self.backend.progress_point().map(|p| p.to_string()),
            }),
            _ => Err((METHOD_NOT_FOUND, format!("Method not found: {}", request.method))),
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err((code, msg)) => JsonRpcResponse::error(id, code, msg),
        })
    }

    fn handle_hello(&self) -> Result<Value, (i32, String)> {
        encode_result(&HelloResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            role: PeerRole::Agent,
            pid: Some(self.pid),
            server: format!("coz-agent/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    fn handle_set_progress_point(&self, params: &Value) -> Result<Value, (i32, String)> {
        let point: ProgressPoint = parse_params(params)?;
        let status = self.backend.set_progress_point(&point);
        debug!(pid = self.pid.0, point = %point, status = %status, "setProgressPoint");
        encode_result(&StatusResult { status })
    }

    fn handle_set_scope(&self, params: &Value) -> Result<Value, (i32, String)> {
        let ScopeParams { package_prefix } = parse_params(params)?;
        let status = self.backend.set_scope(&Scope::new(package_prefix));
        debug!(pid = self.pid.0, status = %status, "setScope");
        encode_result(&StatusResult { status })
    }

    fn handle_start(&mut self) -> Result<Value, (i32, String)> {
        let status = self.backend.start_profiling();
        if status.is_ok() {
            self.profiling = true;
        }
        info!(pid = self.pid.0, status = %status, "startProfiling");
        encode_result(&StatusResult { status })
    }

    fn handle_end(&mut self) -> Result<Value, (i32, String)> {
        let status = self.backend.end_profiling();
        self.profiling = false;
        info!(pid = self.pid.0, status = %status, "endProfiling");
        encode_result(&StatusResult { status })
    }

    fn handle_output(&self) -> Result<Value, (i32, String)> {
        let experiments = self.backend.drain_experiments();
        if !experiments.is_empty() {
            debug!(pid = self.pid.0, count = experiments.len(), "getProfilerOutput");
        }
        encode_result(&ExperimentsResult { experiments })
    }

    /// The client went away: stop anything it left running.
    pub(crate) fn abandon(&mut self) {
        if self.profiling {
            warn!(pid = self.pid.0, "client disconnected while profiling; ending profiling");
            self.backend.end_profiling();
            self.profiling = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::BufferedBackend;
    use serde_json::json;

    fn handler() -> (AgentHandler, Arc<BufferedBackend>) {
        let backend = Arc::new(BufferedBackend::new());
        (AgentHandler::new(backend.clone(), ProcessId(4242)), backend)
    }

    fn call(h: &mut AgentHandler, method: &str, params: Value) -> Value {
        let raw = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
        let resp = h.handle_message(&raw.to_string()).unwrap();
        serde_json::to_value(resp).unwrap()
    }

    #[test]
    fn hello_names_the_process() {
        let (mut h, _) = handler();
        let resp = call(&mut h, "hello", Value::Null);
        assert_eq!(resp["result"]["protocol_version"], PROTOCOL_VERSION);
        assert_eq!(resp["result"]["role"], "agent");
        assert_eq!(resp["result"]["pid"], 4242);
    }

    #[test]
    fn configure_and_start() {
        let (mut h, backend) = handler();
        let resp = call(
            &mut h,
            "setProgressPoint",
            json!({"class_name": "Foo.java", "line_number": 12}),
        );
        assert_eq!(resp["result"]["status"], 0);
        let resp = call(&mut h, "setScope", json!({"package_prefix": "com.example"}));
        assert_eq!(resp["result"]["status"], 0);
        let resp = call(&mut h, "startProfiling", Value::Null);
        assert_eq!(resp["result"]["status"], 0);
        assert!(backend.is_profiling());

        let resp = call(&mut h, "getProgressPoint", Value::Null);
        assert_eq!(resp["result"]["value"], "Foo.java:12");
        let resp = call(&mut h, "getCurrentScope", Value::Null);
        assert_eq!(resp["result"]["value"], "com.example");
    }

    #[test]
    fn bad_params_and_unknown_methods() {
        let (mut h, _) = handler();
        let resp = call(&mut h, "setProgressPoint", json!({"class_name": "Foo.java"}));
        assert_eq!(resp["error"]["code"], INVALID_PARAMS);
        let resp = call(&mut h, "attach", json!({"pid": 1}));
        assert_eq!(resp["error"]["code"], METHOD_NOT_FOUND);
        let resp = h.handle_message("{not json").unwrap();
        assert_eq!(resp.error.unwrap().code, PARSE_ERROR);
    }

    #[test]
    fn unset_introspection_is_null() {
        let (mut h, _) = handler();
        let resp = call(&mut h, "getCurrentScope", Value::Null);
        assert_eq!(resp["result"]["value"], Value::Null);
    }

    #[test]
    fn abandoned_client_stops_profiling() {
        let (mut h, backend) = handler();
        call(&mut h, "setProgressPoint", json!({"class_name": "Foo.java", "line_number": 12}));
        call(&mut h, "startProfiling", Value::Null);
        h.abandon();
        assert!(!backend.is_profiling());
        assert_eq!(backend.stats().end_calls, 1);
    }
}
