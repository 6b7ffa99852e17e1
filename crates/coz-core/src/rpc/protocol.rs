//! JSON-RPC 2.0 message types and the profiling method surface.
//!
//! Messages are newline-delimited JSON objects. The same method names are
//! served by the agent endpoint inside a profiled process (addressed
//! implicitly) and by the control service (addressed by `pid`).

use coz_common::{Error, Experiment, ProcessDescriptor, ProcessId, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire protocol version exchanged in `hello`.
pub const PROTOCOL_VERSION: &str = "1";

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::from(id)),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// Application error codes, one per error kind
pub const NOT_ATTACHED: i32 = -32001;
pub const ALREADY_ATTACHED: i32 = -32002;
pub const PROCESS_NOT_FOUND: i32 = -32003;
pub const ATTACH_FAILED: i32 = -32004;
pub const INVALID_CONFIGURATION: i32 = -32005;
pub const TARGET_UNREACHABLE: i32 = -32006;
pub const PROTOCOL_MISMATCH: i32 = -32007;

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self::failure(
            id,
            JsonRpcError {
                code,
                message: message.into(),
                data: None,
            },
        )
    }

    pub fn failure(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Method names.
pub mod methods {
    pub const HELLO: &str = "hello";
    pub const LIST_PROCESSES: &str = "listProcesses";
    pub const ATTACH: &str = "attach";
    pub const DETACH: &str = "detach";
    pub const SET_PROGRESS_POINT: &str = "setProgressPoint";
    pub const SET_SCOPE: &str = "setScope";
    pub const START_PROFILING: &str = "startProfiling";
    pub const END_PROFILING: &str = "endProfiling";
    pub const GET_PROFILER_OUTPUT: &str = "getProfilerOutput";
    pub const GET_CURRENT_SCOPE: &str = "getCurrentScope";
    pub const GET_PROGRESS_POINT: &str = "getProgressPoint";
}

/// Which side of the protocol answered `hello`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    /// Agent endpoint embedded in one profiled process.
    Agent,
    /// Control service fronting every process on a host.
    Control,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResult {
    pub protocol_version: String,
    pub role: PeerRole,
    /// Process served by an agent endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<ProcessId>,
    pub server: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub status: StatusCode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentsResult {
    pub experiments: Vec<Experiment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueResult {
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessesResult {
    pub processes: Vec<ProcessDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeParams {
    pub package_prefix: String,
}

/// Encode a handler result, mapping failure to `INTERNAL_ERROR`.
pub fn encode_result<T: Serialize>(value: &T) -> Result<Value, (i32, String)> {
    serde_json::to_value(value)
        .map_err(|e| (INTERNAL_ERROR, format!("Result encoding failed: {}", e)))
}

/// Read the `pid` parameter of a control-service call.
pub fn param_pid(params: &Value) -> Result<ProcessId, (i32, String)> {
    params
        .get("pid")
        .and_then(Value::as_u64)
        .and_then(|p| u32::try_from(p).ok())
        .map(ProcessId)
        .ok_or((INVALID_PARAMS, "Missing or invalid 'pid'".to_string()))
}

/// Decode typed params, mapping failure to `INVALID_PARAMS`.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: &Value) -> Result<T, (i32, String)> {
    serde_json::from_value(params.clone())
        .map_err(|e| (INVALID_PARAMS, format!("Invalid params: {}", e)))
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Encode an error for the wire, keeping its structured context in `data`.
pub fn error_to_rpc(err: &Error) -> JsonRpcError {
    let mut data = serde_json::Map::new();
    if let Some(pid) = err.pid() {
        data.insert("pid".to_string(), serde_json::json!(pid));
    }
    let code = match err {
        Error::NotAttached { .. } => NOT_ATTACHED,
        Error::AlreadyAttached { .. } => ALREADY_ATTACHED,
        Error::ProcessNotFound { .. } => PROCESS_NOT_FOUND,
        Error::AttachFailed { endpoint, cause, .. } => {
            data.insert("endpoint".to_string(), serde_json::json!(endpoint));
            data.insert("cause".to_string(), serde_json::json!(cause));
            ATTACH_FAILED
        }
        Error::InvalidConfiguration {
            status, message, ..
        } => {
            data.insert("status".to_string(), serde_json::json!(status));
            data.insert("detail".to_string(), serde_json::json!(message));
            INVALID_CONFIGURATION
        }
        Error::TargetUnreachable { endpoint, cause, .. } => {
            data.insert("endpoint".to_string(), serde_json::json!(endpoint));
            data.insert("cause".to_string(), serde_json::json!(cause));
            TARGET_UNREACHABLE
        }
        Error::Protocol { .. } => PROTOCOL_MISMATCH,
        Error::ProfileLoad { .. } | Error::Io(_) | Error::Json(_) => INTERNAL_ERROR,
    };
    JsonRpcError {
        code,
        message: err.to_string(),
        data: if data.is_empty() {
            None
        } else {
            Some(Value::Object(data))
        },
    }
}

/// Rebuild a typed error from a wire error received from `endpoint`.
///
/// `pid` is used when the peer did not report one.
pub fn error_from_rpc(err: JsonRpcError, pid: ProcessId, endpoint: &str) -> Error {
    let data = err.data.clone().unwrap_or(Value::Null);
    let pid = data
        .get("pid")
        .and_then(Value::as_u64)
        .and_then(|p| u32::try_from(p).ok())
        .map(ProcessId)
        .unwrap_or(pid);
    let text = |key: &str| {
        data.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    // The peer's endpoint detail is appended so the hop that failed is visible.
    let via = |inner: Option<String>| match inner {
        Some(inner) if inner != endpoint => format!("{} -> {}", endpoint, inner),
        _ => endpoint.to_string(),
    };

    match err.code {
        NOT_ATTACHED => Error::NotAttached { pid },
        ALREADY_ATTACHED => Error::AlreadyAttached { pid },
        PROCESS_NOT_FOUND => Error::ProcessNotFound { pid },
        ATTACH_FAILED => Error::AttachFailed {
            pid,
            endpoint: via(text("endpoint")),
            cause: text("cause").unwrap_or(err.message),
        },
        INVALID_CONFIGURATION => Error::InvalidConfiguration {
            pid,
            message: text("detail").unwrap_or(err.message),
            status: data
                .get("status")
                .and_then(Value::as_i64)
                .and_then(|s| i32::try_from(s).ok())
                .map(StatusCode),
        },
        TARGET_UNREACHABLE => Error::TargetUnreachable {
            pid,
            endpoint: via(text("endpoint")),
            cause: text("cause").unwrap_or(err.message),
        },
        _ => Error::Protocol {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        },
    }
}
