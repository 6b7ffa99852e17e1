//! Proxy for a process on another host, through its control service.

use super::{TargetChannel, TargetProxy};
use crate::rpc::protocol::methods;
use crate::rpc::RpcConnection;
use coz_common::{Experiment, ProcessId, ProgressPoint, Result, Scope, StatusCode, Transport};
use serde_json::{json, Value};
use tracing::debug;

/// Every request carries the target pid; the service resolves it in its own
/// session registry.
pub struct RemoteProxy {
    channel: TargetChannel,
    host: String,
}

impl RemoteProxy {
    /// Wrap a connection on which `attach` for `pid` already succeeded.
    pub fn new(pid: ProcessId, host: impl Into<String>, conn: RpcConnection) -> Self {
        RemoteProxy {
            channel: TargetChannel::new(pid, conn),
            host: host.into(),
        }
    }

    fn addressed(&self, params: Value) -> Value {
        let mut map = match params {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        map.insert("pid".to_string(), json!(self.channel.pid()));
        Value::Object(map)
    }
}

impl TargetProxy for RemoteProxy {
    fn set_progress_point(&mut self, point: &ProgressPoint) -> Result<StatusCode> {
        let params = self.addressed(
            json!({"class_name": point.class_name, "line_number": point.line_number}),
        );
        self.channel.status(methods::SET_PROGRESS_POINT, params)
    }

    fn set_scope(&mut self, scope: &Scope) -> Result<StatusCode> {
        let params = self.addressed(json!({"package_prefix": scope.package_prefix}));
        self.channel.status(methods::SET_SCOPE, params)
    }

    fn start_profiling(&mut self) -> Result<StatusCode> {
        let params = self.addressed(Value::Null);
        self.channel.status(methods::START_PROFILING, params)
    }

    fn end_profiling(&mut self) -> Result<StatusCode> {
        let params = self.addressed(Value::Null);
        self.channel.status(methods::END_PROFILING, params)
    }

    fn get_profiler_output(&mut self) -> Result<Vec<Experiment>> {
        let params = self.addressed(Value::Null);
        self.channel.experiments(methods::GET_PROFILER_OUTPUT, params)
    }

    fn get_current_scope(&mut self) -> Result<Option<String>> {
        let params = self.addressed(Value::Null);
        self.channel.value(methods::GET_CURRENT_SCOPE, params)
    }

    fn get_progress_point(&mut self) -> Result<Option<String>> {
        let params = self.addressed(Value::Null);
        self.channel.value(methods::GET_PROGRESS_POINT, params)
    }

    fn pid(&self) -> ProcessId {
        self.channel.pid()
    }

    fn transport(&self) -> Transport {
        Transport::Remote {
            host: self.host.clone(),
        }
    }

    fn endpoint(&self) -> String {
        self.channel.connection().endpoint().to_string()
    }
}

impl Drop for RemoteProxy {
    fn drop(&mut self) {
        // Release the service-side session; skipped when the link is already down.
        if self.channel.connection().is_connected() {
            let params = self.addressed(Value::Null);
            if let Err(e) = self.channel.call::<Value>(methods::DETACH, params) {
                debug!(pid = self.channel.pid().0, error = %e, "detach failed");
            }
        }
    }
}
