//! Proxy for a process on this host, through its agent socket.

use super::{TargetChannel, TargetProxy};
use crate::rpc::protocol::methods;
use crate::rpc::RpcConnection;
use coz_common::{Experiment, ProcessId, ProgressPoint, Result, Scope, StatusCode, Transport};
use serde_json::{json, Value};

pub struct LocalProxy {
    channel: TargetChannel,
}

impl LocalProxy {
    /// Wrap a connection to the agent endpoint of `pid`, usually the one the
    /// handshake was done on.
    pub fn new(pid: ProcessId, conn: RpcConnection) -> Self {
        LocalProxy {
            channel: TargetChannel::new(pid, conn),
        }
    }
}

impl TargetProxy for LocalProxy {
    fn set_progress_point(&mut self, point: &ProgressPoint) -> Result<StatusCode> {
        self.channel.status(
            methods::SET_PROGRESS_POINT,
            json!({"class_name": point.class_name, "line_number": point.line_number}),
        )
    }

    fn set_scope(&mut self, scope: &Scope) -> Result<StatusCode> {
        self.channel.status(
            methods::SET_SCOPE,
            json!({"package_prefix": scope.package_prefix}),
        )
    }

    fn start_profiling(&mut self) -> Result<StatusCode> {
        self.channel.status(methods::START_PROFILING, Value::Null)
    }

    fn end_profiling(&mut self) -> Result<StatusCode> {
        self.channel.status(methods::END_PROFILING, Value::Null)
    }

    fn get_profiler_output(&mut self) -> Result<Vec<Experiment>> {
        self.channel.experiments(methods::GET_PROFILER_OUTPUT, Value::Null)
    }

    fn get_current_scope(&mut self) -> Result<Option<String>> {
        self.channel.value(methods::GET_CURRENT_SCOPE, Value::Null)
    }

    fn get_progress_point(&mut self) -> Result<Option<String>> {
        self.channel.value(methods::GET_PROGRESS_POINT, Value::Null)
    }

    fn pid(&self) -> ProcessId {
        self.channel.pid()
    }

    fn transport(&self) -> Transport {
        Transport::Local
    }

    fn endpoint(&self) -> String {
        self.channel.connection().endpoint().to_string()
    }
}
