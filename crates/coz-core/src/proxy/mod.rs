//! Target capability proxies.
//!
//! A [`TargetProxy`] is the client's handle on the measurement engine of one
//! process. Lifecycle rules live in [`Session`](crate::session::Session);
//! proxies only move requests and answers.

mod local;
mod remote;

#[cfg(test)]
pub(crate) mod fake;

pub use local::LocalProxy;
pub use remote::RemoteProxy;

use crate::rpc::protocol::{ExperimentsResult, StatusResult, ValueResult};
use crate::rpc::RpcConnection;
use coz_common::{Experiment, ProcessId, ProgressPoint, Result, Scope, StatusCode, Transport};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

/// Operations the measurement engine of one process exposes.
///
/// Every call may fail with `TargetUnreachable` when the transport is
/// severed or times out.
pub trait TargetProxy: Send {
    fn set_progress_point(&mut self, point: &ProgressPoint) -> Result<StatusCode>;
    fn set_scope(&mut self, scope: &Scope) -> Result<StatusCode>;
    fn start_profiling(&mut self) -> Result<StatusCode>;
    fn end_profiling(&mut self) -> Result<StatusCode>;
    /// Take whatever the target has buffered; empty when nothing is ready.
    fn get_profiler_output(&mut self) -> Result<Vec<Experiment>>;
    fn get_current_scope(&mut self) -> Result<Option<String>>;
    fn get_progress_point(&mut self) -> Result<Option<String>>;

    fn pid(&self) -> ProcessId;
    fn transport(&self) -> Transport;
    /// Where requests go, for diagnostics.
    fn endpoint(&self) -> String;
}

/// Connection bound to one target pid, mapping transport failures to
/// `TargetUnreachable`.
pub(crate) struct TargetChannel {
    pid: ProcessId,
    conn: RpcConnection,
}

impl TargetChannel {
    pub(crate) fn new(pid: ProcessId, conn: RpcConnection) -> Self {
        TargetChannel { pid, conn }
    }

    pub(crate) fn pid(&self) -> ProcessId {
        self.pid
    }

    pub(crate) fn connection(&self) -> &RpcConnection {
        &self.conn
    }

    pub(crate) fn call<T: DeserializeOwned>(&mut self, method: &str, params: Value) -> Result<T> {
        self.conn
            .call_as(method, params)
            .map_err(|e| e.into_unreachable(self.pid, self.conn.endpoint()))
    }

    pub(crate) fn status(&mut self, method: &str, params: Value) -> Result<StatusCode> {
        Ok(self.call::<StatusResult>(method, params)?.status)
    }

    /// Experiments drained by earlier timed-out calls come first, so arrival
    /// order is kept. They stay queued while calls keep failing.
    pub(crate) fn experiments(&mut self, method: &str, params: Value) -> Result<Vec<Experiment>> {
        let fresh = self.call::<ExperimentsResult>(method, params)?.experiments;
        let mut batch = Vec::new();
        for value in self.conn.take_late(method) {
            match serde_json::from_value::<ExperimentsResult>(value) {
                Ok(late) => batch.extend(late.experiments),
                Err(e) => warn!(pid = self.pid.0, error = %e, "dropping malformed late result"),
            }
        }
        if !batch.is_empty() {
            debug!(pid = self.pid.0, count = batch.len(), "recovered late experiments");
        }
        batch.extend(fresh);
        Ok(batch)
    }

    pub(crate) fn value(&mut self, method: &str, params: Value) -> Result<Option<String>> {
        Ok(self.call::<ValueResult>(method, params)?.value)
    }
}
