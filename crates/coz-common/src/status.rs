//! Integer status codes returned by the profiling agent.
//!
//! Zero means success. Non-zero codes are decided by the target and carried
//! back verbatim; the constants below name the ones the agent is known to
//! emit.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0);
    pub const NO_PROGRESS_POINT: StatusCode = StatusCode(1);
    pub const NO_SCOPE: StatusCode = StatusCode(2);
    pub const NOT_PROFILING: StatusCode = StatusCode(3);
    pub const ALREADY_PROFILING: StatusCode = StatusCode(4);
    pub const INVALID_PROCESS: StatusCode = StatusCode(5);
    pub const UNRESOLVED_LOCATION: StatusCode = StatusCode(6);

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Short symbolic name for logs.
    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "ok",
            1 => "no_progress_point",
            2 => "no_scope",
            3 => "not_profiling",
            4 => "already_profiling",
            5 => "invalid_process",
            6 => "unresolved_location",
            _ => "unknown",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

impl From<i32> for StatusCode {
    fn from(code: i32) -> Self {
        StatusCode(code)
    }
}
