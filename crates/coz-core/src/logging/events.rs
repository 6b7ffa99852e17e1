//! Event vocabulary shared by every log line.
//!
//! Every event carries the run correlation id, the host, and the lifecycle
//! stage it belongs to. Events about one target also carry its pid. The
//! event name is the tracing target, so `RUST_LOG=poll=debug` style filters
//! select whole families.

use serde::{Deserialize, Serialize};

/// Severity as written to JSONL output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Lifecycle stages of a profiling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Process enumeration.
    Discover,
    Attach,
    /// Setting progress point and scope.
    Configure,
    /// Profiling running, experiments being pulled.
    Poll,
    /// Stopping profiling and flushing.
    Drain,
    /// Control service handling remote clients.
    Serve,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Discover => "discover",
            Stage::Attach => "attach",
            Stage::Configure => "configure",
            Stage::Poll => "poll",
            Stage::Drain => "drain",
            Stage::Serve => "serve",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event names, used as tracing targets.
pub mod event_names {
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";
    pub const CONFIG_ERROR: &str = "config.error";

    pub const ATTACH_STARTED: &str = "attach.started";
    pub const ATTACH_SUCCEEDED: &str = "attach.succeeded";
    pub const ATTACH_FAILED: &str = "attach.failed";

    pub const CONFIGURE_PROGRESS_POINT: &str = "configure.progress_point";
    pub const CONFIGURE_SCOPE: &str = "configure.scope";
    pub const CONFIGURE_REJECTED: &str = "configure.rejected";

    pub const PROFILE_STARTED: &str = "profile.started";
    pub const PROFILE_LOADED: &str = "profile.loaded";

    pub const POLL_BATCH: &str = "poll.batch";
    pub const POLL_UNREACHABLE: &str = "poll.unreachable";
    pub const POLL_FAILED: &str = "poll.failed";

    pub const DRAIN_STARTED: &str = "drain.started";
    pub const DRAIN_FINISHED: &str = "drain.finished";

    pub const SERVE_STARTED: &str = "serve.started";
    pub const SERVE_STOPPED: &str = "serve.stopped";

    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Correlation fields attached to every event of one command run.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub run_id: String,
    pub host_id: String,
    pub pid: Option<u32>,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            host_id: host_id.into(),
            pid: None,
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }
}
