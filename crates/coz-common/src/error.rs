//! Error taxonomy for the profiling client.
//!
//! Every error that reaches a caller is one of a small, stable set of kinds.
//! Transport failures are always wrapped with the process id, the endpoint
//! that was being talked to, and the underlying cause.
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Not Attached
//!   Reason: process with pid 4242 is not attached
//!   Fix: Attach to the process before configuring or profiling it.
//! ```
//!
//! # Agent-Facing Output
//!
//! ```json
//! {
//!   "code": 21,
//!   "category": "session",
//!   "message": "process with pid 4242 is not attached",
//!   "retryable": false,
//!   "context": { "pid": 4242 }
//! }
//! ```

use crate::id::ProcessId;
use crate::status::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for profiling client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Process discovery and attachment.
    Attach,
    /// Session lookup and lifecycle.
    Session,
    /// Target configuration rejected.
    Config,
    /// Target could not be reached mid-session.
    Transport,
    /// Persisted profile problems.
    Profile,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Attach => write!(f, "attach"),
            ErrorCategory::Session => write!(f, "session"),
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::Profile => write!(f, "profile"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for the profiling client.
#[derive(Error, Debug)]
pub enum Error {
    // Attach errors (10-19)
    #[error("process with pid {pid} not found")]
    ProcessNotFound { pid: ProcessId },

    #[error("failed to attach to process {pid} via {endpoint}: {cause}")]
    AttachFailed {
        pid: ProcessId,
        endpoint: String,
        cause: String,
    },

    // Session errors (20-29)
    #[error("process with pid {pid} is already attached")]
    AlreadyAttached { pid: ProcessId },

    #[error("process with pid {pid} is not attached")]
    NotAttached { pid: ProcessId },

    // Configuration errors (30-39)
    #[error("invalid configuration for process {pid}: {message}")]
    InvalidConfiguration {
        pid: ProcessId,
        message: String,
        status: Option<StatusCode>,
    },

    // Transport errors (40-49)
    #[error("target {pid} at {endpoint} unreachable: {cause}")]
    TargetUnreachable {
        pid: ProcessId,
        endpoint: String,
        cause: String,
    },

    #[error("protocol error talking to {endpoint}: {message}")]
    Protocol { endpoint: String, message: String },

    // Profile errors (50-59)
    #[error("failed to load profile {path}: {message}")]
    ProfileLoad { path: PathBuf, message: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the stable error code for this error type.
    ///
    /// - 10-19: attach
    /// - 20-29: session
    /// - 30-39: configuration
    /// - 40-49: transport
    /// - 50-59: profile
    /// - 60-69: I/O
    pub fn code(&self) -> u32 {
        match self {
            Error::ProcessNotFound { .. } => 10,
            Error::AttachFailed { .. } => 11,
            Error::AlreadyAttached { .. } => 20,
            Error::NotAttached { .. } => 21,
            Error::InvalidConfiguration { .. } => 30,
            Error::TargetUnreachable { .. } => 40,
            Error::Protocol { .. } => 41,
            Error::ProfileLoad { .. } => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ProcessNotFound { .. } | Error::AttachFailed { .. } => ErrorCategory::Attach,
            Error::AlreadyAttached { .. } | Error::NotAttached { .. } => ErrorCategory::Session,
            Error::InvalidConfiguration { .. } => ErrorCategory::Config,
            Error::TargetUnreachable { .. } | Error::Protocol { .. } => ErrorCategory::Transport,
            Error::ProfileLoad { .. } => ErrorCategory::Profile,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// True for failures of the channel to the target rather than of the
    /// request itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::AttachFailed { .. } | Error::TargetUnreachable { .. }
        )
    }

    /// Whether the caller may reasonably retry.
    ///
    /// Nothing in this crate retries on its own; this is advice for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::AttachFailed { .. } | Error::TargetUnreachable { .. } | Error::Io(_)
        )
    }

    /// The process this error concerns, when there is one.
    pub fn pid(&self) -> Option<ProcessId> {
        match self {
            Error::ProcessNotFound { pid }
            | Error::AttachFailed { pid, .. }
            | Error::AlreadyAttached { pid }
            | Error::NotAttached { pid }
            | Error::InvalidConfiguration { pid, .. }
            | Error::TargetUnreachable { pid, .. } => Some(*pid),
            _ => None,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::ProcessNotFound { .. } => {
                "Run 'cozctl list' to see candidate processes and check the pid."
            }
            Error::AttachFailed { .. } => {
                "Check that the profiling agent is loaded in the target (or the control service is running on the host) and retry."
            }
            Error::AlreadyAttached { .. } => {
                "A session for this process already exists. End it before attaching again."
            }
            Error::NotAttached { .. } => {
                "Attach to the process before configuring or profiling it."
            }
            Error::InvalidConfiguration { .. } => {
                "Check the progress point class and line and the scope prefix against the target's code."
            }
            Error::TargetUnreachable { .. } => {
                "The target stopped responding. Check that it is still running and reachable."
            }
            Error::Protocol { .. } => {
                "The peer speaks an incompatible protocol. Upgrade the agent or control service."
            }
            Error::ProfileLoad { .. } => {
                "The existing profile is unreadable. Point --existing-profile at a valid file or omit it."
            }
            Error::Io(_) => "Check disk space and permissions, then retry.",
            Error::Json(_) => "Invalid JSON. Inspect the file or message for corruption.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::ProcessNotFound { .. } => "Process Not Found",
            Error::AttachFailed { .. } => "Attach Failed",
            Error::AlreadyAttached { .. } => "Already Attached",
            Error::NotAttached { .. } => "Not Attached",
            Error::InvalidConfiguration { .. } => "Invalid Configuration",
            Error::TargetUnreachable { .. } => "Target Unreachable",
            Error::Protocol { .. } => "Protocol Error",
            Error::ProfileLoad { .. } => "Profile Load Error",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: u32,
    pub category: ErrorCategory,
    pub message: String,
    pub retryable: bool,
    pub remediation: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        if let Some(pid) = err.pid() {
            context.insert("pid".to_string(), serde_json::json!(pid));
        }
        match err {
            Error::AttachFailed { endpoint, cause, .. }
            | Error::TargetUnreachable { endpoint, cause, .. } => {
                context.insert("endpoint".to_string(), serde_json::json!(endpoint));
                context.insert("cause".to_string(), serde_json::json!(cause));
            }
            Error::InvalidConfiguration {
                status: Some(status),
                ..
            } => {
                context.insert("status".to_string(), serde_json::json!(status));
            }
            Error::ProfileLoad { path, .. } => {
                context.insert("path".to_string(), serde_json::json!(path));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            remediation: err.remediation().to_string(),
            context,
        }
    }
}

impl StructuredError {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}
