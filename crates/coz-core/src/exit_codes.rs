//! Exit codes for the cozctl CLI.
//!
//! Exit code ranges:
//! - 0-6: Operational outcomes
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal errors

use coz_common::Error;

/// Exit codes for cozctl operations.
///
/// These codes are a stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-6)
    // ========================================================================
    /// Success: profiling stopped on request and the profile was flushed
    Clean = 0,

    /// Target stopped responding; profiling was abandoned and flushed
    TargetLost = 6,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments or configuration file
    ArgsError = 10,

    /// No such process
    ProcessNotFound = 11,

    /// Could not attach to the process
    AttachError = 12,

    /// Target rejected the progress point or scope
    TargetConfigError = 13,

    /// Session already exists or is missing
    SessionError = 15,

    /// Existing profile could not be loaded
    ProfileLoadError = 17,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O error
    IoError = 21,

    /// Target or service timed out
    TimeoutError = 22,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Clean
    }

    /// Check if this exit code is a user/environment error (codes 10-19).
    pub fn is_user_error(self) -> bool {
        let code = self as i32;
        (10..20).contains(&code)
    }

    /// Check if this exit code is an internal error (codes 20-29).
    pub fn is_internal_error(self) -> bool {
        let code = self as i32;
        code >= 20
    }

    /// Get the error code name as a string constant (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::TargetLost => "ERR_TARGET_LOST",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ProcessNotFound => "ERR_PROCESS_NOT_FOUND",
            ExitCode::AttachError => "ERR_ATTACH",
            ExitCode::TargetConfigError => "ERR_TARGET_CONFIG",
            ExitCode::SessionError => "ERR_SESSION",
            ExitCode::ProfileLoadError => "ERR_PROFILE_LOAD",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
            ExitCode::TimeoutError => "ERR_TIMEOUT",
        }
    }

    /// Exit code for an error that aborted a command.
    pub fn for_error(err: &Error) -> ExitCode {
        match err {
            Error::ProcessNotFound { .. } => ExitCode::ProcessNotFound,
            Error::AttachFailed { .. } => ExitCode::AttachError,
            Error::AlreadyAttached { .. } | Error::NotAttached { .. } => ExitCode::SessionError,
            Error::InvalidConfiguration { .. } => ExitCode::TargetConfigError,
            Error::TargetUnreachable { .. } => ExitCode::TimeoutError,
            Error::Protocol { .. } => ExitCode::InternalError,
            Error::ProfileLoad { .. } => ExitCode::ProfileLoadError,
            Error::Io(_) | Error::Json(_) => ExitCode::IoError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
