//! Polling driver: pulls experiment batches from a profiling session into
//! a profile until told to stop, then drains.
//!
//! ```text
//! Idle -> Running -> Draining -> Stopped
//! ```
//!
//! Draining runs exactly once per driver: a final fetch (after an explicit
//! stop only), `end_profiling`, persist, and removal of the session from
//! the registry.

mod cancel;
mod guard;

pub use cancel::{install_signal_handlers, signal_received, CancelToken};
pub use guard::ProfilingGuard;

use crate::logging::event_names;
use crate::session::{SessionRegistry, SessionState};
use coz_common::{Error, Experiment, ProcessId, Result, StatusCode};
use coz_profile::Profile;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Consecutive `TargetUnreachable` fetches after which the target is
/// presumed dead.
pub const UNREACHABLE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Idle,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit stop, signal, or the guard going out of scope.
    Cancelled,
    /// The target stopped answering.
    TargetLost,
    /// A fetch failed in a way that is not worth retrying.
    FetchFailed,
}

/// What happened during one run.
#[derive(Debug, Clone, Serialize)]
pub struct DriveReport {
    pub pid: ProcessId,
    pub stop_reason: StopReason,
    /// Non-empty batches merged.
    pub batches: u64,
    pub experiments_merged: u64,
    /// Experiments in the profile, including any loaded from disk.
    pub total_experiments: usize,
    pub final_state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_status: Option<StatusCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted_to: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
}

pub struct PollingDriver {
    cadence: Duration,
    output: Option<PathBuf>,
    checkpoint: bool,
    state: DriverState,
    batches: u64,
    merged: u64,
    last_error: Option<String>,
    report: Option<DriveReport>,
}

impl PollingDriver {
    pub fn new(cadence: Duration) -> Self {
        PollingDriver {
            cadence,
            output: None,
            checkpoint: false,
            state: DriverState::Idle,
            batches: 0,
            merged: 0,
            last_error: None,
            report: None,
        }
    }

    /// Persist the profile here when draining.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Also persist after every non-empty batch.
    pub fn with_checkpoint(mut self, checkpoint: bool) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == DriverState::Stopped
    }

    /// Poll until cancelled or the target fails, then drain.
    ///
    /// Fails only if the session is not registered when the run begins.
    pub fn run(
        &mut self,
        registry: &SessionRegistry,
        pid: ProcessId,
        profile: &mut Profile,
        cancel: &CancelToken,
    ) -> Result<DriveReport> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }
        registry.get(pid)?;
        self.state = DriverState::Running;
        info!(target: event_names::RUN_STARTED, pid = pid.0, cadence_ms = u64::try_from(self.cadence.as_millis()).unwrap_or(u64::MAX), "polling started");

        let mut unreachable = 0u32;
        let reason = loop {
            if cancel.wait(self.cadence) {
                break StopReason::Cancelled;
            }
            match registry.get_profiler_output(pid) {
                Ok(batch) => {
                    unreachable = 0;
                    self.merge(profile, batch);
                }
                Err(e @ Error::TargetUnreachable { .. }) => {
                    unreachable += 1;
                    warn!(
                        target: event_names::POLL_UNREACHABLE,
                        pid = pid.0,
                        attempt = unreachable,
                        error = %e,
                        "fetch failed"
                    );
                    self.last_error = Some(e.to_string());
                    if unreachable >= UNREACHABLE_THRESHOLD {
                        break StopReason::TargetLost;
                    }
                }
                Err(e) => {
                    error!(target: event_names::POLL_FAILED, pid = pid.0, error = %e, "fetch failed");
                    self.last_error = Some(e.to_string());
                    break StopReason::FetchFailed;
                }
            }
        };

        Ok(self.drain(registry, pid, profile, reason))
    }

    fn merge(&mut self, profile: &mut Profile, batch: Vec<Experiment>) {
        if batch.is_empty() {
            return;
        }
        let added = profile.merge(batch);
        self.batches += 1;
        self.merged += added as u64;
        info!(
            target: event_names::POLL_BATCH,
            experiments = added as u64,
            total = profile.len() as u64,
            "merged batch"
        );
        if self.checkpoint {
            if let Some(path) = &self.output {
                if let Err(e) = coz_profile::persist(profile, path) {
                    warn!(path = %path.display(), error = %e, "checkpoint failed");
                }
            }
        }
    }

    /// Stop profiling and flush. Runs once; later calls return the first
    /// report.
    pub fn drain(
        &mut self,
        registry: &SessionRegistry,
        pid: ProcessId,
        profile: &mut Profile,
        reason: StopReason,
    ) -> DriveReport {
        if let Some(report) = &self.report {
            return report.clone();
        }
        self.state = DriverState::Draining;
        info!(target: event_names::DRAIN_STARTED, pid = pid.0, reason = ?reason, "draining");

        // A failing target is not asked again.
        if reason == StopReason::Cancelled {
            match registry.get_profiler_output(pid) {
                Ok(batch) => self.merge(profile, batch),
                Err(e) => warn!(pid = pid.0, error = %e, "final fetch failed"),
            }
        }

        let end_status = match registry.end_profiling(pid) {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(pid = pid.0, error = %e, "end profiling failed");
                None
            }
        };
        let final_state = registry.state(pid).unwrap_or(SessionState::Ended);

        let (persisted_to, persist_error) = match &self.output {
            Some(path) => match coz_profile::persist(profile, path) {
                Ok(()) => (Some(path.clone()), None),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "failed to persist profile");
                    (None, Some(e.to_string()))
                }
            },
            None => (None, None),
        };

        registry.remove(pid);
        self.state = DriverState::Stopped;

        let report = DriveReport {
            pid,
            stop_reason: reason,
            batches: self.batches,
            experiments_merged: self.merged,
            total_experiments: profile.len(),
            final_state,
            end_status,
            last_error: self.last_error.clone(),
            persisted_to,
            persist_error,
        };
        info!(
            target: event_names::DRAIN_FINISHED,
            pid = pid.0,
            reason = ?reason,
            experiments = profile.len() as u64,
            "drained"
        );
        self.report = Some(report.clone());
        report
    }
}
