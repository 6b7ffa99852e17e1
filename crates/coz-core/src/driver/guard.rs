//! Scoped ownership of a running profiling session.

use super::{CancelToken, DriveReport, PollingDriver, StopReason};
use crate::session::SessionRegistry;
use coz_common::{ProcessId, Result};
use coz_profile::Profile;
use std::sync::Arc;
use tracing::warn;

/// Owns a profiling session from `start_profiling` until it is drained.
///
/// Dropping the guard before the driver has drained (early return, error,
/// panic unwinding) stops profiling and flushes the profile.
pub struct ProfilingGuard {
    registry: Arc<SessionRegistry>,
    pid: ProcessId,
    profile: Profile,
    driver: PollingDriver,
}

impl ProfilingGuard {
    pub fn new(
        registry: Arc<SessionRegistry>,
        pid: ProcessId,
        profile: Profile,
        driver: PollingDriver,
    ) -> Self {
        ProfilingGuard {
            registry,
            pid,
            profile,
            driver,
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Poll until cancelled or the target fails; drains before returning.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<DriveReport> {
        self.driver
            .run(&self.registry, self.pid, &mut self.profile, cancel)
    }

    /// Drain now without polling further.
    pub fn stop(&mut self) -> DriveReport {
        self.driver.drain(
            &self.registry,
            self.pid,
            &mut self.profile,
            StopReason::Cancelled,
        )
    }
}

impl Drop for ProfilingGuard {
    fn drop(&mut self) {
        if !self.driver.is_stopped() {
            if std::thread::panicking() {
                warn!(pid = self.pid.0, "draining profiling session during unwind");
            }
            self.stop();
        }
    }
}
