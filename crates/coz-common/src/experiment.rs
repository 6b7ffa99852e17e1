//! Experiment records produced by the profiling agent.
//!
//! One experiment correlates an applied virtual speedup with the number of
//! progress-point hits observed over a sampling window. Records are
//! immutable once produced; ordering is the responsibility of the profile.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single measurement record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Experiment {
    /// Progress-point hits observed during the window.
    pub progress_point_hit_delta: i64,
    /// Virtual speedup applied to the selected code, in percent.
    pub applied_speedup_percent: u32,
    /// Wall-clock length of the window.
    #[serde(rename = "elapsed_ns", with = "duration_nanos")]
    pub elapsed: Duration,
    pub sampling_window_id: u64,
}

impl Experiment {
    pub fn new(
        progress_point_hit_delta: i64,
        applied_speedup_percent: u32,
        elapsed: Duration,
        sampling_window_id: u64,
    ) -> Self {
        Experiment {
            progress_point_hit_delta,
            applied_speedup_percent,
            elapsed,
            sampling_window_id,
        }
    }
}

/// Durations travel as whole nanoseconds so a persist/load cycle is exact.
mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(value.as_nanos()).unwrap_or(u64::MAX);
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}
