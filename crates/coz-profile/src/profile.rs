//! The in-memory profile and its single mutator.

use chrono::{DateTime, Utc};
use coz_common::Experiment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered, append-only set of experiments for one target.
///
/// `merge` is the only way to add experiments; nothing removes, reorders or
/// deduplicates them.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    source_identity: String,
    created_at: DateTime<Utc>,
    experiments: Vec<Experiment>,
}

impl Profile {
    /// Start an empty profile for `source_identity` (a host name).
    pub fn new(source_identity: impl Into<String>) -> Self {
        Profile {
            source_identity: source_identity.into(),
            created_at: Utc::now(),
            experiments: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        source_identity: String,
        created_at: DateTime<Utc>,
        experiments: Vec<Experiment>,
    ) -> Self {
        Profile {
            source_identity,
            created_at,
            experiments,
        }
    }

    pub fn source_identity(&self) -> &str {
        &self.source_identity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn experiments(&self) -> &[Experiment] {
        &self.experiments
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    /// Append a batch in arrival order. Returns the number of experiments added.
    pub fn merge<I>(&mut self, batch: I) -> usize
    where
        I: IntoIterator<Item = Experiment>,
    {
        let before = self.experiments.len();
        self.experiments.extend(batch);
        self.experiments.len() - before
    }

    /// Aggregate view for end-of-run reporting.
    pub fn summary(&self) -> ProfileSummary {
        let mut by_speedup: BTreeMap<u32, SpeedupSummary> = BTreeMap::new();
        let mut total_hits: i64 = 0;
        let mut total_elapsed_ns: u64 = 0;

        for e in &self.experiments {
            let elapsed_ns = u64::try_from(e.elapsed.as_nanos()).unwrap_or(u64::MAX);
            total_hits = total_hits.saturating_add(e.progress_point_hit_delta);
            total_elapsed_ns = total_elapsed_ns.saturating_add(elapsed_ns);

            let entry = by_speedup
                .entry(e.applied_speedup_percent)
                .or_insert_with(|| SpeedupSummary {
                    speedup_percent: e.applied_speedup_percent,
                    ..SpeedupSummary::default()
                });
            entry.experiments += 1;
            entry.hits = entry.hits.saturating_add(e.progress_point_hit_delta);
            entry.elapsed_ns = entry.elapsed_ns.saturating_add(elapsed_ns);
        }

        let by_speedup = by_speedup
            .into_values()
            .map(|mut s| {
                s.hits_per_second = if s.elapsed_ns == 0 {
                    0.0
                } else {
                    s.hits as f64 / (s.elapsed_ns as f64 / 1e9)
                };
                s
            })
            .collect();

        ProfileSummary {
            source_identity: self.source_identity.clone(),
            created_at: self.created_at,
            experiments: self.experiments.len(),
            total_hits,
            total_elapsed_ns,
            by_speedup,
        }
    }
}

/// Summary of a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub source_identity: String,
    pub created_at: DateTime<Utc>,
    pub experiments: usize,
    pub total_hits: i64,
    pub total_elapsed_ns: u64,
    /// One row per distinct applied speedup, ascending.
    pub by_speedup: Vec<SpeedupSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeedupSummary {
    pub speedup_percent: u32,
    pub experiments: usize,
    pub hits: i64,
    pub elapsed_ns: u64,
    pub hits_per_second: f64,
}
