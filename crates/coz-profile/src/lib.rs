//! Experiment profile aggregation and persistence.
//!
//! A profile is the ordered, append-only record of every experiment pulled
//! from one target. It can be persisted and later reopened to keep
//! accumulating across profiling runs.
//!
//! # File Format
//!
//! Profiles are JSON Lines files:
//! - line 1: header `{"kind":"header","schema_version":..,"source_identity":..,"created_at":..}`
//! - then one `{"kind":"experiment",...}` line per experiment, in arrival order
//!
//! # Example
//!
//! ```no_run
//! use coz_profile::{new_profile, persist, Profile};
//! use std::path::Path;
//!
//! let mut profile = new_profile("db1", Some(Path::new("run.coz"))).unwrap();
//! profile.merge(Vec::new());
//! persist(&profile, Path::new("run.coz")).unwrap();
//! ```

pub mod error;
pub mod format;
pub mod profile;
pub mod store;

pub use error::{ProfileError, Result};
pub use format::{decode, encode, PROFILE_SCHEMA_VERSION};
pub use profile::{Profile, ProfileSummary, SpeedupSummary};
pub use store::{load, new_profile, persist};
