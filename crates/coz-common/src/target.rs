//! Profiling target descriptions: where progress is measured and which code
//! is eligible for virtual speedup.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Code location whose execution rate is the optimization objective.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgressPoint {
    pub class_name: String,
    pub line_number: u32,
}

impl ProgressPoint {
    pub fn new(class_name: impl Into<String>, line_number: u32) -> Self {
        ProgressPoint {
            class_name: class_name.into(),
            line_number,
        }
    }
}

impl fmt::Display for ProgressPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class_name, self.line_number)
    }
}

/// Package prefix restricting which code regions experiments may speed up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope {
    pub package_prefix: String,
}

impl Scope {
    pub fn new(package_prefix: impl Into<String>) -> Self {
        Scope {
            package_prefix: package_prefix.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.package_prefix)
    }
}

/// How a session reaches its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Transport {
    /// Agent endpoint of a process on this host.
    Local,
    /// Control service on another host.
    Remote { host: String },
}

impl Transport {
    pub fn is_remote(&self) -> bool {
        matches!(self, Transport::Remote { .. })
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Local => write!(f, "local"),
            Transport::Remote { host } => write!(f, "remote({})", host),
        }
    }
}
