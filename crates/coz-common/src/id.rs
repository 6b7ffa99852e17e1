//! Process identity types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Process ID wrapper with display formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        ProcessId(pid)
    }
}

impl FromStr for ProcessId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(ProcessId)
    }
}

/// A candidate process as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub process_id: ProcessId,
    pub display_name: String,
    /// Whether a profiling agent endpoint was found for this process.
    #[serde(default)]
    pub attachable: bool,
}

impl ProcessDescriptor {
    pub fn new(process_id: impl Into<ProcessId>, display_name: impl Into<String>) -> Self {
        ProcessDescriptor {
            process_id: process_id.into(),
            display_name: display_name.into(),
            attachable: false,
        }
    }

    pub fn with_attachable(mut self, attachable: bool) -> Self {
        self.attachable = attachable;
        self
    }
}

impl fmt::Display for ProcessDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.process_id, self.display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_id_is_transparent_in_json() {
        let json = serde_json::to_string(&ProcessId(4242)).unwrap();
        assert_eq!(json, "4242");
        let back: ProcessId = serde_json::from_str("17").unwrap();
        assert_eq!(back, ProcessId(17));
    }

    #[test]
    fn process_id_parses_with_whitespace() {
        assert_eq!(" 99 ".parse::<ProcessId>().unwrap(), ProcessId(99));
        assert!("abc".parse::<ProcessId>().is_err());
        assert!("-1".parse::<ProcessId>().is_err());
    }

    #[test]
    fn descriptor_display_matches_listing_format() {
        let d = ProcessDescriptor::new(12u32, "java -jar app.jar");
        assert_eq!(d.to_string(), "12: java -jar app.jar");
        assert!(!d.attachable);
    }

    #[test]
    fn descriptor_attachable_defaults_when_missing() {
        let d: ProcessDescriptor =
            serde_json::from_str(r#"{"process_id":3,"display_name":"x"}"#).unwrap();
        assert!(!d.attachable);
    }
}
