//! Process enumeration.
//!
//! Enumeration is consulted only at attach time and by `cozctl list`. The
//! [`ProcessEnumerator`] trait keeps the platform primitive swappable.

mod ps;

pub use ps::PsEnumerator;

use coz_common::{ProcessDescriptor, ProcessId};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while listing processes.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Failed to execute ps command: {0}")]
    CommandFailed(String),

    #[error("ps command timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Read-only view of the live process table.
pub trait ProcessEnumerator: Send + Sync {
    fn list(&self) -> Result<Vec<ProcessDescriptor>, CollectError>;

    fn find(&self, pid: ProcessId) -> Result<Option<ProcessDescriptor>, CollectError> {
        Ok(self.list()?.into_iter().find(|d| d.process_id == pid))
    }
}

/// Fixed process table, for hosts without `ps` and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticEnumerator {
    processes: Vec<ProcessDescriptor>,
}

impl StaticEnumerator {
    pub fn new(processes: Vec<ProcessDescriptor>) -> Self {
        StaticEnumerator { processes }
    }
}

impl ProcessEnumerator for StaticEnumerator {
    fn list(&self) -> Result<Vec<ProcessDescriptor>, CollectError> {
        Ok(self.processes.clone())
    }
}
