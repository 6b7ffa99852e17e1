//! Error types for profile operations.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading or persisting a profile.
#[derive(Error, Debug)]
pub enum ProfileError {
    /// I/O error at a specific path
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line could not be parsed
    #[error("malformed record at line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Bytes that are not UTF-8
    #[error("invalid UTF-8 at line {line}")]
    InvalidUtf8 { line: usize },

    /// The file does not start with a header record
    #[error("missing profile header")]
    MissingHeader,

    /// A record appeared where it is not allowed
    #[error("unexpected {kind} record at line {line}")]
    UnexpectedRecord { line: usize, kind: String },

    /// Unknown or unsupported profile version
    #[error("unsupported profile version: {version} (supported: {supported})")]
    UnsupportedVersion { version: String, supported: String },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProfileError {
    /// Convert into the client-wide taxonomy, naming the file involved.
    pub fn into_load_error(self, path: &Path) -> coz_common::Error {
        coz_common::Error::ProfileLoad {
            path: path.to_path_buf(),
            message: self.to_string(),
        }
    }
}

/// Result type alias for profile operations.
pub type Result<T> = std::result::Result<T, ProfileError>;
