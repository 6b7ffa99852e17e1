//! JSON Lines encoding of a profile.

use crate::error::{ProfileError, Result};
use crate::profile::Profile;
use chrono::{DateTime, Utc};
use coz_common::Experiment;
use serde::{Deserialize, Serialize};

/// Current profile format version.
pub const PROFILE_SCHEMA_VERSION: &str = "1.0.0";

/// One line of a profile file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record {
    Header {
        schema_version: String,
        source_identity: String,
        created_at: DateTime<Utc>,
    },
    Experiment(Experiment),
}

impl Record {
    fn kind(&self) -> &'static str {
        match self {
            Record::Header { .. } => "header",
            Record::Experiment(_) => "experiment",
        }
    }
}

/// Serialize a profile: header line, then one line per experiment.
pub fn encode(profile: &Profile) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64 + profile.len() * 128);

    let header = Record::Header {
        schema_version: PROFILE_SCHEMA_VERSION.to_string(),
        source_identity: profile.source_identity().to_string(),
        created_at: profile.created_at(),
    };
    serde_json::to_writer(&mut out, &header)?;
    out.push(b'\n');

    for e in profile.experiments() {
        serde_json::to_writer(&mut out, &Record::Experiment(*e))?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Parse a profile previously produced by [`encode`].
///
/// Blank lines are skipped. Anything else that is not a well-formed record,
/// including a truncated final line, is an error naming the line.
pub fn decode(bytes: &[u8]) -> Result<Profile> {
    let text = std::str::from_utf8(bytes).map_err(|e| ProfileError::InvalidUtf8 {
        line: 1 + bytes[..e.valid_up_to()].iter().filter(|b| **b == b'\n').count(),
    })?;
    let mut header: Option<(String, DateTime<Utc>)> = None;
    let mut experiments = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_num = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let record: Record = serde_json::from_str(line).map_err(|source| ProfileError::Parse {
            line: line_num,
            source,
        })?;

        match (record, header.is_some()) {
            (
                Record::Header {
                    schema_version,
                    source_identity,
                    created_at,
                },
                false,
            ) => {
                check_version(&schema_version)?;
                header = Some((source_identity, created_at));
            }
            (Record::Experiment(e), true) => experiments.push(e),
            (Record::Experiment(_), false) => return Err(ProfileError::MissingHeader),
            (other, true) => {
                return Err(ProfileError::UnexpectedRecord {
                    line: line_num,
                    kind: other.kind().to_string(),
                })
            }
        }
    }

    let (source_identity, created_at) = header.ok_or(ProfileError::MissingHeader)?;
    Ok(Profile::from_parts(source_identity, created_at, experiments))
}

/// Same major version is readable.
fn check_version(version: &str) -> Result<()> {
    let major = |v: &str| v.split('.').next().map(str::to_string);
    if major(version).is_some() && major(version) == major(PROFILE_SCHEMA_VERSION) {
        Ok(())
    } else {
        Err(ProfileError::UnsupportedVersion {
            version: version.to_string(),
            supported: PROFILE_SCHEMA_VERSION.to_string(),
        })
    }
}
