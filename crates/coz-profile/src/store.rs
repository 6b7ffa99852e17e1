//! Loading and persisting profiles on disk.

use crate::error::{ProfileError, Result};
use crate::format::{decode, encode};
use crate::profile::Profile;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Read a persisted profile.
pub fn load(path: &Path) -> Result<Profile> {
    let bytes = std::fs::read(path).map_err(|e| ProfileError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let profile = decode(&bytes)?;
    debug!(
        path = %path.display(),
        experiments = profile.len(),
        "loaded profile"
    );
    Ok(profile)
}

/// Create the profile a run accumulates into.
///
/// With `existing`, the persisted profile is reopened and its recorded
/// source identity is kept. A missing or unreadable file is an error; it
/// never degrades to an empty profile.
pub fn new_profile(source_identity: &str, existing: Option<&Path>) -> Result<Profile> {
    let Some(path) = existing else {
        return Ok(Profile::new(source_identity));
    };

    let profile = load(path)?;
    if profile.source_identity() != source_identity {
        warn!(
            path = %path.display(),
            recorded = profile.source_identity(),
            requested = source_identity,
            "existing profile was recorded against a different source; keeping recorded identity"
        );
    }
    Ok(profile)
}

/// Write the full profile atomically (temp file + rename).
pub fn persist(profile: &Profile, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ProfileError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let content = encode(profile)?;
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("profile.coz");
    let tmp_path = path.with_file_name(format!("{}.tmp.{}", file_name, std::process::id()));
    let written = write_synced(&tmp_path, &content).and_then(|()| {
        std::fs::rename(&tmp_path, path).map_err(|e| ProfileError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }
    debug!(
        path = %path.display(),
        experiments = profile.len(),
        "persisted profile"
    );
    Ok(())
}

fn write_synced(path: &Path, content: &[u8]) -> Result<()> {
    let io_err = |e| ProfileError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = std::fs::File::create(path).map_err(io_err)?;
    file.write_all(content).map_err(io_err)?;
    let _ = file.sync_all();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coz_common::Experiment;
    use std::time::Duration;
    use tempfile::tempdir;

    fn exp(window: u64) -> Experiment {
        Experiment::new(window as i64 * 3, 10, Duration::from_millis(window), window)
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("run.coz");

        let mut p = Profile::new("db1");
        p.merge((1..=4).map(exp));
        persist(&p, &path).unwrap();

        let back = load(&path).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn failed_persist_removes_temp_file() {
        let dir = tempdir().unwrap();
        // A directory in the way makes the final rename fail.
        let path = dir.path().join("run.coz");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();

        let err = persist(&Profile::new("x"), &path).unwrap_err();
        assert!(matches!(err, ProfileError::Io { .. }));
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["run.coz".to_string()]);
    }

    #[test]
    fn persist_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.coz");
        persist(&Profile::new("x"), &path).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["run.coz".to_string()]);
    }

    #[test]
    fn new_profile_without_base_is_empty() {
        let p = new_profile("db1", None).unwrap();
        assert!(p.is_empty());
        assert_eq!(p.source_identity(), "db1");
    }

    #[test]
    fn new_profile_continues_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.coz");
        let mut base = Profile::new("db1");
        base.merge(vec![exp(1), exp(2)]);
        persist(&base, &path).unwrap();

        let mut p = new_profile("db1", Some(&path)).unwrap();
        p.merge(vec![exp(3)]);
        persist(&p, &path).unwrap();

        let windows: Vec<u64> = load(&path)
            .unwrap()
            .experiments()
            .iter()
            .map(|e| e.sampling_window_id)
            .collect();
        assert_eq!(windows, vec![1, 2, 3]);
    }

    #[test]
    fn new_profile_keeps_recorded_identity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.coz");
        persist(&Profile::new("db1"), &path).unwrap();

        let p = new_profile("other-host", Some(&path)).unwrap();
        assert_eq!(p.source_identity(), "db1");
    }

    #[test]
    fn missing_base_is_an_error() {
        let dir = tempdir().unwrap();
        let err = new_profile("x", Some(&dir.path().join("absent.coz"))).unwrap_err();
        assert!(matches!(err, ProfileError::Io { .. }));
    }

    #[test]
    fn corrupt_base_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.coz");
        std::fs::write(&path, b"not a profile\n").unwrap();
        let err = new_profile("x", Some(&path)).unwrap_err();
        assert!(matches!(err, ProfileError::Parse { line: 1, .. }));

        let mapped = err.into_load_error(&path);
        assert!(matches!(mapped, coz_common::Error::ProfileLoad { .. }));
    }
}
