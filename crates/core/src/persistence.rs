//! Generic atomic-write persistence for the learning stores, generalizing
//! the teacher's temp-file-then-rename discipline (`teams/tasks.rs`,
//! `memory.rs`) to any `Serialize + DeserializeOwned` type.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Loads `T` from `path`, returning the default when the file is absent,
/// empty, or fails to parse — torn JSON from a crashed writer degrades to
/// absent rather than erroring (spec invariant: no third state).
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
        Err(_) => T::default(),
    }
}

/// Writes `value` to `path` atomically: serialize to `<path>.tmp`, then
/// rename over `path`. On write failure the `.tmp` file is removed.
pub fn save_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = tmp_path_for(path);
    let json = serde_json::to_string_pretty(value)?;
    let result = fs::write(&tmp_path, json).and_then(|_| fs::rename(&tmp_path, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    Ok(result?)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Acquire an exclusive flock on `<dir>/.lock`, creating the directory and
/// lock file as needed. Dropping the returned file releases the lock.
pub fn acquire_flock(dir: &Path) -> Result<fs::File> {
    fs::create_dir_all(dir)?;
    let lock_path = dir.join(".lock");
    if !lock_path.exists() {
        fs::write(&lock_path, "")?;
    }
    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&lock_path)?;
    file.lock_exclusive()?;
    Ok(file)
}

/// Allocate the next monotonic id under `<dir>/.highwatermark`, caller must
/// hold the flock for `dir` while calling this.
pub fn next_highwatermark_id(dir: &Path) -> Result<u64> {
    let hwm_path = dir.join(".highwatermark");
    let current: u64 = if hwm_path.exists() {
        fs::read_to_string(&hwm_path)?.trim().parse().unwrap_or(0)
    } else {
        0
    };
    let next = current + 1;
    fs::write(&hwm_path, next.to_string())?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Sample {
        count: u32,
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        save_atomic(&path, &Sample { count: 7 }).unwrap();
        let loaded: Sample = load_or_default(&path);
        assert_eq!(loaded, Sample { count: 7 });
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded: Sample = load_or_default(&path);
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn torn_json_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.json");
        fs::write(&path, "{\"count\": ").unwrap();
        let loaded: Sample = load_or_default(&path);
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn no_tmp_file_left_after_successful_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        save_atomic(&path, &Sample { count: 1 }).unwrap();
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn highwatermark_ids_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = acquire_flock(dir.path()).unwrap();
        let first = next_highwatermark_id(dir.path()).unwrap();
        let second = next_highwatermark_id(dir.path()).unwrap();
        assert_eq!(second, first + 1);
    }
}
