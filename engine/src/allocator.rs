//! Safe allocation of working directories.
//!
//! A job never writes into a directory that already holds data from an
//! earlier run unless it was asked to accumulate in place. Instead the new
//! directory gets a timestamp suffix and the old one is left alone.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::EngineError;

/// day-month-year_hour-minute-second
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y_%H-%M-%S";

/// Result of allocating a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Directory the caller should use
    pub path: PathBuf,

    /// The requested path, if it was occupied and `path` differs from it
    pub displaced: Option<PathBuf>,
}

/// Append the timestamp suffix to a name.
pub fn timestamped_name(name: &str, now: DateTime<Local>) -> String {
    format!("{}_{}", name, now.format(TIMESTAMP_FORMAT))
}

/// True if `path` does not exist or is an empty directory.
///
/// # Errors
/// `ReadError` if the directory exists but cannot be listed.
pub fn is_vacant(path: &Path) -> Result<bool, EngineError> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => {
            let mut entries = fs::read_dir(path).map_err(|e| EngineError::ReadError {
                path: path.to_path_buf(),
                source: e,
            })?;
            Ok(entries.next().is_none())
        }
        // A file squatting on the name counts as occupied
        Ok(_) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(EngineError::ReadError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Work out which directory `allocate` would hand out, without touching disk.
///
/// With `rename_aside` off the requested path is always returned, so callers
/// can accumulate into an existing directory.
pub fn plan(path: &Path, rename_aside: bool) -> Result<Allocation, EngineError> {
    plan_at(path, rename_aside, Local::now())
}

pub(crate) fn plan_at(path: &Path, rename_aside: bool, now: DateTime<Local>) -> Result<Allocation, EngineError> {
    if !rename_aside || is_vacant(path)? {
        return Ok(Allocation {
            path: path.to_path_buf(),
            displaced: None,
        });
    }

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EngineError::PathInvalid {
            path: path.to_path_buf(),
            reason: "directory has no usable name".to_string(),
        })?;

    let base = timestamped_name(name, now);
    let mut candidate = path.with_file_name(&base);
    let mut counter = 1;
    // Two runs within the same second would otherwise collide
    while !is_vacant(&candidate)? {
        candidate = path.with_file_name(format!("{}_{}", base, counter));
        counter += 1;
    }

    Ok(Allocation {
        path: candidate,
        displaced: Some(path.to_path_buf()),
    })
}

/// Allocate an empty working directory at `path`, or next to it.
///
/// If `path` is missing or empty it is used as is (and created). If it holds
/// data and `rename_aside` is set, a timestamped sibling is created instead
/// and a warning is logged; the original is never modified.
///
/// # Errors
/// `DirectoryCreationFailed` if the chosen directory cannot be created.
pub fn allocate(path: &Path, rename_aside: bool) -> Result<Allocation, EngineError> {
    allocate_at(path, rename_aside, Local::now())
}

pub(crate) fn allocate_at(path: &Path, rename_aside: bool, now: DateTime<Local>) -> Result<Allocation, EngineError> {
    let allocation = plan_at(path, rename_aside, now)?;

    if let Some(ref displaced) = allocation.displaced {
        tracing::warn!(
            "{} already exists and is not empty; using {} instead",
            displaced.display(),
            allocation.path.display()
        );
    }

    fs::create_dir_all(&allocation.path).map_err(|e| EngineError::DirectoryCreationFailed {
        path: allocation.path.clone(),
        source: e,
    })?;

    Ok(allocation)
}

/// Pick a file path `dir/stem.extension` that does not exist yet.
///
/// An existing file is never overwritten: the stem gets the timestamp
/// suffix (and a counter if needed) instead. Nothing is created on disk.
pub fn plan_file(dir: &Path, stem: &str, extension: &str) -> Allocation {
    plan_file_at(dir, stem, extension, Local::now())
}

pub(crate) fn plan_file_at(dir: &Path, stem: &str, extension: &str, now: DateTime<Local>) -> Allocation {
    let requested = dir.join(format!("{}.{}", stem, extension));
    if fs::symlink_metadata(&requested).is_err() {
        return Allocation {
            path: requested,
            displaced: None,
        };
    }

    let base = timestamped_name(stem, now);
    let mut candidate = dir.join(format!("{}.{}", base, extension));
    let mut counter = 1;
    while fs::symlink_metadata(&candidate).is_ok() {
        candidate = dir.join(format!("{}_{}.{}", base, counter, extension));
        counter += 1;
    }

    Allocation {
        path: candidate,
        displaced: Some(requested),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 7, 9, 5, 1)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn test_timestamp_format() {
        assert_eq!(timestamped_name("desktop", fixed_time()), "desktop_07-03-2024_09-05-01");
    }

    #[test]
    fn test_allocate_missing_path_creates_it() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("export");

        let allocation = allocate(&target, true).expect("Failed to allocate");
        assert_eq!(allocation.path, target);
        assert!(allocation.displaced.is_none());
        assert!(target.is_dir());
    }

    #[test]
    fn test_allocate_is_idempotent_on_empty_dir() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("export");

        let first = allocate(&target, true).expect("first allocation");
        let second = allocate(&target, true).expect("second allocation");
        assert_eq!(first.path, second.path);
    }

    #[test]
    fn test_allocate_over_non_empty_dir_keeps_contents() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("myprofile");
        fs::create_dir(&target).expect("Failed to create dir");
        fs::write(target.join("old.txt"), "previous export").expect("Failed to write file");

        let allocation = allocate_at(&target, true, fixed_time()).expect("Failed to allocate");

        assert_eq!(allocation.path, temp_dir.path().join("myprofile_07-03-2024_09-05-01"));
        assert_eq!(allocation.displaced.as_deref(), Some(target.as_path()));
        assert!(allocation.path.is_dir());
        assert_eq!(
            fs::read_to_string(target.join("old.txt")).expect("old file intact"),
            "previous export"
        );
    }

    #[test]
    fn test_allocate_in_place_when_rename_aside_disabled() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("myprofile");
        fs::create_dir(&target).expect("Failed to create dir");
        fs::write(target.join("old.txt"), "keep").expect("Failed to write file");

        let allocation = allocate(&target, false).expect("Failed to allocate");
        assert_eq!(allocation.path, target);
        assert!(target.join("old.txt").exists());
    }

    #[test]
    fn test_same_second_collision_gets_counter() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("p");
        fs::create_dir(&target).expect("Failed to create dir");
        fs::write(target.join("f"), "x").expect("Failed to write file");

        let first = allocate_at(&target, true, fixed_time()).expect("first");
        fs::write(first.path.join("f"), "y").expect("Failed to write file");
        let second = allocate_at(&target, true, fixed_time()).expect("second");

        assert_ne!(first.path, second.path);
        assert_eq!(second.path, temp_dir.path().join("p_07-03-2024_09-05-01_1"));
    }

    #[test]
    fn test_plan_does_not_touch_disk() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("never-created");

        let allocation = plan(&target, true).expect("Failed to plan");
        assert_eq!(allocation.path, target);
        assert!(!target.exists());
    }

    #[test]
    fn test_file_at_path_counts_as_occupied() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("occupied");
        fs::write(&target, "not a directory").expect("Failed to write file");

        assert!(!is_vacant(&target).expect("metadata readable"));
        let allocation = allocate_at(&target, true, fixed_time()).expect("Failed to allocate");
        assert_ne!(allocation.path, target);
        assert!(target.is_file());
    }

    #[test]
    fn test_plan_file_keeps_free_name() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let allocation = plan_file_at(temp_dir.path(), "desktop", "tar.gz", fixed_time());
        assert_eq!(allocation.path, temp_dir.path().join("desktop.tar.gz"));
        assert!(allocation.displaced.is_none());
    }

    #[test]
    fn test_plan_file_never_overwrites_existing_archive() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let existing = temp_dir.path().join("desktop.zip");
        fs::write(&existing, "old archive").expect("Failed to write file");

        let allocation = plan_file_at(temp_dir.path(), "desktop", "zip", fixed_time());
        assert_eq!(allocation.path, temp_dir.path().join("desktop_07-03-2024_09-05-01.zip"));
        assert_eq!(allocation.displaced.as_deref(), Some(existing.as_path()));
        assert_eq!(fs::read_to_string(&existing).expect("read"), "old archive");
    }
}
