//! Path resolution for profile entries.
//!
//! Turns a `ProfileEntry` into the `(source, destination)` pairs a job has to
//! copy. Export and reapply use the same rules with the two sides swapped, so
//! an export can always be reversed deterministically.

use std::path::{Component, Path, PathBuf};

use crate::error::EngineError;
use crate::model::{Direction, ProfileEntry};

/// One resolved copy operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPair {
    pub source: PathBuf,
    pub destination: PathBuf,

    /// Path on the live filesystem side
    pub location_path: PathBuf,

    /// Name under the entry's staging directory (empty for whole-tree pairs)
    pub staged_name: PathBuf,
}

impl CopyPair {
    fn new(location_path: PathBuf, staged_name: PathBuf, staging_entry_dir: &Path, direction: Direction) -> Self {
        let staged_path = if staged_name.as_os_str().is_empty() {
            staging_entry_dir.to_path_buf()
        } else {
            staging_entry_dir.join(&staged_name)
        };
        let (source, destination) = match direction {
            Direction::Export => (location_path.clone(), staged_path),
            Direction::Reapply => (staged_path, location_path.clone()),
        };
        CopyPair {
            source,
            destination,
            location_path,
            staged_name,
        }
    }

    /// True if this pair copies a whole entry directory.
    pub fn is_whole_tree(&self) -> bool {
        self.staged_name.as_os_str().is_empty()
    }
}

/// Name a file is stored under inside the entry's staging directory.
///
/// Absolute paths are flattened to their basename with one extension
/// stripped (`/etc/app.conf` -> `app`); relative names are kept as written.
///
/// # Errors
/// `PathInvalid` if the name is empty, has no basename, or climbs out of the
/// staging directory.
pub fn staged_name(file: &str) -> Result<PathBuf, EngineError> {
    let path = Path::new(file);
    let invalid = |reason: &str| EngineError::PathInvalid {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if file.is_empty() {
        return Err(invalid("empty file name"));
    }

    if path.is_absolute() {
        let stem = path.file_stem().ok_or_else(|| invalid("absolute path has no file name"))?;
        return Ok(PathBuf::from(stem));
    }

    if path.components().any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir)) {
        return Err(invalid("relative path escapes the entry directory"));
    }

    Ok(path.to_path_buf())
}

/// Join a single name (entry or export name) onto `root`.
///
/// # Errors
/// `PathInvalid` unless `name` is exactly one plain path component.
pub fn join_component(root: &Path, name: &str) -> Result<PathBuf, EngineError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(root.join(name)),
        _ => Err(EngineError::PathInvalid {
            path: PathBuf::from(name),
            reason: "name must be a single path component".to_string(),
        }),
    }
}

/// Resolve the copy pairs for one entry.
///
/// `staging_entry_dir` is the entry's directory inside the export/staging
/// tree. An entry with no files or with `__all__` first yields a single
/// whole-tree pair. Otherwise every file yields one pair, in order,
/// duplicates included; a malformed file name yields an `Err` in its slot so
/// the caller can report it and move on.
pub fn resolve_pairs(
    entry: &ProfileEntry,
    staging_entry_dir: &Path,
    direction: Direction,
) -> Vec<Result<CopyPair, EngineError>> {
    if entry.copies_everything() {
        return vec![Ok(CopyPair::new(
            entry.location.clone(),
            PathBuf::new(),
            staging_entry_dir,
            direction,
        ))];
    }

    entry
        .files
        .iter()
        .map(|file| {
            let name = staged_name(file)?;
            let location_path = if Path::new(file).is_absolute() {
                PathBuf::from(file)
            } else {
                entry.location.join(file)
            };
            Ok(CopyPair::new(location_path, name, staging_entry_dir, direction))
        })
        .collect()
}
