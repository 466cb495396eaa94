//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Merging a file or directory tree into a destination
//! - Copying single files with mtime preservation
//! - Creating and removing directories

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// Directory nesting beyond this is treated as a symlink loop.
const MAX_DEPTH: usize = 128;

/// A single regular file written by `copy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedFile {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub bytes: u64,
}

/// What a `copy` call did.
#[derive(Debug, Default)]
pub struct CopyStats {
    pub files: Vec<CopiedFile>,

    /// Per-file failures inside a tree; the rest of the tree is still copied
    pub errors: Vec<EngineError>,
}

impl CopyStats {
    pub fn bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes).sum()
    }
}

/// Copy `source` to `dest`, merging into whatever is already there.
///
/// Directories are copied recursively. Existing destination directories are
/// reused; an existing destination file is removed before its replacement
/// is written; destination entries with no counterpart in `source` are left
/// untouched. A file copied onto an existing directory lands inside it.
///
/// # Errors
/// - `PathInvalid` if either path is empty, they are the same, or `dest`
///   lies inside `source`
/// - `SourceNotFound` if `source` does not exist
/// - other variants if the top-level copy itself fails; failures deeper in a
///   tree are collected in `CopyStats::errors`
pub fn copy(source: &Path, dest: &Path) -> Result<CopyStats, EngineError> {
    validate_pair(source, dest)?;

    let metadata = match fs::metadata(source) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(EngineError::SourceNotFound {
                path: source.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(EngineError::ReadError {
                path: source.to_path_buf(),
                source: e,
            })
        }
    };

    let mut stats = CopyStats::default();
    if metadata.is_dir() {
        merge_dir(source, dest, 0, &mut stats)?;
    } else {
        let target = if dest.is_dir() {
            match source.file_name() {
                Some(name) => dest.join(name),
                None => dest.to_path_buf(),
            }
        } else {
            dest.to_path_buf()
        };
        let bytes = replace_file(source, &target)?;
        stats.files.push(CopiedFile {
            source: source.to_path_buf(),
            destination: target,
            bytes,
        });
    }
    Ok(stats)
}

fn validate_pair(source: &Path, dest: &Path) -> Result<(), EngineError> {
    if source.as_os_str().is_empty() {
        return Err(EngineError::PathInvalid {
            path: source.to_path_buf(),
            reason: "source path is empty".to_string(),
        });
    }
    if dest.as_os_str().is_empty() {
        return Err(EngineError::PathInvalid {
            path: dest.to_path_buf(),
            reason: "destination path is empty".to_string(),
        });
    }
    if source == dest {
        return Err(EngineError::PathInvalid {
            path: source.to_path_buf(),
            reason: "source and destination are the same".to_string(),
        });
    }
    if dest.starts_with(source) {
        return Err(EngineError::PathInvalid {
            path: dest.to_path_buf(),
            reason: format!("destination is inside source {}", source.display()),
        });
    }
    Ok(())
}

fn merge_dir(source: &Path, dest: &Path, depth: usize, stats: &mut CopyStats) -> Result<(), EngineError> {
    if depth > MAX_DEPTH {
        return Err(EngineError::PathInvalid {
            path: source.to_path_buf(),
            reason: "directory nesting too deep (symlink loop?)".to_string(),
        });
    }

    match fs::metadata(dest) {
        Ok(m) if m.is_dir() => {}
        Ok(_) => {
            return Err(EngineError::PathInvalid {
                path: dest.to_path_buf(),
                reason: "destination exists and is not a directory".to_string(),
            })
        }
        Err(_) => {
            fs::create_dir_all(dest).map_err(|e| EngineError::DirectoryCreationFailed {
                path: dest.to_path_buf(),
                source: e,
            })?;
        }
    }

    let entries = fs::read_dir(source).map_err(|e| EngineError::ReadError {
        path: source.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                stats.errors.push(EngineError::ReadError {
                    path: source.to_path_buf(),
                    source: e,
                });
                continue;
            }
        };
        let source_path = entry.path();
        let dest_path = dest.join(entry.file_name());

        // Follow symlinks, like a plain `cp -r -L`
        let is_dir = match fs::metadata(&source_path) {
            Ok(m) => m.is_dir(),
            Err(e) => {
                tracing::debug!("Skipping unreadable {}: {}", source_path.display(), e);
                stats.errors.push(EngineError::ReadError {
                    path: source_path,
                    source: e,
                });
                continue;
            }
        };

        if is_dir {
            if let Err(e) = merge_dir(&source_path, &dest_path, depth + 1, stats) {
                stats.errors.push(e);
            }
        } else {
            match replace_file(&source_path, &dest_path) {
                Ok(bytes) => stats.files.push(CopiedFile {
                    source: source_path,
                    destination: dest_path,
                    bytes,
                }),
                Err(e) => stats.errors.push(e),
            }
        }
    }
    Ok(())
}

/// Remove whatever file is at `dst`, then copy `src` there.
fn replace_file(src: &Path, dst: &Path) -> Result<u64, EngineError> {
    match fs::symlink_metadata(dst) {
        Ok(m) if m.is_dir() => {
            return Err(EngineError::PathInvalid {
                path: dst.to_path_buf(),
                reason: "a directory is in the way of this file".to_string(),
            })
        }
        Ok(_) => fs::remove_file(dst).map_err(|e| EngineError::RemoveFailed {
            path: dst.to_path_buf(),
            source: e,
        })?,
        Err(_) => {}
    }
    copy_file_with_metadata(src, dst)
}

/// Copy a file from source to destination with metadata preservation.
///
/// # Returns
/// Number of bytes copied
///
/// # Errors
/// Returns EngineError if the copy fails
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64, EngineError> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;

    let src_metadata = src_file.metadata().map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;
    let src_mtime = src_metadata.modified().ok();

    let mut dst_file = fs::File::create(dst).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            EngineError::WriteError {
                path: dst.to_path_buf(),
                source: e,
            }
        } else {
            EngineError::ReadError {
                path: src.to_path_buf(),
                source: e,
            }
        }
    })?;

    if let Some(mtime) = src_mtime {
        let _ = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime));
    }

    Ok(bytes_copied)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Returns EngineError if directory creation fails
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return Ok(()),
    };

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Parent path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(parent).map_err(|e| EngineError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: e,
        }),
    }
}

/// Remove a directory tree; a missing tree is not an error.
pub fn remove_tree(path: &Path) -> Result<(), EngineError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::RemoveFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// True if `path` is a directory with no entries.
pub fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}
