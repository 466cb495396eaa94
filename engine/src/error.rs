//! Error types for the export/reapply engine.
//!
//! The primary error type is `EngineError`. Fatal variants abort a job before
//! (or instead of) touching the filesystem; the rest describe a single copy
//! operation and are recorded on the matching `CopyItem` rather than returned
//! from the job.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Profile mapping is missing, empty, or does not contain the requested profile/entry.
    #[error("Invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    /// The profile document could not be read from disk
    #[error("Failed to read config file {}: {source}", path.display())]
    ConfigRead { path: PathBuf, source: io::Error },

    /// The profile document is not valid YAML
    #[error("Failed to parse config file {}: {message}", path.display())]
    ConfigParse { path: PathBuf, message: String },

    /// Malformed path, or source and destination are the same
    #[error("Invalid path: {} ({reason})", path.display())]
    PathInvalid { path: PathBuf, reason: String },

    /// A copy source does not exist
    #[error("Source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Archive extraction failed (corrupt data or unknown format)
    #[error("Failed to unpack {}: {reason}", path.display())]
    UnpackError { path: PathBuf, reason: String },

    /// Requested archive format is not supported
    #[error("Unsupported archive format '{format}' (expected one of: {supported})")]
    FormatInvalid { format: String, supported: String },

    /// Failed to read from a source file
    #[error("Failed to read file: {}", path.display())]
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write a destination file
    #[error("Failed to write file: {}", path.display())]
    WriteError { path: PathBuf, source: io::Error },

    /// Failed to create a directory
    #[error("Failed to create directory: {}", path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// Failed to remove a file or directory tree
    #[error("Failed to remove: {}", path.display())]
    RemoveFailed { path: PathBuf, source: io::Error },

    /// Archive could not be written
    #[error("Failed to create archive {}: {reason}", path.display())]
    ArchiveFailed { path: PathBuf, reason: String },
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::ConfigRead { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::RemoveFailed { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_os_error_passthrough() {
        let err = EngineError::ReadError {
            path: PathBuf::from("/x"),
            source: io::Error::from_raw_os_error(2),
        };
        assert_eq!(err.raw_os_error(), Some(2));
        assert_eq!(EngineError::config("x").raw_os_error(), None);
    }

    #[test]
    fn test_display_includes_path() {
        let err = EngineError::SourceNotFound {
            path: PathBuf::from("/src/b.txt"),
        };
        assert_eq!(err.to_string(), "Source not found: /src/b.txt");
    }
}
