//! Engine-wide settings, passed explicitly to the export and reapply engines.

use std::path::PathBuf;

/// Archive format used when a job does not name one.
pub const DEFAULT_ARCHIVE_FORMAT: &str = "tar";

/// Prefix of the staging directories created under `temp_root`.
pub const DEFAULT_STAGING_PREFIX: &str = "dotsnap";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Format name (`tar`, `gztar`, `zip` or `null`); validated per job
    pub default_archive_format: String,

    /// Where reapply creates its staging directory when none is given
    pub temp_root: PathBuf,

    pub staging_prefix: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            default_archive_format: DEFAULT_ARCHIVE_FORMAT.to_string(),
            temp_root: std::env::temp_dir(),
            staging_prefix: DEFAULT_STAGING_PREFIX.to_string(),
        }
    }
}

impl EngineSettings {
    pub fn with_default_archive_format(mut self, format: impl Into<String>) -> Self {
        self.default_archive_format = format.into();
        self
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.default_archive_format, "tar");
        assert_eq!(settings.temp_root, std::env::temp_dir());
        assert_eq!(settings.staging_prefix, "dotsnap");
    }

    #[test]
    fn test_builders_override() {
        let settings = EngineSettings::default()
            .with_default_archive_format("null")
            .with_temp_root("/var/tmp");
        assert_eq!(settings.default_archive_format, "null");
        assert_eq!(settings.temp_root, PathBuf::from("/var/tmp"));
    }
}
