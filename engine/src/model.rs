//! Core data model for export and reapply jobs.
//!
//! This module defines:
//! - Profile / ProfileEntry / ProfileSet: the read-only profile mapping
//! - ExportJob / ReapplyJob: per-invocation job descriptions
//! - CopyItem / JobReport: what a job did, item by item

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use crate::checksums::ChecksumAlgorithm;
use crate::error::EngineError;

/// Marker that makes an entry export everything under its location.
pub const ALL_FILES: &str = "__all__";

/// One location + file-list rule within a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileEntry {
    /// Entry name; becomes the entry's directory inside an export
    #[serde(skip)]
    pub name: String,

    /// Absolute directory the files live in
    pub location: PathBuf,

    /// Files relative to `location` (or absolute), in declaration order.
    /// Never null: a missing list is normalized to empty at load time.
    pub files: Vec<String>,
}

impl ProfileEntry {
    pub fn new<S: Into<String>>(name: S, location: impl Into<PathBuf>, files: Vec<S>) -> Self {
        ProfileEntry {
            name: name.into(),
            location: location.into(),
            files: files.into_iter().map(Into::into).collect(),
        }
    }

    /// True if the whole `location` tree is copied as one unit.
    pub fn copies_everything(&self) -> bool {
        self.files.first().map_or(true, |f| f == ALL_FILES)
    }
}

/// A named, ordered set of entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub entries: Vec<ProfileEntry>,
}

impl Profile {
    pub fn new(name: impl Into<String>, entries: Vec<ProfileEntry>) -> Self {
        Profile {
            name: name.into(),
            entries,
        }
    }

    /// Look up an entry by name.
    pub fn entry(&self, name: &str) -> Result<&ProfileEntry, EngineError> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| {
                EngineError::config(format!("Entry '{}' not found in profile '{}'", name, self.name))
            })
    }

    /// Render the profile's data as YAML, entries in config order.
    pub fn to_yaml(&self) -> Result<String, EngineError> {
        let mut mapping = serde_yaml_ng::Mapping::new();
        for entry in &self.entries {
            let value = serde_yaml_ng::to_value(entry)
                .map_err(|e| EngineError::config(format!("Cannot render entry '{}': {}", entry.name, e)))?;
            mapping.insert(serde_yaml_ng::Value::String(entry.name.clone()), value);
        }
        serde_yaml_ng::to_string(&mapping)
            .map_err(|e| EngineError::config(format!("Cannot render profile '{}': {}", self.name, e)))
    }
}

/// Every profile from one loaded configuration document, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSet {
    profiles: Vec<Profile>,
}

impl ProfileSet {
    pub fn new(profiles: Vec<Profile>) -> Self {
        ProfileSet { profiles }
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Profile names, exactly the document's top-level keys.
    pub fn profile_names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name.as_str()).collect()
    }

    /// Look up a profile by name.
    ///
    /// # Errors
    /// `ConfigInvalid` if the set is empty or has no such profile.
    pub fn get(&self, name: &str) -> Result<&Profile, EngineError> {
        if self.profiles.is_empty() {
            return Err(EngineError::config("No profiles found"));
        }
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| EngineError::config(format!("Profile '{}' not found in given config", name)))
    }
}

/// Which way a job moves files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// location -> staging
    Export,
    /// staging -> location
    Reapply,
}

/// Description of a single export invocation.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub profile_name: String,

    /// Directory the export (and archive) is written to; must exist
    pub export_directory: PathBuf,

    /// Root name of the export; defaults to the profile name
    pub export_name: Option<String>,

    /// Upgrade the archive format to a compressed variant
    pub compress: bool,

    /// Archive format override; `None` uses the engine default
    pub archive_format: Option<String>,

    pub dry_run: bool,

    /// Config file copied into the export root (best effort)
    pub config_snapshot: Option<PathBuf>,

    /// Re-hash every copied file
    pub verify: Option<ChecksumAlgorithm>,
}

impl ExportJob {
    pub fn new(profile_name: impl Into<String>, export_directory: impl Into<PathBuf>) -> Self {
        ExportJob {
            profile_name: profile_name.into(),
            export_directory: export_directory.into(),
            export_name: None,
            compress: false,
            archive_format: None,
            dry_run: false,
            config_snapshot: None,
            verify: None,
        }
    }

    pub fn with_export_name(mut self, name: impl Into<String>) -> Self {
        self.export_name = Some(name.into());
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_archive_format(mut self, format: impl Into<String>) -> Self {
        self.archive_format = Some(format.into());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_config_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_snapshot = Some(path.into());
        self
    }

    pub fn with_verify(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.verify = Some(algorithm);
        self
    }

    /// Export root name (explicit name or the profile name).
    pub fn resolved_export_name(&self) -> &str {
        match self.export_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.profile_name,
        }
    }
}

/// Description of a single reapply invocation.
#[derive(Debug, Clone)]
pub struct ReapplyJob {
    pub profile_name: String,

    /// Export directory or archive file to restore from
    pub backup_source: PathBuf,

    /// Working directory; `None` picks a fresh one under the temp root
    pub staging_directory: Option<PathBuf>,

    /// Remove the staging directory when the job ends
    pub delete_staging_after: bool,

    pub dry_run: bool,

    pub verify: Option<ChecksumAlgorithm>,
}

impl ReapplyJob {
    pub fn new(profile_name: impl Into<String>, backup_source: impl Into<PathBuf>) -> Self {
        ReapplyJob {
            profile_name: profile_name.into(),
            backup_source: backup_source.into(),
            staging_directory: None,
            delete_staging_after: true,
            dry_run: false,
            verify: None,
        }
    }

    pub fn with_staging_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.staging_directory = Some(path.into());
        self
    }

    pub fn keep_staging(mut self, keep: bool) -> Self {
        self.delete_staging_after = !keep;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_verify(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.verify = Some(algorithm);
        self
    }
}

/// State of one resolved copy pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemState {
    /// Not yet processed
    Pending,
    /// Copied (or, in dry-run, source verified present)
    Done,
    /// Source did not exist; skipped
    Missing,
    /// Copy attempted and failed
    Failed,
}

/// One `(source, destination)` pair processed by a job.
#[derive(Debug, Clone, Serialize)]
pub struct CopyItem {
    /// Entry this pair belongs to
    pub entry: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub state: ItemState,
    pub bytes_copied: u64,
    pub files_copied: usize,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
    /// `Some(false)` when a post-copy checksum differed
    pub verification_passed: Option<bool>,
}

impl CopyItem {
    pub fn new(entry: impl Into<String>, source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        CopyItem {
            entry: entry.into(),
            source: source.into(),
            destination: destination.into(),
            state: ItemState::Pending,
            bytes_copied: 0,
            files_copied: 0,
            error_code: None,
            error_message: None,
            verification_passed: None,
        }
    }

    pub(crate) fn fail(&mut self, err: &EngineError) {
        self.state = match err {
            EngineError::SourceNotFound { .. } => ItemState::Missing,
            _ => ItemState::Failed,
        };
        self.error_code = err.raw_os_error();
        self.error_message = Some(err.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Export,
    Reapply,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Export => write!(f, "export"),
            JobKind::Reapply => write!(f, "reapply"),
        }
    }
}

/// Completion status of a job that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Running,
    /// Everything copied
    Success,
    /// Checks only, nothing written
    DryRun,
    /// Finished, but some items were missing, failed or did not verify
    Partial,
}

/// Outcome of an export or reapply job.
///
/// Serializable so front ends can persist or print it as is.
#[derive(Debug, Serialize)]
pub struct JobReport {
    pub id: Uuid,
    pub kind: JobKind,
    pub profile: String,
    pub dry_run: bool,

    /// Archive file, export directory, or (reapply) retained staging directory
    pub artifact: Option<PathBuf>,

    pub items: Vec<CopyItem>,
    pub warnings: Vec<String>,
    pub status: JobStatus,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
}

impl JobReport {
    pub(crate) fn new(kind: JobKind, profile: &str, dry_run: bool) -> Self {
        JobReport {
            id: Uuid::new_v4(),
            kind,
            profile: profile.to_string(),
            dry_run,
            artifact: None,
            items: Vec::new(),
            warnings: Vec::new(),
            status: JobStatus::Running,
            started_at: Local::now(),
            finished_at: None,
        }
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    /// Items whose source was absent.
    pub fn missing(&self) -> impl Iterator<Item = &CopyItem> {
        self.items.iter().filter(|i| i.state == ItemState::Missing)
    }

    /// Items whose copy failed.
    pub fn failed(&self) -> impl Iterator<Item = &CopyItem> {
        self.items.iter().filter(|i| i.state == ItemState::Failed)
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    pub(crate) fn finish(&mut self) {
        let degraded = self.items.iter().any(|i| {
            matches!(i.state, ItemState::Missing | ItemState::Failed)
                || i.verification_passed == Some(false)
        });
        self.status = if self.dry_run {
            JobStatus::DryRun
        } else if degraded {
            JobStatus::Partial
        } else {
            JobStatus::Success
        };
        self.finished_at = Some(Local::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> ProfileSet {
        ProfileSet::new(vec![
            Profile::new(
                "desktop",
                vec![
                    ProfileEntry::new("kde", "/home/u/.config", vec!["kdeglobals", "kwinrc"]),
                    ProfileEntry::new("icons", "/home/u/.local/share/icons", vec![ALL_FILES]),
                ],
            ),
            Profile::new("empty", vec![]),
        ])
    }

    #[test]
    fn test_profile_names_keep_document_order() {
        assert_eq!(sample_set().profile_names(), vec!["desktop", "empty"]);
    }

    #[test]
    fn test_get_unknown_profile_is_config_invalid() {
        let err = sample_set().get("laptop").unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_get_on_empty_set_is_config_invalid() {
        let err = ProfileSet::default().get("desktop").unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_copies_everything() {
        let set = sample_set();
        let profile = set.get("desktop").expect("profile exists");
        assert!(!profile.entry("kde").expect("entry").copies_everything());
        assert!(profile.entry("icons").expect("entry").copies_everything());
        assert!(ProfileEntry::new("bare", "/x", Vec::<&str>::new()).copies_everything());
    }

    #[test]
    fn test_all_marker_only_counts_in_first_position() {
        let entry = ProfileEntry::new("e", "/x", vec!["a.txt", ALL_FILES]);
        assert!(!entry.copies_everything());
    }

    #[test]
    fn test_to_yaml_renders_entries_in_order() {
        let set = sample_set();
        let yaml = set.get("desktop").expect("profile").to_yaml().expect("render");
        let kde = yaml.find("kde:").expect("kde present");
        let icons = yaml.find("icons:").expect("icons present");
        assert!(kde < icons);
        assert!(yaml.contains("kwinrc"));
        assert!(yaml.contains("location: /home/u/.config"));
    }

    #[test]
    fn test_export_name_defaults_to_profile() {
        let job = ExportJob::new("desktop", "/tmp");
        assert_eq!(job.resolved_export_name(), "desktop");
        let job = job.with_export_name("nightly");
        assert_eq!(job.resolved_export_name(), "nightly");
    }

    #[test]
    fn test_report_status_partial_on_missing_item() {
        let mut report = JobReport::new(JobKind::Export, "desktop", false);
        let mut item = CopyItem::new("kde", "/a", "/b");
        item.fail(&EngineError::SourceNotFound { path: PathBuf::from("/a") });
        report.items.push(item);
        report.finish();
        assert_eq!(report.status, JobStatus::Partial);
        assert_eq!(report.missing().count(), 1);
    }

    #[test]
    fn test_report_status_partial_on_checksum_mismatch() {
        let mut report = JobReport::new(JobKind::Export, "desktop", false);
        let mut verified = CopyItem::new("kde", "/a", "/b");
        verified.state = ItemState::Done;
        verified.verification_passed = Some(true);
        let mut mismatched = CopyItem::new("kde", "/c", "/d");
        mismatched.state = ItemState::Done;
        mismatched.verification_passed = Some(false);
        report.items.push(verified);
        report.items.push(mismatched);

        report.finish();
        assert_eq!(report.status, JobStatus::Partial);
        assert_eq!(report.missing().count(), 0);
        assert_eq!(report.failed().count(), 0);
    }

    #[test]
    fn test_report_status_dry_run_wins() {
        let mut report = JobReport::new(JobKind::Reapply, "desktop", true);
        report.finish();
        assert_eq!(report.status, JobStatus::DryRun);
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn test_report_serializes_with_id_and_timestamps() {
        let mut report = JobReport::new(JobKind::Export, "desktop", false);
        report.items.push(CopyItem::new("kde", "/a", "/b"));
        report.finish();

        let yaml = serde_yaml_ng::to_string(&report).expect("Failed to serialize report");
        assert!(yaml.contains(&report.id.to_string()));
        assert!(yaml.contains("kind: export"));
        assert!(yaml.contains("status: Success"));
        assert!(yaml.contains("finished_at:"));
    }
}
