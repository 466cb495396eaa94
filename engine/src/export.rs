//! Export engine.
//!
//! One linear pass per job: validate, negotiate the archive format, allocate
//! the export root, copy every entry, snapshot the config, archive, clean up.
//! Dry-run walks the same path but replaces every mutation with an
//! existence check.

use std::fs;
use std::path::{Path, PathBuf};

use crate::allocator;
use crate::archive::{self, ArchiveFormat};
use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{Direction, ExportJob, JobKind, JobReport, ProfileSet};
use crate::paths::join_component;
use crate::progress::ProgressCallback;
use crate::settings::EngineSettings;
use crate::transfer::EntryRunner;

/// Result of one profile within `Exporter::export_all`.
#[derive(Debug)]
pub struct BatchOutcome {
    pub profile: String,
    pub result: Result<JobReport, EngineError>,
}

#[derive(Debug, Clone, Default)]
pub struct Exporter {
    settings: EngineSettings,
}

impl Exporter {
    pub fn new(settings: EngineSettings) -> Self {
        Exporter { settings }
    }

    /// Export one profile.
    ///
    /// Missing sources and per-file failures end up on the report (status
    /// `Partial`). Errors are returned only when the job cannot run at all:
    /// unknown profile, missing export directory, unsupported format, or a
    /// failed archive step.
    pub fn export(
        &self,
        profiles: &ProfileSet,
        job: &ExportJob,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<JobReport, EngineError> {
        self.run(profiles, job, progress).map_err(|e| {
            tracing::error!(
                "Export of profile '{}' to {} failed: {}",
                job.profile_name,
                job.export_directory.display(),
                e
            );
            e
        })
    }

    /// Export every profile, in document order, each under its own name.
    ///
    /// `template` supplies everything but the profile and export name. A
    /// failing profile is logged and recorded; the rest still run.
    pub fn export_all(
        &self,
        profiles: &ProfileSet,
        template: &ExportJob,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<Vec<BatchOutcome>, EngineError> {
        if profiles.is_empty() {
            return Err(EngineError::config("No profiles found"));
        }

        Ok(profiles
            .profile_names()
            .into_iter()
            .map(|name| {
                let mut job = template.clone();
                job.profile_name = name.to_string();
                job.export_name = Some(name.to_string());
                BatchOutcome {
                    profile: name.to_string(),
                    result: self.export(profiles, &job, progress),
                }
            })
            .collect())
    }

    fn run(
        &self,
        profiles: &ProfileSet,
        job: &ExportJob,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<JobReport, EngineError> {
        let profile = profiles.get(&job.profile_name)?;
        if !job.export_directory.is_dir() {
            return Err(EngineError::PathInvalid {
                path: job.export_directory.clone(),
                reason: "export directory does not exist".to_string(),
            });
        }

        let mut report = JobReport::new(JobKind::Export, &profile.name, job.dry_run);
        let format = self.negotiate_format(job, &mut report)?;
        let requested_root = join_component(&job.export_directory, job.resolved_export_name())?;

        // A plain directory export accumulates in place
        let rename_aside = format.is_some();
        let root = if job.dry_run {
            let allocation = allocator::plan(&requested_root, rename_aside)?;
            if let Some(displaced) = &allocation.displaced {
                report.warn(format!(
                    "{} is not empty; would export to {}",
                    displaced.display(),
                    allocation.path.display()
                ));
            }
            allocation.path
        } else {
            let allocation = allocator::allocate(&requested_root, rename_aside)?;
            if let Some(displaced) = &allocation.displaced {
                report.warnings.push(format!(
                    "{} is not empty; exported to {}",
                    displaced.display(),
                    allocation.path.display()
                ));
            }
            allocation.path
        };

        tracing::info!(
            "Starting export of profile '{}' to {}{}",
            profile.name,
            root.display(),
            if job.dry_run { " (dry run)" } else { "" }
        );
        if let Some(progress) = progress {
            progress.on_job_started(&report);
        }

        let runner = EntryRunner {
            direction: Direction::Export,
            dry_run: job.dry_run,
            verify: job.verify,
            progress,
        };
        for entry in &profile.entries {
            runner.run(&mut report, entry, &root, &|path: &Path| path.exists());
        }

        if let Some(snapshot) = &job.config_snapshot {
            self.snapshot_config(snapshot, &root, job.dry_run, &mut report);
        }

        if !job.dry_run && fs_ops::is_empty_dir(&root) {
            report.warn(format!("Export {} is empty", root.display()));
        }

        report.artifact = Some(match format {
            Some(format) => self.archive(&root, &job.export_directory, format, job.dry_run, &mut report)?,
            None => root,
        });

        report.finish();
        tracing::info!(
            "Export of profile '{}' finished with status {:?}: {}",
            profile.name,
            report.status,
            report.artifact_path().map(|p| p.display().to_string()).unwrap_or_default()
        );
        if let Some(progress) = progress {
            progress.on_job_completed(&report);
        }
        Ok(report)
    }

    /// Explicit format, else the default; then apply `compress`.
    fn negotiate_format(&self, job: &ExportJob, report: &mut JobReport) -> Result<Option<ArchiveFormat>, EngineError> {
        let name = job
            .archive_format
            .as_deref()
            .unwrap_or(&self.settings.default_archive_format);
        let format = ArchiveFormat::parse(name)?;

        if !job.compress {
            return Ok(format);
        }
        match format {
            Some(format) => {
                let (compressed, warning) = format.compressed();
                if let Some(warning) = warning {
                    report.warn(warning);
                }
                Ok(Some(compressed))
            }
            None => {
                report.warn("Compression has no effect when archiving is disabled");
                Ok(None)
            }
        }
    }

    /// Copy the config file into the export root. Never fails the job.
    fn snapshot_config(&self, snapshot: &Path, root: &Path, dry_run: bool, report: &mut JobReport) {
        let file_name = match snapshot.file_name() {
            Some(name) if snapshot.is_file() => name,
            _ => {
                report.warn(format!("Config snapshot {} not found; skipped", snapshot.display()));
                return;
            }
        };
        if dry_run {
            tracing::debug!("Would copy config snapshot {}", snapshot.display());
            return;
        }
        match fs_ops::copy_file_with_metadata(snapshot, &root.join(file_name)) {
            Ok(_) => tracing::debug!("Copied config snapshot {}", snapshot.display()),
            Err(e) => report.warn(format!("Could not copy config snapshot: {}", e)),
        }
    }

    /// Archive `root` next to it and remove the staging tree.
    fn archive(
        &self,
        root: &Path,
        export_directory: &Path,
        format: ArchiveFormat,
        dry_run: bool,
        report: &mut JobReport,
    ) -> Result<PathBuf, EngineError> {
        let stem = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let allocation = allocator::plan_file(export_directory, &stem, format.extension());
        if let Some(displaced) = &allocation.displaced {
            report.warn(format!(
                "{} already exists; archiving to {}",
                displaced.display(),
                allocation.path.display()
            ));
        }

        if dry_run {
            tracing::info!("Would create {} archive {}", format, allocation.path.display());
            return Ok(allocation.path);
        }

        tracing::info!("Creating {} archive {}", format, allocation.path.display());
        archive::create_archive(root, &allocation.path, format)?;

        match fs_ops::remove_tree(root) {
            Ok(()) => tracing::info!("Removed staging directory {}", root.display()),
            Err(e) => report.warn(format!("Could not remove staging directory: {}", e)),
        }
        Ok(allocation.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemState, JobStatus, Profile, ProfileEntry, ALL_FILES};
    use std::collections::BTreeSet;

    struct Fixture {
        _temp: tempfile::TempDir,
        src: PathBuf,
        out: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp.path().join("src");
        let out = temp.path().join("out");
        fs::create_dir_all(&src).expect("Failed to create src");
        fs::create_dir_all(&out).expect("Failed to create out");
        Fixture { _temp: temp, src, out }
    }

    fn docs_profile(src: &Path) -> ProfileSet {
        ProfileSet::new(vec![Profile::new(
            "myprofile",
            vec![ProfileEntry::new("docs", src, vec!["a.txt", "b.txt"])],
        )])
    }

    fn snapshot(dir: &Path) -> BTreeSet<PathBuf> {
        let mut paths = BTreeSet::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            for entry in fs::read_dir(&current).expect("Failed to read dir") {
                let path = entry.expect("Failed to read entry").path();
                if path.is_dir() {
                    stack.push(path.clone());
                }
                paths.insert(path);
            }
        }
        paths
    }

    fn plain() -> Exporter {
        Exporter::new(EngineSettings::default().with_default_archive_format("null"))
    }

    #[test]
    fn test_missing_file_yields_partial_export() {
        let fx = fixture();
        fs::write(fx.src.join("a.txt"), "alpha").expect("Failed to write file");

        let job = ExportJob::new("myprofile", &fx.out);
        let report = plain()
            .export(&docs_profile(&fx.src), &job, None)
            .expect("Export should run");

        assert_eq!(report.status, JobStatus::Partial);
        assert_eq!(report.missing().count(), 1);
        assert!(report.missing().all(|i| i.source.ends_with("b.txt")));
        let root = fx.out.join("myprofile");
        assert_eq!(report.artifact_path(), Some(root.as_path()));
        assert_eq!(fs::read_to_string(root.join("docs/a.txt")).expect("read"), "alpha");
        assert!(!root.join("docs/b.txt").exists());
    }

    #[test]
    fn test_archive_contains_only_existing_files() {
        let fx = fixture();
        fs::write(fx.src.join("a.txt"), "alpha").expect("Failed to write file");

        let job = ExportJob::new("myprofile", &fx.out).with_archive_format("tar");
        let report = Exporter::default()
            .export(&docs_profile(&fx.src), &job, None)
            .expect("Export should run");

        let archive_path = fx.out.join("myprofile.tar");
        assert_eq!(report.artifact_path(), Some(archive_path.as_path()));
        assert!(!fx.out.join("myprofile").exists());

        let entries = archive::list_entries(&archive_path).expect("Failed to list archive");
        assert!(entries.contains(&PathBuf::from("docs/a.txt")));
        assert!(!entries.iter().any(|p| p.ends_with("b.txt")));
    }

    #[test]
    fn test_occupied_export_dir_is_renamed_aside() {
        let fx = fixture();
        fs::write(fx.src.join("a.txt"), "new").expect("Failed to write file");
        let old = fx.out.join("myprofile");
        fs::create_dir_all(&old).expect("Failed to create dir");
        fs::write(old.join("old.txt"), "previous").expect("Failed to write file");

        let job = ExportJob::new("myprofile", &fx.out).with_archive_format("zip");
        let report = Exporter::default()
            .export(&docs_profile(&fx.src), &job, None)
            .expect("Export should run");

        let artifact = report.artifact_path().expect("artifact").to_path_buf();
        let name = artifact.file_name().expect("name").to_string_lossy().into_owned();
        assert!(name.starts_with("myprofile_"), "{}", name);
        assert!(name.ends_with(".zip"));
        assert_eq!(fs::read_to_string(old.join("old.txt")).expect("read"), "previous");
        assert!(report.warnings.iter().any(|w| w.contains("not empty")));
    }

    #[test]
    fn test_plain_export_accumulates_in_place() {
        let fx = fixture();
        fs::write(fx.src.join("a.txt"), "v2").expect("Failed to write file");
        let root = fx.out.join("myprofile");
        fs::create_dir_all(root.join("docs")).expect("Failed to create dir");
        fs::write(root.join("docs/unrelated.txt"), "keep").expect("Failed to write file");
        fs::write(root.join("docs/a.txt"), "v1").expect("Failed to write file");

        let job = ExportJob::new("myprofile", &fx.out);
        plain().export(&docs_profile(&fx.src), &job, None).expect("Export should run");

        assert_eq!(fs::read_to_string(root.join("docs/a.txt")).expect("read"), "v2");
        assert!(root.join("docs/unrelated.txt").exists());
    }

    #[test]
    fn test_all_marker_copies_whole_tree() {
        let fx = fixture();
        fs::create_dir_all(fx.src.join("x/deep")).expect("Failed to create dir");
        fs::write(fx.src.join("x/deep/z.txt"), "z").expect("Failed to write file");
        fs::write(fx.src.join("y.txt"), "y").expect("Failed to write file");
        let profiles = ProfileSet::new(vec![Profile::new(
            "p",
            vec![ProfileEntry::new("tree", &fx.src, vec![ALL_FILES])],
        )]);

        let report = plain()
            .export(&profiles, &ExportJob::new("p", &fx.out), None)
            .expect("Export should run");

        assert_eq!(report.status, JobStatus::Success);
        assert!(fx.out.join("p/tree/x/deep/z.txt").is_file());
        assert!(fx.out.join("p/tree/y.txt").is_file());
        assert_eq!(report.items[0].files_copied, 2);
    }

    #[test]
    fn test_absolute_file_is_flattened() {
        let fx = fixture();
        let conf = fx.src.join("app.conf");
        fs::write(&conf, "setting=1").expect("Failed to write file");
        let profiles = ProfileSet::new(vec![Profile::new(
            "p",
            vec![ProfileEntry::new(
                "app".to_string(),
                "/unused",
                vec![conf.to_string_lossy().into_owned()],
            )],
        )]);

        plain()
            .export(&profiles, &ExportJob::new("p", &fx.out), None)
            .expect("Export should run");
        assert_eq!(fs::read_to_string(fx.out.join("p/app/app")).expect("read"), "setting=1");
    }

    #[test]
    fn test_dry_run_mutates_nothing() {
        let fx = fixture();
        fs::write(fx.src.join("a.txt"), "alpha").expect("Failed to write file");
        let config = fx.src.join("profiles.yaml");
        fs::write(&config, "myprofile: {}").expect("Failed to write file");
        let before = snapshot(fx.out.parent().expect("parent"));

        for format in ["tar", "null"] {
            let job = ExportJob::new("myprofile", &fx.out)
                .with_archive_format(format)
                .with_config_snapshot(&config)
                .with_compress(true)
                .with_dry_run(true);
            let report = Exporter::default()
                .export(&docs_profile(&fx.src), &job, None)
                .expect("Dry run should succeed");
            assert_eq!(report.status, JobStatus::DryRun);
            assert_eq!(report.items[0].state, ItemState::Done);
            assert_eq!(report.items[1].state, ItemState::Missing);
        }

        assert_eq!(snapshot(fx.out.parent().expect("parent")), before);
    }

    #[test]
    fn test_unknown_format_fails_before_copying() {
        let fx = fixture();
        fs::write(fx.src.join("a.txt"), "alpha").expect("Failed to write file");

        let job = ExportJob::new("myprofile", &fx.out).with_archive_format("rar");
        let err = Exporter::default()
            .export(&docs_profile(&fx.src), &job, None)
            .unwrap_err();

        assert!(matches!(err, EngineError::FormatInvalid { .. }));
        assert!(fs_ops::is_empty_dir(&fx.out));
    }

    #[test]
    fn test_unknown_profile_and_missing_directory_are_fatal() {
        let fx = fixture();
        let profiles = docs_profile(&fx.src);

        let err = plain()
            .export(&profiles, &ExportJob::new("other", &fx.out), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid { .. }));

        let err = plain()
            .export(&profiles, &ExportJob::new("myprofile", fx.out.join("missing")), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::PathInvalid { .. }));
    }

    #[test]
    fn test_compress_upgrades_tar_to_gztar() {
        let fx = fixture();
        fs::write(fx.src.join("a.txt"), "alpha").expect("Failed to write file");

        let job = ExportJob::new("myprofile", &fx.out)
            .with_archive_format("tar")
            .with_compress(true);
        let report = Exporter::default()
            .export(&docs_profile(&fx.src), &job, None)
            .expect("Export should run");

        let artifact = report.artifact_path().expect("artifact");
        assert_eq!(artifact, fx.out.join("myprofile.tar.gz"));
        assert_eq!(ArchiveFormat::detect(artifact).expect("detect"), ArchiveFormat::GzTar);
    }

    #[test]
    fn test_compress_on_zip_falls_back_with_warning() {
        let fx = fixture();
        fs::write(fx.src.join("a.txt"), "alpha").expect("Failed to write file");
        fs::write(fx.src.join("b.txt"), "beta").expect("Failed to write file");

        let job = ExportJob::new("myprofile", &fx.out)
            .with_archive_format("zip")
            .with_compress(true);
        let report = Exporter::default()
            .export(&docs_profile(&fx.src), &job, None)
            .expect("Export should run");

        assert_eq!(report.status, JobStatus::Success);
        assert!(report.warnings.iter().any(|w| w.contains("compressed variant")));
        assert_eq!(report.artifact_path(), Some(fx.out.join("myprofile.zip").as_path()));
    }

    #[test]
    fn test_config_snapshot_lands_in_root() {
        let fx = fixture();
        fs::write(fx.src.join("a.txt"), "alpha").expect("Failed to write file");
        let config = fx.src.join("profiles.yaml");
        fs::write(&config, "myprofile: {}").expect("Failed to write file");

        let job = ExportJob::new("myprofile", &fx.out).with_config_snapshot(&config);
        plain().export(&docs_profile(&fx.src), &job, None).expect("Export should run");
        assert!(fx.out.join("myprofile/profiles.yaml").is_file());

        let job = ExportJob::new("myprofile", &fx.out).with_config_snapshot(fx.src.join("gone.yaml"));
        let report = plain().export(&docs_profile(&fx.src), &job, None).expect("Export should run");
        assert!(report.warnings.iter().any(|w| w.contains("gone.yaml")));
    }

    #[test]
    fn test_existing_archive_is_not_overwritten() {
        let fx = fixture();
        fs::write(fx.src.join("a.txt"), "alpha").expect("Failed to write file");
        fs::write(fx.out.join("myprofile.tar"), "older export").expect("Failed to write file");

        let job = ExportJob::new("myprofile", &fx.out).with_archive_format("tar");
        let report = Exporter::default()
            .export(&docs_profile(&fx.src), &job, None)
            .expect("Export should run");

        assert_ne!(report.artifact_path(), Some(fx.out.join("myprofile.tar").as_path()));
        assert_eq!(
            fs::read_to_string(fx.out.join("myprofile.tar")).expect("read"),
            "older export"
        );
    }

    #[test]
    fn test_export_all_continues_after_failure() {
        let fx = fixture();
        fs::write(fx.src.join("a.txt"), "alpha").expect("Failed to write file");
        let profiles = ProfileSet::new(vec![
            Profile::new("bad/name", vec![ProfileEntry::new("e", &fx.src, vec!["a.txt"])]),
            Profile::new("good", vec![ProfileEntry::new("e", &fx.src, vec!["a.txt"])]),
        ]);

        let template = ExportJob::new("", &fx.out).with_archive_format("null");
        let outcomes = Exporter::default()
            .export_all(&profiles, &template, None)
            .expect("batch runs");

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].profile, "bad/name");
        assert!(matches!(outcomes[0].result, Err(EngineError::PathInvalid { .. })));
        assert_eq!(outcomes[1].profile, "good");
        let report = outcomes[1].result.as_ref().expect("good profile exports");
        assert_eq!(report.status, JobStatus::Success);
        assert!(fx.out.join("good/e/a.txt").is_file());
        assert!(!fx.out.join("bad").exists());
    }

    #[test]
    fn test_export_all_rejects_empty_set() {
        let fx = fixture();
        let template = ExportJob::new("", &fx.out);
        let err = Exporter::default()
            .export_all(&ProfileSet::new(Vec::new()), &template, None)
            .expect_err("empty set is rejected");
        assert!(matches!(err, EngineError::ConfigInvalid { .. }));
    }
}
