//! Reapply engine.
//!
//! Stages a backup (export directory or archive) in a private working
//! directory, then copies each entry back to its declared location. The
//! original backup is only ever read.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::allocator;
use crate::archive::{self, strip_archive_extension};
use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{Direction, JobKind, JobReport, ProfileSet, ReapplyJob};
use crate::progress::ProgressCallback;
use crate::settings::EngineSettings;
use crate::transfer::EntryRunner;

/// Logged when a reapply completes.
pub const PERMISSIONS_REMINDER: &str =
    "Ownership and permission bits of restored files are not guaranteed to match the originals";

#[derive(Debug, Clone, Default)]
pub struct Reapplier {
    settings: EngineSettings,
}

impl Reapplier {
    pub fn new(settings: EngineSettings) -> Self {
        Reapplier { settings }
    }

    /// Restore one profile from `job.backup_source`.
    ///
    /// # Errors
    /// - `ConfigInvalid` for an unknown profile
    /// - `SourceNotFound` if the backup does not exist
    /// - `UnpackError` if the backup is a file that is not a readable
    ///   archive; the staging directory is removed first
    pub fn reapply(
        &self,
        profiles: &ProfileSet,
        job: &ReapplyJob,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<JobReport, EngineError> {
        self.run(profiles, job, progress).map_err(|e| {
            tracing::error!(
                "Reapply of profile '{}' from {} failed: {}",
                job.profile_name,
                job.backup_source.display(),
                e
            );
            e
        })
    }

    fn run(
        &self,
        profiles: &ProfileSet,
        job: &ReapplyJob,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<JobReport, EngineError> {
        let profile = profiles.get(&job.profile_name)?;
        let backup = &job.backup_source;
        let from_directory = match fs::metadata(backup) {
            Ok(metadata) => metadata.is_dir(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::SourceNotFound { path: backup.clone() })
            }
            Err(e) => {
                return Err(EngineError::ReadError {
                    path: backup.clone(),
                    source: e,
                })
            }
        };

        let mut report = JobReport::new(JobKind::Reapply, &profile.name, job.dry_run);
        let staging = job.staging_directory.clone().unwrap_or_else(|| {
            self.settings
                .temp_root
                .join(format!("{}-{}", self.settings.staging_prefix, report.id))
        });
        let stage_name = staged_root_name(backup, from_directory);

        tracing::info!(
            "Starting reapply of profile '{}' from {}{}",
            profile.name,
            backup.display(),
            if job.dry_run { " (dry run)" } else { "" }
        );
        if let Some(progress) = progress {
            progress.on_job_started(&report);
        }

        let runner = EntryRunner {
            direction: Direction::Reapply,
            dry_run: job.dry_run,
            verify: job.verify,
            progress,
        };

        if job.dry_run {
            if from_directory {
                for entry in &profile.entries {
                    runner.run(&mut report, entry, backup, &|path: &Path| path.exists());
                }
            } else {
                let listed = archive::list_entries(backup)?;
                let staged_root = staging.join(&stage_name);
                let in_archive = |path: &Path| match path.strip_prefix(&staged_root) {
                    Ok(relative) => listed.iter().any(|p| p.starts_with(relative)),
                    Err(_) => false,
                };
                for entry in &profile.entries {
                    runner.run(&mut report, entry, &staged_root, &in_archive);
                }
            }
        } else {
            let staging = allocator::allocate(&staging, true)?.path;
            let staged_root = staging.join(&stage_name);
            if let Err(e) = self.stage(backup, &staged_root, from_directory, &mut report) {
                discard(&staging);
                return Err(e);
            }

            for entry in &profile.entries {
                runner.run(&mut report, entry, &staged_root, &|path: &Path| path.exists());
            }

            if job.delete_staging_after {
                match fs_ops::remove_tree(&staging) {
                    Ok(()) => tracing::info!("Removed staging directory {}", staging.display()),
                    Err(e) => report.warn(format!("Could not remove staging directory: {}", e)),
                }
            } else {
                tracing::info!("Keeping staging directory {}", staging.display());
                report.artifact = Some(staging);
            }
        }

        report.finish();
        tracing::info!(
            "Reapply of profile '{}' finished with status {:?}",
            profile.name,
            report.status
        );
        if !job.dry_run {
            tracing::info!("{}", PERMISSIONS_REMINDER);
        }
        if let Some(progress) = progress {
            progress.on_job_completed(&report);
        }
        Ok(report)
    }

    fn stage(
        &self,
        backup: &Path,
        staged_root: &Path,
        from_directory: bool,
        report: &mut JobReport,
    ) -> Result<(), EngineError> {
        tracing::info!("Staging {} in {}", backup.display(), staged_root.display());
        if from_directory {
            let stats = fs_ops::copy(backup, staged_root)?;
            for e in stats.errors {
                report.warn(format!("Could not stage: {}", e));
            }
        } else {
            let format = archive::extract_archive(backup, staged_root)?;
            tracing::debug!("Extracted {} archive {}", format, backup.display());
        }
        Ok(())
    }
}

/// Directory name the backup is staged under.
fn staged_root_name(backup: &Path, from_directory: bool) -> PathBuf {
    let name = backup
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    if from_directory {
        PathBuf::from(name)
    } else {
        PathBuf::from(strip_archive_extension(&name))
    }
}

fn discard(staging: &Path) {
    match fs_ops::remove_tree(staging) {
        Ok(()) => tracing::debug!("Removed staging directory {}", staging.display()),
        Err(e) => tracing::warn!("Could not remove staging directory {}: {}", staging.display(), e),
    }
}
