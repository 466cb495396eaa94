//! Per-entry copy loop shared by export and reapply.
//!
//! Every pair becomes one `CopyItem` on the report. Nothing in here returns
//! an error: missing sources and failed copies are recorded on the item,
//! logged, and the loop moves on.

use std::path::Path;

use crate::checksums::{verify_copy, ChecksumAlgorithm};
use crate::error::EngineError;
use crate::fs_ops::{self, CopiedFile};
use crate::model::{CopyItem, Direction, ItemState, JobReport, ProfileEntry};
use crate::paths::{join_component, resolve_pairs};
use crate::progress::ProgressCallback;

pub(crate) struct EntryRunner<'a> {
    pub direction: Direction,
    pub dry_run: bool,
    pub verify: Option<ChecksumAlgorithm>,
    pub progress: Option<&'a dyn ProgressCallback>,
}

impl EntryRunner<'_> {
    /// Process one entry against `staging_root`.
    ///
    /// `source_exists` answers the dry-run existence check; reapply from an
    /// archive checks the archive listing instead of the disk.
    pub(crate) fn run(
        &self,
        report: &mut JobReport,
        entry: &ProfileEntry,
        staging_root: &Path,
        source_exists: &dyn Fn(&Path) -> bool,
    ) {
        tracing::info!("Processing entry '{}' ({})", entry.name, entry.location.display());
        if let Some(progress) = self.progress {
            progress.on_entry_started(report, entry);
        }

        let entry_dir = match join_component(staging_root, &entry.name) {
            Ok(dir) => dir,
            Err(e) => {
                let mut item = CopyItem::new(&entry.name, &entry.location, staging_root);
                item.fail(&e);
                self.record(report, item);
                return;
            }
        };

        if self.direction == Direction::Export && !self.dry_run {
            if let Err(e) = std::fs::create_dir_all(&entry_dir) {
                report.warn(format!("Could not create {}: {}", entry_dir.display(), e));
            }
        }

        for pair in resolve_pairs(entry, &entry_dir, self.direction) {
            let item = match pair {
                Ok(pair) => {
                    let mut item = CopyItem::new(&entry.name, &pair.source, &pair.destination);
                    if self.dry_run {
                        if source_exists(&pair.source) {
                            tracing::debug!(
                                "Would copy {} -> {}",
                                pair.source.display(),
                                pair.destination.display()
                            );
                            item.state = ItemState::Done;
                        } else {
                            item.fail(&EngineError::SourceNotFound {
                                path: pair.source.clone(),
                            });
                        }
                    } else {
                        self.copy_item(&mut item);
                    }
                    item
                }
                Err(e) => {
                    let mut item = CopyItem::new(&entry.name, &entry.location, &entry_dir);
                    item.fail(&e);
                    item
                }
            };
            self.record(report, item);
        }
    }

    fn copy_item(&self, item: &mut CopyItem) {
        let stats = match fs_ops::copy(&item.source, &item.destination) {
            Ok(stats) => stats,
            Err(e) => {
                item.fail(&e);
                return;
            }
        };

        item.files_copied = stats.files.len();
        item.bytes_copied = stats.bytes();
        tracing::debug!(
            "Copied {} -> {} ({} files, {} bytes)",
            item.source.display(),
            item.destination.display(),
            item.files_copied,
            item.bytes_copied
        );

        if let Some(algorithm) = self.verify {
            item.verification_passed = Some(verify_all(&stats.files, algorithm));
        }

        match stats.errors.split_first() {
            Some((first, rest)) => {
                for e in rest {
                    tracing::warn!("{}", e);
                }
                item.fail(first);
                if !rest.is_empty() {
                    item.error_message = Some(format!("{} (and {} more)", first, rest.len()));
                }
            }
            None => item.state = ItemState::Done,
        }
    }

    fn record(&self, report: &mut JobReport, item: CopyItem) {
        match item.state {
            ItemState::Missing | ItemState::Failed => {
                let message = item.error_message.as_deref().unwrap_or("unknown error");
                report.warn(format!("Entry '{}': {}", item.entry, message));
            }
            _ => {}
        }
        if item.verification_passed == Some(false) {
            report.warn(format!("Entry '{}': {} did not verify", item.entry, item.destination.display()));
        }

        report.items.push(item);
        if let (Some(progress), Some(item)) = (self.progress, report.items.last()) {
            progress.on_item_completed(report, item);
        }
    }
}

fn verify_all(files: &[CopiedFile], algorithm: ChecksumAlgorithm) -> bool {
    let mut passed = true;
    for file in files {
        match verify_copy(&file.source, &file.destination, algorithm) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("{} checksum mismatch: {}", algorithm, file.destination.display());
                passed = false;
            }
            Err(e) => {
                tracing::warn!("Could not verify {}: {}", file.destination.display(), e);
                passed = false;
            }
        }
    }
    passed
}
