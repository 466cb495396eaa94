//! Progress reporting trait.
//!
//! Decouples the export and reapply engines from whatever is showing
//! progress to the user. The CLI implements it for terminal output.

use crate::model::{CopyItem, JobReport, ProfileEntry};

/// Receives progress updates from a running export or reapply job.
///
/// All methods are called synchronously on the job's thread.
pub trait ProgressCallback {
    /// Called once validation has passed and work is about to begin.
    fn on_job_started(&self, report: &JobReport);

    /// Called before the pairs of an entry are processed.
    fn on_entry_started(&self, report: &JobReport, entry: &ProfileEntry);

    /// Called when a copy pair reaches a terminal state (done, missing, failed).
    fn on_item_completed(&self, report: &JobReport, item: &CopyItem);

    /// Called after the report's final status is set.
    fn on_job_completed(&self, report: &JobReport);
}
