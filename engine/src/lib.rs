//! # dotsnap engine - profile-based config backup and restore
//!
//! A headless library that exports named collections of configuration files
//! ("profiles") to a directory or archive, and reapplies them later to their
//! original locations. Front ends (the `dotsnap` CLI) sit on top of it.
//!
//! ## Overview
//!
//! - Profiles are loaded from a YAML document with keyword and function
//!   tokens already substituted
//! - Export copies every entry into a fresh (never reused) export root, then
//!   optionally archives it as tar, gzipped tar or zip
//! - Reapply stages a backup in a private working directory and copies each
//!   entry back, merging into whatever is already there
//! - Missing sources and per-file failures never abort a job; they are
//!   recorded on the `JobReport`
//! - Dry-run performs every check without touching the filesystem
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{load_profiles, EngineSettings, ExportJob, Exporter, TokenContext};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let profiles = load_profiles("profiles.yaml".as_ref(), &TokenContext::from_environment())?;
//!
//! let job = ExportJob::new("desktop", "/backups").with_compress(true);
//! let report = Exporter::new(EngineSettings::default()).export(&profiles, &job, None)?;
//!
//! println!("{:?}: {:?}", report.status, report.artifact_path());
//! for item in report.missing() {
//!     println!("missing: {}", item.source.display());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Profiles, jobs and reports
//! - **config**: Profile document loading and token substitution
//! - **paths**: Copy pair resolution for entries
//! - **allocator**: Never-overwrite allocation of working directories
//! - **fs_ops**: Merging recursive copy
//! - **archive**: Archive creation, detection and extraction
//! - **export** / **reapply**: The two job engines
//! - **checksums**: Optional verify-after-copy

pub mod allocator;
pub mod archive;
pub mod checksums;
pub mod config;
pub mod error;
pub mod export;
pub mod fs_ops;
pub mod model;
pub mod paths;
pub mod progress;
pub mod reapply;
pub mod settings;
mod transfer;

pub use archive::ArchiveFormat;
pub use checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
pub use config::{load_profiles, parse_profiles, TokenContext};
pub use error::EngineError;
pub use export::{BatchOutcome, Exporter};
pub use model::{
    CopyItem, ExportJob, ItemState, JobKind, JobReport, JobStatus, Profile, ProfileEntry, ProfileSet,
    ReapplyJob, ALL_FILES,
};
pub use progress::ProgressCallback;
pub use reapply::{Reapplier, PERMISSIONS_REMINDER};
pub use settings::EngineSettings;
