//! dotsnap - command-line interface for the profile backup engine.
//!
//! Lists and prints profiles, exports them to a directory or archive, and
//! reapplies an export. Exit code 0 means success (or a clean dry run), 1 a
//! job that finished with missing or failed items, 2 a failure.

mod logging;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use clap::{ArgAction, ArgGroup, Parser};
use engine::{
    load_profiles, ChecksumAlgorithm, CopyItem, EngineSettings, ExportJob, Exporter, ItemState, JobKind,
    JobReport, JobStatus, ProfileEntry, ProfileSet, ProgressCallback, Reapplier, ReapplyJob, TokenContext,
    PERMISSIONS_REMINDER,
};

const EXIT_OK: i32 = 0;
const EXIT_PARTIAL: i32 = 1;
const EXIT_FAILURE: i32 = 2;

/// dotsnap - back up and restore configuration profiles
#[derive(Parser, Debug)]
#[command(name = "dotsnap")]
#[command(version)]
#[command(about = "Export and reapply declarative configuration profiles")]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["list", "print", "export_profile", "export_all", "reapply_profile"])
))]
struct Args {
    /// Profile document (defaults to <config dir>/dotsnap/profiles.yaml)
    #[arg(short, long, value_name = "PATH", env = "DOTSNAP_CONFIG")]
    config: Option<PathBuf>,

    /// List profile names
    #[arg(short, long)]
    list: bool,

    /// Print one profile's entries
    #[arg(short, long, value_name = "PROFILE")]
    print: Option<String>,

    /// Export directory, or the backup to reapply from
    #[arg(short, long, value_name = "PATH")]
    directory: Option<PathBuf>,

    /// Export one profile
    #[arg(short, long, value_name = "PROFILE")]
    export_profile: Option<String>,

    /// Export every profile, each under its own name
    #[arg(long)]
    export_all: bool,

    /// Name of the export (defaults to the profile name)
    #[arg(short = 'n', long, value_name = "NAME")]
    export_name: Option<String>,

    /// Compress the archive
    #[arg(short = 'z', long)]
    compress: bool,

    /// Archive format: tar, gztar, zip, or null for a plain directory
    #[arg(short, long, value_name = "FORMAT")]
    format: Option<String>,

    /// Reapply one profile from --directory
    #[arg(short = 'a', long, value_name = "PROFILE")]
    reapply_profile: Option<String>,

    /// Staging directory for reapply
    #[arg(long, value_name = "PATH")]
    temp_dir: Option<PathBuf>,

    /// Keep the staging directory after reapply
    #[arg(long)]
    no_clear: bool,

    /// Check everything, write nothing
    #[arg(long)]
    dry_run: bool,

    /// Verify every copied file by checksum
    #[arg(long)]
    verify: bool,

    /// Checksum algorithm for verification: md5, sha256, blake3
    #[arg(long, value_name = "ALGORITHM", default_value = "sha256", requires = "verify")]
    hash: String,

    /// More output; -vv and up also log to a file
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Log file used from -vv on
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

/// CLI implementation of ProgressCallback
struct CliProgress {
    verbose: bool,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress { verbose }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: std::time::Duration) -> String {
        let secs = elapsed.as_secs();
        let mins = secs / 60;
        let secs = secs % 60;

        if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{:.1}s", elapsed.as_secs_f64())
        }
    }
}

impl ProgressCallback for CliProgress {
    fn on_job_started(&self, report: &JobReport) {
        let verb = match report.kind {
            JobKind::Export => "Exporting",
            JobKind::Reapply => "Reapplying",
        };
        let dry = if report.dry_run { " (dry run)" } else { "" };
        eprintln!("{} profile '{}'{}...", verb, report.profile, dry);
    }

    fn on_entry_started(&self, _report: &JobReport, entry: &ProfileEntry) {
        if self.verbose {
            eprintln!("  [{}] {}", entry.name, entry.location.display());
        }
    }

    fn on_item_completed(&self, _report: &JobReport, item: &CopyItem) {
        if !self.verbose {
            return;
        }
        let status = match item.state {
            ItemState::Done => "ok",
            ItemState::Missing => "missing",
            ItemState::Failed => "failed",
            ItemState::Pending => "pending",
        };
        eprintln!("    {:>7}  {}", status, item.source.display());
    }

    fn on_job_completed(&self, report: &JobReport) {
        let done = report.items.iter().filter(|i| i.state == ItemState::Done).count();
        let missing = report.missing().count();
        let failed = report.failed().count();
        let bytes: u64 = report.items.iter().map(|i| i.bytes_copied).sum();
        let elapsed = report
            .finished_at
            .and_then(|end| (end - report.started_at).to_std().ok())
            .unwrap_or_default();

        eprintln!(
            "Summary: {} done, {} missing, {} failed ({}, {})",
            done,
            missing,
            failed,
            Self::format_bytes(bytes),
            Self::format_duration(elapsed)
        );

        let mismatched: Vec<_> = report
            .items
            .iter()
            .filter(|i| i.verification_passed == Some(false))
            .collect();
        if !mismatched.is_empty() {
            eprintln!("Verification mismatches:");
            for item in mismatched {
                eprintln!("  {}", item.destination.display());
            }
        }

        if let Some(artifact) = report.artifact_path() {
            eprintln!("Output: {}", artifact.display());
        }
        if report.kind == JobKind::Reapply && !report.dry_run {
            eprintln!("Note: {}.", PERMISSIONS_REMINDER);
        }
    }
}

fn main() {
    let args = Args::parse();
    logging::init(args.verbose, args.log_file.as_deref());

    let exit_code = match run_cli(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_FAILURE
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> anyhow::Result<i32> {
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let profiles = load_profiles(&config_path, &TokenContext::from_environment())?;

    if args.list {
        print!("{}", profile_table(&profiles.profile_names()));
        return Ok(EXIT_OK);
    }

    if let Some(name) = &args.print {
        let profile = profiles.get(name)?;
        println!("{}:", profile.name);
        for line in profile.to_yaml()?.lines() {
            println!("  {}", line);
        }
        return Ok(EXIT_OK);
    }

    let verify = if args.verify {
        Some(args.hash.parse::<ChecksumAlgorithm>().map_err(|e| anyhow!(e))?)
    } else {
        None
    };
    let progress = CliProgress::new(args.verbose > 0);

    if let Some(name) = &args.reapply_profile {
        let backup = args
            .directory
            .as_ref()
            .context("--directory must point at the export to reapply")?;
        let mut job = ReapplyJob::new(name, backup)
            .keep_staging(args.no_clear)
            .with_dry_run(args.dry_run);
        if let Some(dir) = &args.temp_dir {
            job = job.with_staging_directory(dir);
        }
        if let Some(algorithm) = verify {
            job = job.with_verify(algorithm);
        }
        let report = Reapplier::new(EngineSettings::default()).reapply(&profiles, &job, Some(&progress))?;
        return Ok(exit_code_for(&report));
    }

    let export_directory = match &args.directory {
        Some(dir) => dir.clone(),
        None => default_export_dir(args.dry_run)?,
    };
    let mut job = ExportJob::new("", export_directory)
        .with_compress(args.compress)
        .with_dry_run(args.dry_run)
        .with_config_snapshot(&config_path);
    if let Some(format) = &args.format {
        job = job.with_archive_format(format);
    }
    if let Some(algorithm) = verify {
        job = job.with_verify(algorithm);
    }
    let exporter = Exporter::new(EngineSettings::default());

    if args.export_all {
        return export_all(&exporter, &profiles, &job, &progress);
    }

    if let Some(name) = &args.export_profile {
        job.profile_name = name.clone();
        job.export_name = args.export_name.clone();
        let report = exporter.export(&profiles, &job, Some(&progress))?;
        return Ok(exit_code_for(&report));
    }

    bail!("No action given")
}

fn export_all(
    exporter: &Exporter,
    profiles: &ProfileSet,
    template: &ExportJob,
    progress: &CliProgress,
) -> anyhow::Result<i32> {
    let mut code = EXIT_OK;
    for outcome in exporter.export_all(profiles, template, Some(progress))? {
        match outcome.result {
            Ok(report) => code = code.max(exit_code_for(&report)),
            Err(e) => {
                eprintln!("Error exporting '{}': {}", outcome.profile, e);
                code = EXIT_FAILURE;
            }
        }
    }
    Ok(code)
}

fn exit_code_for(report: &JobReport) -> i32 {
    match report.status {
        JobStatus::Partial => EXIT_PARTIAL,
        _ => EXIT_OK,
    }
}

/// Tab-separated `ID  NAME` listing, numbered from 1 in document order.
fn profile_table(names: &[&str]) -> String {
    let mut table = String::from("dotsnap profiles:\nID\tNAME\n");
    for (i, name) in names.iter().enumerate() {
        table.push_str(&format!("{}\t{}\n", i + 1, name));
    }
    table
}

fn default_config_path() -> anyhow::Result<PathBuf> {
    let dir = dirs::config_dir().context("Cannot determine the config directory; pass --config")?;
    Ok(dir.join("dotsnap").join("profiles.yaml"))
}

/// `<data_dir>/dotsnap/exports`, created unless this is a dry run.
fn default_export_dir(dry_run: bool) -> anyhow::Result<PathBuf> {
    let dir = dirs::data_dir()
        .context("Cannot determine the data directory; pass --directory")?
        .join("dotsnap")
        .join("exports");
    if !dry_run {
        create_dir(&dir)?;
    }
    Ok(dir)
}

fn create_dir(dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))
}
