//! Archive creation and extraction for exports.
//!
//! An archive holds the export root's children at its top level
//! (`<entry_name>/<file>`, plus an optional config snapshot), so extracting
//! into `staging/<stem>` reproduces the export tree under that directory.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::EngineError;

/// Format name that disables archiving entirely.
pub const NO_ARCHIVE: &str = "null";

/// Supported archive container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Uncompressed tar
    Tar,
    /// Gzip-compressed tar
    GzTar,
    /// Deflate-compressed zip
    Zip,
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 3] = [ArchiveFormat::Tar, ArchiveFormat::GzTar, ArchiveFormat::Zip];

    pub fn name(&self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::GzTar => "gztar",
            ArchiveFormat::Zip => "zip",
        }
    }

    /// File extension, without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::GzTar => "tar.gz",
            ArchiveFormat::Zip => "zip",
        }
    }

    /// Parse a format name. `"null"` yields `Ok(None)`: export as a plain directory.
    ///
    /// # Errors
    /// `FormatInvalid` for any other unknown name.
    pub fn parse(name: &str) -> Result<Option<ArchiveFormat>, EngineError> {
        let lowered = name.trim().to_lowercase();
        if lowered == NO_ARCHIVE {
            return Ok(None);
        }
        ArchiveFormat::ALL
            .into_iter()
            .find(|f| f.name() == lowered)
            .map(Some)
            .ok_or_else(|| EngineError::FormatInvalid {
                format: name.to_string(),
                supported: Self::supported_names(),
            })
    }

    pub fn supported_names() -> String {
        let mut names: Vec<&str> = ArchiveFormat::ALL.iter().map(|f| f.name()).collect();
        names.push(NO_ARCHIVE);
        names.join(", ")
    }

    /// Compressed counterpart of this format.
    ///
    /// `tar` becomes `gztar`. Nothing else has a known counterpart, so it
    /// falls back to `zip` and the second value carries a warning to log.
    pub fn compressed(self) -> (ArchiveFormat, Option<String>) {
        match self {
            ArchiveFormat::Tar => (ArchiveFormat::GzTar, None),
            other => (
                ArchiveFormat::Zip,
                Some(format!("Could not find a compressed variant of '{}'; using zip", other)),
            ),
        }
    }

    /// Identify an archive from its leading bytes.
    ///
    /// # Errors
    /// `UnpackError` if the file can't be read or matches no known format.
    pub fn detect(path: &Path) -> Result<ArchiveFormat, EngineError> {
        let mut header = [0u8; 512];
        let mut file = File::open(path).map_err(|e| unpack_error(path, e))?;
        let mut filled = 0;
        while filled < header.len() {
            match file.read(&mut header[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => return Err(unpack_error(path, e)),
            }
        }
        let header = &header[..filled];

        if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
            Ok(ArchiveFormat::Zip)
        } else if header.starts_with(&[0x1f, 0x8b]) {
            Ok(ArchiveFormat::GzTar)
        } else if header.len() >= 262 && &header[257..262] == b"ustar" {
            Ok(ArchiveFormat::Tar)
        } else {
            Err(EngineError::UnpackError {
                path: path.to_path_buf(),
                reason: "unrecognized archive format".to_string(),
            })
        }
    }
}

/// File name of an archive with its archive extension removed.
///
/// `desktop.tar.gz` -> `desktop`; unknown extensions lose one suffix.
pub fn strip_archive_extension(file_name: &str) -> String {
    let lowered = file_name.to_lowercase();
    for suffix in [".tar.gz", ".tgz", ".tar", ".zip"] {
        if lowered.ends_with(suffix) && lowered.len() > suffix.len() {
            return file_name[..file_name.len() - suffix.len()].to_string();
        }
    }
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}

fn unpack_error(path: &Path, err: impl fmt::Display) -> EngineError {
    EngineError::UnpackError {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn archive_error(path: &Path, err: impl fmt::Display) -> EngineError {
    EngineError::ArchiveFailed {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn sorted_children(dir: &Path) -> io::Result<Vec<fs::DirEntry>> {
    let mut children = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    children.sort_by_key(|c| c.file_name());
    Ok(children)
}

/// Build an archive at `archive_path` from the contents of `root`.
///
/// # Errors
/// `ArchiveFailed` on any I/O failure; a partially written archive is removed.
pub fn create_archive(root: &Path, archive_path: &Path, format: ArchiveFormat) -> Result<(), EngineError> {
    let result = match format {
        ArchiveFormat::Tar => File::create(archive_path)
            .and_then(|file| write_tar(file, root))
            .and_then(|file| file.sync_all()),
        ArchiveFormat::GzTar => File::create(archive_path)
            .and_then(|file| write_tar(GzEncoder::new(file, Compression::default()), root))
            .and_then(|encoder| encoder.finish())
            .and_then(|file| file.sync_all()),
        ArchiveFormat::Zip => write_zip(root, archive_path),
    };

    result.map_err(|e| {
        let _ = fs::remove_file(archive_path);
        archive_error(archive_path, e)
    })
}

fn write_tar<W: Write>(writer: W, root: &Path) -> io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    for child in sorted_children(root)? {
        let path = child.path();
        let name = child.file_name();
        if path.is_dir() {
            builder.append_dir_all(&name, &path)?;
        } else {
            builder.append_path_with_name(&path, &name)?;
        }
    }
    builder.into_inner()
}

fn zip_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

fn write_zip(root: &Path, archive_path: &Path) -> io::Result<()> {
    fn add_dir(zip: &mut ZipWriter<File>, dir: &Path, prefix: &str) -> io::Result<()> {
        for child in sorted_children(dir)? {
            let path = child.path();
            let name = format!("{}{}", prefix, child.file_name().to_string_lossy());
            if path.is_dir() {
                zip.add_directory(format!("{}/", name), zip_options())?;
                add_dir(zip, &path, &format!("{}/", name))?;
            } else {
                zip.start_file(name, zip_options())?;
                let mut input = File::open(&path)?;
                io::copy(&mut input, zip)?;
            }
        }
        Ok(())
    }

    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(file);
    add_dir(&mut zip, root, "")?;
    zip.finish()?.sync_all()
}

/// Extract `archive` into `dest`, creating `dest` if needed.
///
/// # Errors
/// `UnpackError` for unreadable, unrecognized or corrupt archives.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<ArchiveFormat, EngineError> {
    let format = ArchiveFormat::detect(archive)?;
    fs::create_dir_all(dest).map_err(|e| EngineError::DirectoryCreationFailed {
        path: dest.to_path_buf(),
        source: e,
    })?;

    match format {
        ArchiveFormat::Tar => {
            let file = File::open(archive).map_err(|e| unpack_error(archive, e))?;
            tar::Archive::new(file).unpack(dest).map_err(|e| unpack_error(archive, e))?;
        }
        ArchiveFormat::GzTar => {
            let file = File::open(archive).map_err(|e| unpack_error(archive, e))?;
            let mut tarball = tar::Archive::new(GzDecoder::new(file));
            tarball.unpack(dest).map_err(|e| unpack_error(archive, e))?;
            // tar stops at its end marker; the gzip trailer is only checked on EOF
            io::copy(&mut tarball.into_inner(), &mut io::sink()).map_err(|e| unpack_error(archive, e))?;
        }
        ArchiveFormat::Zip => extract_zip(archive, dest)?,
    }
    Ok(format)
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<(), EngineError> {
    let file = File::open(archive).map_err(|e| unpack_error(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| unpack_error(archive, e))?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| unpack_error(archive, e))?;
        let relative = match entry.enclosed_name() {
            Some(path) => path.to_owned(),
            None => continue,
        };
        let out_path = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| unpack_error(archive, e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| unpack_error(archive, e))?;
        }
        let mut out = File::create(&out_path).map_err(|e| unpack_error(archive, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| unpack_error(archive, e))?;
    }
    Ok(())
}

/// Paths stored in an archive, relative to its root, without extracting.
///
/// # Errors
/// `UnpackError` for unreadable, unrecognized or corrupt archives.
pub fn list_entries(archive: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let format = ArchiveFormat::detect(archive)?;
    let file = File::open(archive).map_err(|e| unpack_error(archive, e))?;

    let raw: Vec<PathBuf> = match format {
        ArchiveFormat::Tar => tar_paths(tar::Archive::new(file)).map_err(|e| unpack_error(archive, e))?,
        ArchiveFormat::GzTar => {
            tar_paths(tar::Archive::new(GzDecoder::new(file))).map_err(|e| unpack_error(archive, e))?
        }
        ArchiveFormat::Zip => {
            let mut zip = ZipArchive::new(file).map_err(|e| unpack_error(archive, e))?;
            let mut paths = Vec::with_capacity(zip.len());
            for i in 0..zip.len() {
                let entry = zip.by_index(i).map_err(|e| unpack_error(archive, e))?;
                if let Some(path) = entry.enclosed_name() {
                    paths.push(path.to_owned());
                }
            }
            paths
        }
    };

    Ok(raw
        .into_iter()
        .map(|p| p.components().filter(|c| !matches!(c, Component::CurDir)).collect())
        .collect())
}

fn tar_paths<R: Read>(mut archive: tar::Archive<R>) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        paths.push(entry.path()?.into_owned());
    }
    Ok(paths)
}
