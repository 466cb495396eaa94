//! Checksums for verifying copies.
//!
//! Used when a job is asked to verify: each copied file is hashed at both
//! ends and the results compared.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use crate::error::EngineError;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// MD5 (fast, not collision resistant)
    Md5,
    /// SHA-256
    Sha256,
    /// BLAKE3
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!(
                "Invalid hash algorithm '{}'. Must be 'md5', 'sha256', or 'blake3'",
                other
            )),
        }
    }
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    pub fn new(algorithm: ChecksumAlgorithm, hex: String) -> Self {
        ChecksumValue { algorithm, hex }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

enum Hasher {
    Md5(md5::Context),
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::default()),
            ChecksumAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha256(h) => sha2::Digest::update(h, data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> ChecksumValue {
        match self {
            Hasher::Md5(ctx) => ChecksumValue::new(ChecksumAlgorithm::Md5, format!("{:x}", ctx.compute())),
            Hasher::Sha256(h) => ChecksumValue::new(
                ChecksumAlgorithm::Sha256,
                format!("{:x}", sha2::Digest::finalize(h)),
            ),
            Hasher::Blake3(h) => ChecksumValue::new(ChecksumAlgorithm::Blake3, h.finalize().to_hex().to_string()),
        }
    }
}

/// Compute the checksum of a file.
pub fn compute_file_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> Result<ChecksumValue, EngineError> {
    let mut file = File::open(path).map_err(|e| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 65536];
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) => {
                return Err(EngineError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }
    }
    Ok(hasher.finalize())
}

/// Compare a copied file against its source.
///
/// Returns `Ok(false)` on a mismatch; `Err` only if either side can't be read.
pub fn verify_copy(source: &Path, destination: &Path, algorithm: ChecksumAlgorithm) -> Result<bool, EngineError> {
    let expected = compute_file_checksum(source, algorithm)?;
    let actual = compute_file_checksum(destination, algorithm)?;
    if expected != actual {
        tracing::debug!(
            "Checksum mismatch for {}: {} != {}",
            destination.display(),
            expected,
            actual
        );
    }
    Ok(expected == actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_algorithm_display() {
        assert_eq!(ChecksumAlgorithm::Md5.to_string(), "md5");
        assert_eq!(ChecksumAlgorithm::Sha256.to_string(), "sha256");
        assert_eq!(ChecksumAlgorithm::Blake3.to_string(), "blake3");
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("MD5".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Md5));
        assert_eq!("sha256".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Sha256));
        assert_eq!("blake3".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Blake3));
        assert!("crc32".parse::<ChecksumAlgorithm>().is_err());
    }

    #[test]
    fn test_known_digests() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("hello.txt");
        fs::write(&path, b"hello").expect("Failed to write file");

        let md5 = compute_file_checksum(&path, ChecksumAlgorithm::Md5).expect("md5");
        assert_eq!(md5.hex(), "5d41402abc4b2a76b9719d911017c592");

        let sha = compute_file_checksum(&path, ChecksumAlgorithm::Sha256).expect("sha256");
        assert_eq!(
            sha.hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );

        let b3 = compute_file_checksum(&path, ChecksumAlgorithm::Blake3).expect("blake3");
        assert_eq!(b3.hex().len(), 64);
        assert_eq!(b3.algorithm(), ChecksumAlgorithm::Blake3);
    }

    #[test]
    fn test_verify_copy_detects_mismatch() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        fs::write(&a, "original content").expect("write");
        fs::write(&b, "original content").expect("write");
        assert!(verify_copy(&a, &b, ChecksumAlgorithm::Sha256).expect("verify"));

        fs::write(&b, "modified content").expect("write");
        assert!(!verify_copy(&a, &b, ChecksumAlgorithm::Blake3).expect("verify"));
    }

    #[test]
    fn test_verify_copy_missing_file_is_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let a = temp_dir.path().join("a");
        fs::write(&a, "x").expect("write");
        assert!(verify_copy(&a, &temp_dir.path().join("gone"), ChecksumAlgorithm::Md5).is_err());
    }
}
