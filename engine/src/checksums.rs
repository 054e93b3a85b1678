//! Checksums for verify-after-copy.
//!
//! This module provides:
//! - SHA-256 and BLAKE3 file hashing through one `ChecksumHasher` trait
//! - Source/destination comparison used when a run enables verification

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use crate::fs_ops::COPY_CHUNK_SIZE;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// SHA-256 (cryptographic, 256-bit)
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!(
                "Invalid hash algorithm '{}'. Must be 'sha256' or 'blake3'",
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

/// Incremental hasher over one algorithm.
pub trait ChecksumHasher {
    fn update(&mut self, data: &[u8]);

    fn finalize(self: Box<Self>) -> ChecksumValue;
}

struct Sha256Hasher {
    hasher: sha2::Sha256,
}

impl ChecksumHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha2::Digest;
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        use sha2::Digest;
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Sha256, format!("{:x}", digest))
    }
}

struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl ChecksumHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        ChecksumValue::new(
            ChecksumAlgorithm::Blake3,
            self.hasher.finalize().to_hex().to_string(),
        )
    }
}

/// Create a new hasher for the given algorithm
pub fn create_hasher(algorithm: ChecksumAlgorithm) -> Box<dyn ChecksumHasher> {
    match algorithm {
        ChecksumAlgorithm::Sha256 => Box::new(Sha256Hasher {
            hasher: sha2::Sha256::default(),
        }),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Hasher {
            hasher: blake3::Hasher::new(),
        }),
    }
}

/// Compute checksum for a file
pub fn compute_file_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> io::Result<ChecksumValue> {
    let mut file = File::open(path)?;
    let mut hasher = create_hasher(algorithm);
    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];

    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(hasher.finalize())
}

/// Hash source and destination and report whether they match.
pub fn verify_copy(src: &Path, dst: &Path, algorithm: ChecksumAlgorithm) -> io::Result<bool> {
    let source = compute_file_checksum(src, algorithm)?;
    let dest = compute_file_checksum(dst, algorithm)?;
    Ok(source == dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_algorithm_round_trips_through_text() {
        for algo in [ChecksumAlgorithm::Sha256, ChecksumAlgorithm::Blake3] {
            assert_eq!(algo.to_string().parse::<ChecksumAlgorithm>(), Ok(algo));
        }
        assert_eq!("SHA256".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Sha256));
        assert!("md5".parse::<ChecksumAlgorithm>().is_err());
    }

    #[test]
    fn test_sha256_known_value() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("abc.txt");
        fs::write(&path, b"abc").expect("Failed to write file");

        let value = compute_file_checksum(&path, ChecksumAlgorithm::Sha256).expect("Failed to hash");
        assert_eq!(
            value.hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_blake3_matches_reference() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("data.bin");
        let data = vec![42u8; 200_000];
        fs::write(&path, &data).expect("Failed to write file");

        let value = compute_file_checksum(&path, ChecksumAlgorithm::Blake3).expect("Failed to hash");
        assert_eq!(value.hex(), blake3::hash(&data).to_hex().as_str());
    }

    #[test]
    fn test_verify_copy_detects_mismatch() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src.txt");
        let same = temp_dir.path().join("same.txt");
        let other = temp_dir.path().join("other.txt");
        fs::write(&src, b"payload").expect("Failed to write file");
        fs::write(&same, b"payload").expect("Failed to write file");
        fs::write(&other, b"payloaD").expect("Failed to write file");

        assert!(verify_copy(&src, &same, ChecksumAlgorithm::Blake3).expect("Failed to verify"));
        assert!(!verify_copy(&src, &other, ChecksumAlgorithm::Sha256).expect("Failed to verify"));
    }
}
