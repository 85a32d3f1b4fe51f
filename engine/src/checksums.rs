//! Checksum computation.
//!
//! This module provides:
//! - Multiple checksum algorithms (MD5, SHA-256, BLAKE3)
//! - Whole-file digests
//! - Sampled digests over the head and tail windows of large files

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

const BUFFER_SIZE: usize = 64 * 1024;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// MD5 (fast, kept for compatibility with existing archives)
    Md5,
    /// SHA-256 (cryptographic, 256-bit)
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
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

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!("unknown checksum algorithm '{}'", other)),
        }
    }
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
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

    /// Format as "algo:hex"
    pub fn to_string_with_algo(&self) -> String {
        format!("{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Trait for computing checksums
pub trait ChecksumHasher {
    /// Update the hasher with new data
    fn update(&mut self, data: &[u8]);

    /// Finalize and return the checksum value
    fn finalize(self: Box<Self>) -> ChecksumValue;
}

/// MD5 hasher (backed by md5 crate)
struct Md5Hasher {
    context: md5::Context,
}

impl ChecksumHasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.context.compute();
        ChecksumValue::new(ChecksumAlgorithm::Md5, format!("{:x}", digest))
    }
}

/// SHA-256 hasher (backed by sha2 crate)
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

/// BLAKE3 hasher (backed by blake3 crate)
struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl ChecksumHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Blake3, digest.to_hex().to_string())
    }
}

/// Create a new hasher for the given algorithm
pub fn create_hasher(algorithm: ChecksumAlgorithm) -> Box<dyn ChecksumHasher> {
    match algorithm {
        ChecksumAlgorithm::Md5 => Box::new(Md5Hasher {
            context: md5::Context::new(),
        }),
        ChecksumAlgorithm::Sha256 => Box::new(Sha256Hasher {
            hasher: sha2::Sha256::default(),
        }),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Hasher {
            hasher: blake3::Hasher::new(),
        }),
    }
}

fn feed<R: Read>(
    reader: &mut R,
    hasher: &mut dyn ChecksumHasher,
    limit: u64,
    path: &Path,
) -> Result<()> {
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut remaining = limit;
    while remaining > 0 {
        let want = remaining.min(BUFFER_SIZE as u64) as usize;
        match reader.read(&mut buffer[..want]) {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buffer[..n]);
                remaining -= n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(EngineError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }
    }
    Ok(())
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Compute checksum over the whole file
pub fn compute_file_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> Result<ChecksumValue> {
    let mut file = open(path)?;
    let mut hasher = create_hasher(algorithm);
    feed(&mut file, hasher.as_mut(), u64::MAX, path)?;
    Ok(hasher.finalize())
}

/// Compute checksum over the first and last `window` bytes of a file of length `len`.
///
/// Windows never overlap; for files shorter than two windows every byte is
/// hashed exactly once.
pub fn compute_sampled_checksum(
    path: &Path,
    algorithm: ChecksumAlgorithm,
    len: u64,
    window: u64,
) -> Result<ChecksumValue> {
    let mut file = open(path)?;
    let mut hasher = create_hasher(algorithm);

    let head = window.min(len);
    feed(&mut file, hasher.as_mut(), head, path)?;

    let tail_start = len.saturating_sub(window).max(head);
    if tail_start < len {
        file.seek(SeekFrom::Start(tail_start))
            .map_err(|e| EngineError::ReadError {
                path: path.to_path_buf(),
                source: e,
            })?;
        feed(&mut file, hasher.as_mut(), len - tail_start, path)?;
    }

    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn hash_bytes(algorithm: ChecksumAlgorithm, data: &[u8]) -> ChecksumValue {
        let mut hasher = create_hasher(algorithm);
        hasher.update(data);
        hasher.finalize()
    }

    #[test]
    fn test_algorithm_display_and_parse() {
        for algo in [
            ChecksumAlgorithm::Md5,
            ChecksumAlgorithm::Sha256,
            ChecksumAlgorithm::Blake3,
        ] {
            assert_eq!(algo.to_string().parse::<ChecksumAlgorithm>(), Ok(algo));
        }
        assert!("crc32".parse::<ChecksumAlgorithm>().is_err());
    }

    #[test]
    fn test_md5_hasher() {
        let checksum = hash_bytes(ChecksumAlgorithm::Md5, b"hello");
        assert_eq!(checksum.algorithm(), ChecksumAlgorithm::Md5);
        assert_eq!(checksum.hex(), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_sha256_hasher() {
        let checksum = hash_bytes(ChecksumAlgorithm::Sha256, b"hello");
        assert_eq!(
            checksum.hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_blake3_hasher_is_deterministic() {
        let a = hash_bytes(ChecksumAlgorithm::Blake3, b"hello");
        let b = hash_bytes(ChecksumAlgorithm::Blake3, b"hello");
        assert_eq!(a, b);
        assert_eq!(a.to_string_with_algo(), format!("blake3:{}", a.hex()));
    }

    #[test]
    fn test_file_checksum_matches_in_memory() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("data.bin");
        let mut file = File::create(&path).expect("Failed to create file");
        file.write_all(b"hello").expect("Failed to write file");
        drop(file);

        let from_file = compute_file_checksum(&path, ChecksumAlgorithm::Sha256)
            .expect("Failed to hash file");
        assert_eq!(from_file, hash_bytes(ChecksumAlgorithm::Sha256, b"hello"));
    }

    #[test]
    fn test_sampled_checksum_ignores_middle() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let a = temp_dir.path().join("a.bin");
        let b = temp_dir.path().join("b.bin");

        let mut data = vec![7u8; 100];
        std::fs::write(&a, &data).expect("Failed to write a");
        data[50] = 8;
        std::fs::write(&b, &data).expect("Failed to write b");

        let sa = compute_sampled_checksum(&a, ChecksumAlgorithm::Blake3, 100, 10)
            .expect("Failed to hash a");
        let sb = compute_sampled_checksum(&b, ChecksumAlgorithm::Blake3, 100, 10)
            .expect("Failed to hash b");
        assert_eq!(sa, sb, "middle bytes are outside both windows");

        data[95] = 9;
        std::fs::write(&b, &data).expect("Failed to rewrite b");
        let sb = compute_sampled_checksum(&b, ChecksumAlgorithm::Blake3, 100, 10)
            .expect("Failed to hash b");
        assert_ne!(sa, sb, "tail window must be covered");
    }

    #[test]
    fn test_sampled_checksum_short_file_hashes_everything_once() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("short.bin");
        std::fs::write(&path, b"abcdef").expect("Failed to write file");

        let sampled = compute_sampled_checksum(&path, ChecksumAlgorithm::Md5, 6, 4)
            .expect("Failed to hash file");
        assert_eq!(sampled, hash_bytes(ChecksumAlgorithm::Md5, b"abcdef"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = compute_file_checksum(Path::new("/nonexistent/file"), ChecksumAlgorithm::Md5);
        assert!(matches!(result, Err(EngineError::ReadError { .. })));
    }
}
