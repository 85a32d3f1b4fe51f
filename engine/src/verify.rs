//! Content verification.
//!
//! A [`Fingerprint`] identifies file content by length and digest. Files at or
//! below the configured threshold are hashed whole; larger files are hashed
//! over a head and a tail window only. Sampling catches truncation, corruption
//! and unrelated files; it is not a defense against crafted collisions.
//!
//! Digests are cached per process, keyed by path, length, modification time and
//! sampling mode. The key is re-read from disk on every lookup, so a file that
//! changed since it was hashed is always hashed again.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::trace;

use crate::checksums::{self, ChecksumAlgorithm, ChecksumValue};
use crate::config::FingerprintSettings;
use crate::error::{EngineError, Result};

/// How much of a file a fingerprint covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplingMode {
    /// Every byte
    Full,
    /// Head and tail windows of the given size
    Partial { window: u64 },
}

/// Content identity of a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub len: u64,
    pub mode: SamplingMode,
    pub digest: ChecksumValue,
}

impl Fingerprint {
    /// Same length and same digest under the same sampling mode.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        self == other
    }
}

/// The part of a file's metadata that keys the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileStat {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Source of [`FileStat`]s. Injected so tests can control invalidation.
pub trait StatProbe {
    fn stat(&self, path: &Path) -> std::io::Result<FileStat>;
}

/// Reads length and mtime from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStatProbe;

impl StatProbe for FsStatProbe {
    fn stat(&self, path: &Path) -> std::io::Result<FileStat> {
        let metadata = fs::metadata(path)?;
        Ok(FileStat {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    stat: FileStat,
    mode: SamplingMode,
}

/// Process-local digest cache. Advisory only.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    entries: HashMap<CacheKey, ChecksumValue>,
    hits: u64,
    misses: u64,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&mut self, key: &CacheKey) -> Option<ChecksumValue> {
        let found = self.entries.get(key).cloned();
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    fn insert(&mut self, key: CacheKey, digest: ChecksumValue) {
        // Older entries for the same path can never match again.
        self.entries.retain(|k, _| k.path != key.path);
        self.entries.insert(key, digest);
    }

    fn forget(&mut self, path: &Path) {
        self.entries.retain(|k, _| k.path != path);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

/// Computes fingerprints and decides content identity.
pub struct Verifier {
    algorithm: ChecksumAlgorithm,
    threshold: u64,
    window: u64,
    probe: Box<dyn StatProbe>,
    cache: FingerprintCache,
}

impl Verifier {
    pub fn new(settings: &FingerprintSettings) -> Self {
        Self::with_probe(settings, Box::new(FsStatProbe))
    }

    pub fn with_probe(settings: &FingerprintSettings, probe: Box<dyn StatProbe>) -> Self {
        Verifier {
            algorithm: settings.algorithm,
            threshold: settings.partial_threshold_bytes,
            window: settings.window_bytes,
            probe,
            cache: FingerprintCache::new(),
        }
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    fn stat(&self, path: &Path) -> Result<FileStat> {
        self.probe.stat(path).map_err(|e| EngineError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn mode_for(&self, len: u64, threshold: u64) -> SamplingMode {
        if len <= threshold {
            SamplingMode::Full
        } else {
            SamplingMode::Partial {
                window: self.window,
            }
        }
    }

    fn digest(&self, path: &Path, len: u64, mode: SamplingMode) -> Result<ChecksumValue> {
        match mode {
            SamplingMode::Full => checksums::compute_file_checksum(path, self.algorithm),
            SamplingMode::Partial { window } => {
                checksums::compute_sampled_checksum(path, self.algorithm, len, window)
            }
        }
    }

    /// Fingerprint `path`, sampling when it is larger than `threshold` bytes.
    pub fn fingerprint(&mut self, path: &Path, threshold: u64) -> Result<Fingerprint> {
        self.fingerprint_inner(path, threshold, true)
    }

    /// Fingerprint `path` with the configured threshold.
    pub fn fingerprint_default(&mut self, path: &Path) -> Result<Fingerprint> {
        self.fingerprint_inner(path, self.threshold, true)
    }

    fn fingerprint_inner(
        &mut self,
        path: &Path,
        threshold: u64,
        use_cache: bool,
    ) -> Result<Fingerprint> {
        let before = self.stat(path)?;
        let mode = self.mode_for(before.len, threshold);
        let key = CacheKey {
            path: path.to_path_buf(),
            stat: before,
            mode,
        };

        if use_cache {
            if let Some(digest) = self.cache.get(&key) {
                trace!(path = %path.display(), "fingerprint cache hit");
                return Ok(Fingerprint {
                    len: before.len,
                    mode,
                    digest,
                });
            }
        }

        let digest = self.digest(path, before.len, mode)?;
        let after = self.stat(path)?;
        if after == before {
            self.cache.insert(key, digest.clone());
        } else {
            // Changed while being read; the digest describes no stable state.
            self.cache.forget(path);
        }

        Ok(Fingerprint {
            len: before.len,
            mode,
            digest,
        })
    }

    /// Whether two files hold the same content. Lengths are compared first;
    /// digests only when lengths agree. May answer from the cache.
    pub fn identical(&mut self, a: &Path, b: &Path) -> Result<bool> {
        self.compare(a, b, true)
    }

    /// Like [`identical`](Self::identical) but always re-reads both files.
    /// Used wherever the answer licenses a delete or declares a copy good.
    pub fn verify_identical(&mut self, a: &Path, b: &Path) -> Result<bool> {
        self.compare(a, b, false)
    }

    fn compare(&mut self, a: &Path, b: &Path, use_cache: bool) -> Result<bool> {
        let len_a = self.stat(a)?.len;
        let len_b = self.stat(b)?.len;
        if len_a != len_b {
            return Ok(false);
        }
        let threshold = self.threshold;
        let fa = self.fingerprint_inner(a, threshold, use_cache)?;
        let fb = self.fingerprint_inner(b, threshold, use_cache)?;
        Ok(fa.matches(&fb))
    }

    /// Drop any cached digest for `path` (after the engine rewrites or deletes it).
    pub fn invalidate(&mut self, path: &Path) {
        self.cache.forget(path);
    }
}
