//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Discovering media files while filtering OS artifacts
//! - Copying files with metadata preservation
//! - Creating directories recursively
//! - Probing free space
//! - Naming the hidden side, scratch and backup files the engine works with

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::config::{DeviceFolder, MediaSettings};
use crate::error::{EngineError, Result};
use crate::model::{base_name, MediaKind};

const SIDE_TAG: &str = "photoflow-partial";
const SCRATCH_TAG: &str = "photoflow-scratch";
const BACKUP_EXTENSION: &str = "backup";

/// Names produced by operating systems rather than cameras.
const ARTIFACT_NAMES: &[&str] = &["Thumbs.db", "desktop.ini"];

/// A discovered media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub base: String,
    pub kind: MediaKind,
    pub len: u64,
}

/// Whether a file name is an OS artifact (or one of our own hidden files).
pub fn is_artifact(name: &str) -> bool {
    name.starts_with('.') || ARTIFACT_NAMES.iter().any(|a| a.eq_ignore_ascii_case(name))
}

/// Discover tracked media under `root`, recursively, sorted by path.
///
/// Unreadable subdirectories are logged and skipped; an unreadable root is
/// an error.
pub fn scan_tree(root: &Path, media: &MediaSettings) -> Result<Vec<MediaFile>> {
    scan(root, media, usize::MAX)
}

/// Discover tracked media directly inside `dir`.
pub fn scan_dir(dir: &Path, media: &MediaSettings) -> Result<Vec<MediaFile>> {
    scan(dir, media, 1)
}

fn scan(root: &Path, media: &MediaSettings, max_depth: usize) -> Result<Vec<MediaFile>> {
    fs::read_dir(root).map_err(|e| EngineError::EnumerationFailed {
        path: root.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !is_artifact(&entry.file_name().to_string_lossy())
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(kind) = MediaKind::classify(path, media) else {
            continue;
        };
        let Some(base) = base_name(path) else {
            continue;
        };
        let len = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        files.push(MediaFile {
            path: path.to_path_buf(),
            base,
            kind,
            len,
        });
    }
    Ok(files)
}

/// Copy a file from source to destination with metadata preservation.
///
/// The destination is flushed to disk before returning. Modification time
/// and permissions are copied where the platform allows.
///
/// # Returns
/// Number of bytes copied
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;
    let src_metadata = src_file.metadata().map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;

    let mut dst_file = fs::File::create(dst).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            EngineError::WriteError {
                path: dst.to_path_buf(),
                source: e,
            }
        } else {
            EngineError::ReadError {
                path: src.to_path_buf(),
                source: e,
            }
        }
    })?;
    dst_file.sync_all().map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;
    drop(dst_file);

    // Best effort: some filesystems (exFAT cards) reject either call.
    if let Ok(mtime) = src_metadata.modified() {
        let _ = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime));
    }
    let _ = fs::set_permissions(dst, src_metadata.permissions());

    Ok(bytes_copied)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Parent path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(parent).map_err(|e| EngineError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: e,
        }),
    }
}

/// Delete a file. Returns `false` if it was already gone.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(EngineError::WriteError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Rename within one directory (atomic on POSIX filesystems).
pub fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| EngineError::WriteError {
        path: to.to_path_buf(),
        source: e,
    })
}

fn hidden_sibling(path: &Path, tag: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    // Keep the original extension last so tools that sniff by name still work.
    path.with_file_name(format!(".{}.{}", tag, name))
}

/// Hidden file next to `target` that new content is written into before the swap.
pub fn side_path(target: &Path) -> PathBuf {
    hidden_sibling(target, SIDE_TAG)
}

/// Hidden working copy of a staged image during Finalize.
pub fn scratch_path(path: &Path) -> PathBuf {
    hidden_sibling(path, SCRATCH_TAG)
}

/// The staged file a scratch copy belongs to, if `path` is a scratch copy.
pub fn scratch_origin(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let original = name.strip_prefix(&format!(".{}.", SCRATCH_TAG))?;
    Some(path.with_file_name(original))
}

/// `X.JPG` → `X.JPG.backup`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(BACKUP_EXTENSION);
    PathBuf::from(name)
}

/// Best-effort free-space probe. `None` means unknown and never blocks.
pub trait SpaceProbe {
    fn available_bytes(&self, path: &Path) -> Option<u64>;
}

/// Free space of the volume holding the nearest existing ancestor of the path.
#[derive(Debug, Default, Clone, Copy)]
pub struct VolumeSpace;

impl SpaceProbe for VolumeSpace {
    fn available_bytes(&self, path: &Path) -> Option<u64> {
        let existing = path.ancestors().find(|p| p.exists())?;
        fs4::available_space(existing).ok()
    }
}

/// Fail with `InsufficientSpace` when the probe knows `path` cannot hold `required` bytes.
pub fn check_space(probe: &dyn SpaceProbe, path: &Path, required: u64) -> Result<()> {
    match probe.available_bytes(path) {
        Some(available) if available < required => Err(EngineError::InsufficientSpace {
            path: path.to_path_buf(),
            required,
            available,
        }),
        _ => Ok(()),
    }
}

/// Resolve the folder on the capture device that finalized images are copied back into.
pub fn resolve_device_folder(root: &Path, strategy: &DeviceFolder) -> Result<PathBuf> {
    match strategy {
        DeviceFolder::Root => Ok(root.to_path_buf()),
        DeviceFolder::Named(name) => {
            let folder = root.join(name);
            if folder.is_dir() {
                Ok(folder)
            } else {
                Err(EngineError::StorageUnavailable {
                    role: "capture device folder",
                    path: folder,
                })
            }
        }
        DeviceFolder::FirstWritable => {
            let entries = fs::read_dir(root).map_err(|e| EngineError::EnumerationFailed {
                path: root.to_path_buf(),
                source: e,
            })?;
            let mut folders: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| !is_artifact(&entry.file_name().to_string_lossy()))
                .filter(|entry| {
                    entry
                        .metadata()
                        .map(|m| m.is_dir() && !m.permissions().readonly())
                        .unwrap_or(false)
                })
                .map(|entry| entry.path())
                .collect();
            folders.sort();
            folders
                .into_iter()
                .next()
                .ok_or_else(|| EngineError::StorageUnavailable {
                    role: "writable capture device folder",
                    path: root.to_path_buf(),
                })
        }
    }
}
