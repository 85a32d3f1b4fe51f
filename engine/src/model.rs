//! Core data model.
//!
//! - MediaKind, Location: what a file is and where it can live
//! - MediaItem, MediaCatalog: the files sharing one base name, and where they are
//! - TransferOutcome: result of one copy, replace or delete
//! - Tally, ItemFailure: per-operation counts that every report carries

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::MediaSettings;
use crate::error::{EngineError, ErrorKind};

/// The three tracked media classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MediaKind {
    /// JPEG straight from the camera or finalized
    StillImage,
    /// Raw backup of a still image
    RawSidecar,
    /// Video
    MotionClip,
}

impl MediaKind {
    /// Classify a path by its extension. Untracked extensions yield `None`.
    pub fn classify(path: &Path, media: &MediaSettings) -> Option<MediaKind> {
        let ext = path.extension()?.to_str()?;
        let matches = |list: &[String]| list.iter().any(|e| e.eq_ignore_ascii_case(ext));
        if matches(&media.still_extensions) {
            Some(MediaKind::StillImage)
        } else if matches(&media.raw_extensions) {
            Some(MediaKind::RawSidecar)
        } else if matches(&media.motion_extensions) {
            Some(MediaKind::MotionClip)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::StillImage => write!(f, "photo"),
            MediaKind::RawSidecar => write!(f, "RAW file"),
            MediaKind::MotionClip => write!(f, "video"),
        }
    }
}

/// A storage location a media file can be present in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Location {
    CaptureDevice,
    Staging,
    RawArchive,
    FinalArchive,
    PublishTarget,
    BulkStorage,
}

/// All files sharing one base name within a capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    /// File stem, e.g. `DSCF0001`
    pub base_name: String,
    /// Extensions seen for this base name, as found on disk
    pub extensions: BTreeSet<String>,
    /// Where (kind, location) pairs are currently present
    presence: BTreeSet<(MediaKind, Location)>,
}

impl MediaItem {
    pub fn new(base_name: impl Into<String>) -> Self {
        MediaItem {
            base_name: base_name.into(),
            extensions: BTreeSet::new(),
            presence: BTreeSet::new(),
        }
    }

    pub fn is_present(&self, kind: MediaKind, location: Location) -> bool {
        self.presence.contains(&(kind, location))
    }
}

/// Base name → MediaItem, built from one scan of the storage roles.
#[derive(Debug, Default, Clone)]
pub struct MediaCatalog {
    items: BTreeMap<String, MediaItem>,
}

/// Base name (file stem) of a path.
pub fn base_name(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

impl MediaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovered file.
    pub fn discover(&mut self, path: &Path, kind: MediaKind, location: Location) {
        let Some(base) = base_name(path) else {
            return;
        };
        let item = self
            .items
            .entry(base.clone())
            .or_insert_with(|| MediaItem::new(base));
        if let Some(ext) = path.extension() {
            item.extensions.insert(ext.to_string_lossy().into_owned());
        }
        item.presence.insert((kind, location));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaItem> {
        self.items.values()
    }
}

/// Result of a single verified copy, atomic replace or delete.
///
/// Only produced once the destination is in its final state.
#[derive(Debug)]
pub enum TransferOutcome {
    /// Destination now holds the intended content
    Succeeded,
    /// Destination already held identical content; nothing was written
    SkippedDuplicate,
    /// Nothing observable changed at the destination
    Failed(EngineError),
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Succeeded)
    }

    /// Destination holds the intended content, whether or not we wrote it.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            TransferOutcome::Succeeded | TransferOutcome::SkippedDuplicate
        )
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            TransferOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<TransferOutcome, EngineError> {
        match self {
            TransferOutcome::Failed(e) => Err(e),
            other => Ok(other),
        }
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Succeeded => write!(f, "Done"),
            TransferOutcome::SkippedDuplicate => write!(f, "Skipped"),
            TransferOutcome::Failed(_) => write!(f, "Failed"),
        }
    }
}

/// One failed item, with enough context to act on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub path: PathBuf,
    pub kind: ErrorKind,
    pub message: String,
}

impl ItemFailure {
    pub fn from_error(path: &Path, error: &EngineError) -> Self {
        ItemFailure {
            path: error.path().unwrap_or(path).to_path_buf(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.path.display(), self.message)
    }
}

/// processed / skipped-as-duplicate / failed counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<ItemFailure>,
}

impl Tally {
    /// Count one outcome for the item at `path`.
    pub fn record(&mut self, path: &Path, outcome: &TransferOutcome) {
        match outcome {
            TransferOutcome::Succeeded => self.processed += 1,
            TransferOutcome::SkippedDuplicate => self.skipped += 1,
            TransferOutcome::Failed(e) => self.record_error(path, e),
        }
    }

    /// Count a failure that happened outside a transfer primitive.
    pub fn record_error(&mut self, path: &Path, error: &EngineError) {
        self.failed += 1;
        self.failures.push(ItemFailure::from_error(path, error));
    }

    pub fn merge(&mut self, other: &Tally) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.failures.extend(other.failures.iter().cloned());
    }

    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.failed
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} done, {} skipped, {} failed",
            self.processed, self.skipped, self.failed
        )
    }
}
