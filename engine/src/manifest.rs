//! Gallery manifest (`photos.json`).

use std::fs;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::external::ImageMetadata;
use crate::model::TransferOutcome;
use crate::transfer::{ContentKind, TransferEngine};

/// One published image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub file_size: u64,
    /// `WIDTHxHEIGHT`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<String>,
    #[serde(flatten)]
    pub metadata: ImageMetadata,
}

impl ManifestEntry {
    pub fn new(filename: impl Into<String>, file_size: u64, metadata: ImageMetadata) -> Self {
        let dimensions = match (metadata.width, metadata.height) {
            (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
            _ => None,
        };
        ManifestEntry {
            filename: filename.into(),
            file_size,
            dimensions,
            metadata,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub generated_at: String,
    pub total_images: usize,
    pub images: Vec<ManifestEntry>,
}

impl Manifest {
    /// Entries are sorted by filename.
    pub fn new(mut images: Vec<ManifestEntry>, generated_at: DateTime<Utc>) -> Self {
        images.sort_by(|a, b| a.filename.cmp(&b.filename));
        Manifest {
            generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            total_images: images.len(),
            images,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::MalformedContent {
            path: Default::default(),
            kind: "JSON",
            reason: e.to_string(),
        })
    }

    /// Atomically replace the manifest at `path`.
    pub fn write(&self, engine: &mut TransferEngine, path: &Path) -> TransferOutcome {
        let json = match self.to_json() {
            Ok(json) => json,
            Err(e) => return TransferOutcome::Failed(e),
        };
        engine.atomic_replace(path, ContentKind::Json, |side| {
            fs::write(side, json.as_bytes()).map_err(|e| EngineError::WriteError {
                path: side.to_path_buf(),
                source: e,
            })
        })
    }
}
