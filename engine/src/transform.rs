//! In-place JPEG compression.
//!
//! Two layers protect the original: the new bytes are produced in a side
//! file and only renamed over the target once they decode (see
//! [`TransferEngine::atomic_replace`]), and a verified `.backup` copy of the
//! original exists for the whole operation in case the metadata copy or the
//! swap itself goes wrong.

use std::fs;
use std::path::Path;

use image::imageops::FilterType;
use image::DynamicImage;
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};
use tracing::{debug, error, info, warn};

use crate::config::{ChromaMode, CompressionSettings};
use crate::error::{EngineError, Result};
use crate::external::MetadataCopier;
use crate::fs_ops;
use crate::model::TransferOutcome;
use crate::transfer::{ContentKind, TransferEngine};

/// Dimensions that fit `width`×`height` inside the bounds, preserving aspect
/// ratio. `None` when the image already fits.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> Option<(u32, u32)> {
    if width <= max_width && height <= max_height {
        return None;
    }
    let scale = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_width);
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_height);
    Some((w, h))
}

fn sampling_factor(chroma: ChromaMode) -> SamplingFactor {
    match chroma {
        ChromaMode::Yuv444 => SamplingFactor::F_1_1,
        ChromaMode::Yuv422 => SamplingFactor::F_2_1,
        ChromaMode::Yuv420 => SamplingFactor::F_2_2,
    }
}

fn decode(path: &Path) -> Result<DynamicImage> {
    let processing = |reason: String| EngineError::ImageProcessing {
        path: path.to_path_buf(),
        reason,
    };
    image::ImageReader::open(path)
        .map_err(|e| EngineError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?
        .with_guessed_format()
        .map_err(|e| EngineError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?
        .decode()
        .map_err(|e| processing(e.to_string()))
}

/// Resize (if needed) and encode `img` as a JPEG at `out`.
pub fn encode_jpeg(img: &DynamicImage, settings: &CompressionSettings, out: &Path) -> Result<()> {
    let resized;
    let img = match fit_within(img.width(), img.height(), settings.max_width, settings.max_height) {
        Some((w, h)) => {
            debug!(from = ?(img.width(), img.height()), to = ?(w, h), "resizing");
            resized = img.resize_exact(w, h, FilterType::Lanczos3);
            &resized
        }
        None => img,
    };

    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let (width, height) = match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => {
            return Err(EngineError::ImageProcessing {
                path: out.to_path_buf(),
                reason: format!("{}x{} exceeds the JPEG size limit", width, height),
            })
        }
    };

    let processing = |reason: String| EngineError::ImageProcessing {
        path: out.to_path_buf(),
        reason,
    };
    let mut encoder =
        Encoder::new_file(out, settings.quality).map_err(|e| processing(e.to_string()))?;
    encoder.set_sampling_factor(sampling_factor(settings.chroma));
    encoder
        .encode(rgb.as_raw(), width, height, ColorType::Rgb)
        .map_err(|e| processing(e.to_string()))
}

fn restore_leftover_backup(engine: &mut TransferEngine, path: &Path, backup: &Path) -> Result<()> {
    let differs = !path.exists() || !engine.verifier_mut().verify_identical(backup, path)?;
    if differs {
        warn!(path = %path.display(), "restoring backup left by an interrupted run");
        engine.verified_copy(backup, path).into_result()?;
    }
    Ok(())
}

/// Compress the image at `path` in place.
///
/// Downscales to the configured bounds with Lanczos3, re-encodes at the
/// configured quality and chroma subsampling, then copies all metadata from
/// the original onto the new bytes. On any failure the original content is
/// what remains at `path`.
pub fn compress_in_place(
    engine: &mut TransferEngine,
    path: &Path,
    settings: &CompressionSettings,
    copier: &dyn MetadataCopier,
) -> TransferOutcome {
    let backup = fs_ops::backup_path(path);

    if backup.exists() {
        if let Err(e) = restore_leftover_backup(engine, path, &backup) {
            return TransferOutcome::Failed(e);
        }
    }

    let len = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            return TransferOutcome::Failed(EngineError::ReadError {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    if let Some(dir) = path.parent() {
        // Backup plus side file.
        if let Err(e) = engine.check_space(dir, len.saturating_mul(2)) {
            return TransferOutcome::Failed(e);
        }
    }

    if let TransferOutcome::Failed(e) = engine.verified_copy(path, &backup) {
        return TransferOutcome::Failed(e);
    }

    let outcome = engine.atomic_replace(path, ContentKind::Image, |side| {
        let img = decode(path)?;
        encode_jpeg(&img, settings, side)?;
        copier.copy_metadata(path, side)
    });

    match outcome {
        TransferOutcome::Failed(e) => {
            recover_from_backup(engine, path, &backup);
            TransferOutcome::Failed(e)
        }
        done => {
            if let TransferOutcome::Failed(e) = engine.remove(&backup) {
                warn!(path = %backup.display(), error = %e, "failed to remove backup");
            }
            info!(path = %path.display(), quality = settings.quality, chroma = %settings.chroma, "compressed");
            done
        }
    }
}

fn recover_from_backup(engine: &mut TransferEngine, path: &Path, backup: &Path) {
    let intact = engine
        .verifier_mut()
        .verify_identical(backup, path)
        .unwrap_or(false);
    if !intact {
        if let TransferOutcome::Failed(e) = engine.verified_copy(backup, path) {
            // Leave the backup for the next run to restore.
            error!(path = %path.display(), error = %e, "failed to restore from backup");
            return;
        }
        warn!(path = %path.display(), "restored original from backup");
    }
    if let TransferOutcome::Failed(e) = engine.remove(backup) {
        warn!(path = %backup.display(), error = %e, "failed to remove backup");
    }
}
