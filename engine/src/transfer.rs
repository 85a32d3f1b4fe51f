//! Transfer engine: the only code that writes, replaces or deletes media.
//!
//! Every mutation follows the same shape: produce into a hidden side file next
//! to the destination, verify it, then rename it into place. A process killed
//! at any point leaves the destination either untouched or complete.
//!
//! In dry-run mode every primitive runs its read-only checks (duplicate
//! detection included) and returns the outcome a live run would produce, but
//! writes nothing.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::FingerprintSettings;
use crate::error::{EngineError, Result};
use crate::fs_ops::{self, SpaceProbe, VolumeSpace};
use crate::model::TransferOutcome;
use crate::verify::Verifier;

/// What a replacement's content must decode as before it is swapped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Any format the `image` crate can decode
    Image,
    /// Well-formed JSON
    Json,
    /// Non-empty bytes
    Opaque,
}

impl ContentKind {
    fn name(self) -> &'static str {
        match self {
            ContentKind::Image => "image",
            ContentKind::Json => "JSON",
            ContentKind::Opaque => "file",
        }
    }
}

/// Check that `path` holds well-formed content of the given kind.
pub fn validate_content(path: &Path, kind: ContentKind) -> Result<()> {
    let malformed = |reason: String| EngineError::MalformedContent {
        path: path.to_path_buf(),
        kind: kind.name(),
        reason,
    };
    let read_error = |e: std::io::Error| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    };

    match kind {
        ContentKind::Image => {
            image::ImageReader::open(path)
                .map_err(read_error)?
                .with_guessed_format()
                .map_err(read_error)?
                .decode()
                .map_err(|e| malformed(e.to_string()))?;
        }
        ContentKind::Json => {
            let bytes = fs::read(path).map_err(read_error)?;
            serde_json::from_slice::<serde_json::Value>(&bytes)
                .map_err(|e| malformed(e.to_string()))?;
        }
        ContentKind::Opaque => {
            let len = fs::metadata(path).map_err(read_error)?.len();
            if len == 0 {
                return Err(malformed("empty".to_string()));
            }
        }
    }
    Ok(())
}

/// Verified copy, atomic replace and delete over one [`Verifier`].
pub struct TransferEngine {
    verifier: Verifier,
    space: Box<dyn SpaceProbe>,
    dry_run: bool,
}

impl TransferEngine {
    pub fn new(settings: &FingerprintSettings, dry_run: bool) -> Self {
        Self::with_parts(Verifier::new(settings), Box::new(VolumeSpace), dry_run)
    }

    pub fn with_parts(verifier: Verifier, space: Box<dyn SpaceProbe>, dry_run: bool) -> Self {
        TransferEngine {
            verifier,
            space,
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn verifier_mut(&mut self) -> &mut Verifier {
        &mut self.verifier
    }

    /// Fail with a precondition error when `dir` is known to lack `required` bytes.
    pub fn check_space(&self, dir: &Path, required: u64) -> Result<()> {
        fs_ops::check_space(self.space.as_ref(), dir, required)
    }

    /// Copy `src` to `dst` and prove the copy is identical.
    ///
    /// An identical `dst` is left alone (`SkippedDuplicate`). A differing
    /// `dst` is replaced only after the new bytes have been verified. `src`
    /// is never modified.
    pub fn verified_copy(&mut self, src: &Path, dst: &Path) -> TransferOutcome {
        match self.try_verified_copy(src, dst) {
            Ok(outcome) => outcome,
            Err(e) => TransferOutcome::Failed(e),
        }
    }

    fn try_verified_copy(&mut self, src: &Path, dst: &Path) -> Result<TransferOutcome> {
        if dst.exists() && self.verifier.identical(src, dst)? {
            debug!(src = %src.display(), dst = %dst.display(), "duplicate, skipping");
            return Ok(TransferOutcome::SkippedDuplicate);
        }

        let len = fs::metadata(src)
            .map_err(|e| EngineError::ReadError {
                path: src.to_path_buf(),
                source: e,
            })?
            .len();

        if self.dry_run {
            debug!(src = %src.display(), dst = %dst.display(), "dry run: would copy");
            return Ok(TransferOutcome::Succeeded);
        }

        if let Some(dir) = dst.parent() {
            self.check_space(dir, len)?;
        }

        let side = fs_ops::side_path(dst);
        discard_leftover(&side)?;

        let verified = fs_ops::copy_file_with_metadata(src, &side)
            .and_then(|_| self.verifier.verify_identical(src, &side));
        match verified {
            Ok(true) => {}
            Ok(false) => {
                self.discard(&side);
                return Err(EngineError::VerificationMismatch {
                    source_path: src.to_path_buf(),
                    destination: dst.to_path_buf(),
                });
            }
            Err(e) => {
                self.discard(&side);
                return Err(e);
            }
        }

        if let Err(e) = fs_ops::rename(&side, dst) {
            self.discard(&side);
            return Err(e);
        }
        self.verifier.invalidate(dst);
        debug!(src = %src.display(), dst = %dst.display(), bytes = len, "copied");
        Ok(TransferOutcome::Succeeded)
    }

    /// Replace `target` with content written by `produce`.
    ///
    /// `produce` receives a hidden side path in `target`'s directory. Its
    /// output must decode as `kind` before it is renamed over `target`; on
    /// any failure `target` is untouched and the side file is removed.
    pub fn atomic_replace<F>(&mut self, target: &Path, kind: ContentKind, produce: F) -> TransferOutcome
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        if self.dry_run {
            debug!(target = %target.display(), "dry run: would replace");
            return TransferOutcome::Succeeded;
        }
        match self.try_atomic_replace(target, kind, produce) {
            Ok(()) => TransferOutcome::Succeeded,
            Err(e) => TransferOutcome::Failed(e),
        }
    }

    fn try_atomic_replace<F>(&mut self, target: &Path, kind: ContentKind, produce: F) -> Result<()>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        fs_ops::ensure_parent_dir_exists(target)?;
        let side = fs_ops::side_path(target);
        discard_leftover(&side)?;

        let produced = produce(&side).and_then(|_| validate_content(&side, kind));
        if let Err(e) = produced {
            self.discard(&side);
            return Err(e);
        }

        if let Err(e) = fs_ops::rename(&side, target) {
            self.discard(&side);
            return Err(e);
        }
        self.verifier.invalidate(target);
        debug!(target = %target.display(), kind = kind.name(), "replaced");
        Ok(())
    }

    /// Delete `path`. A no-op in dry-run mode.
    pub fn remove(&mut self, path: &Path) -> TransferOutcome {
        if self.dry_run {
            debug!(path = %path.display(), "dry run: would delete");
            return TransferOutcome::Succeeded;
        }
        match fs_ops::remove_file_if_exists(path) {
            Ok(_) => {
                self.verifier.invalidate(path);
                debug!(path = %path.display(), "deleted");
                TransferOutcome::Succeeded
            }
            Err(e) => TransferOutcome::Failed(e),
        }
    }

    fn discard(&mut self, side: &Path) {
        self.verifier.invalidate(side);
        if let Err(e) = fs_ops::remove_file_if_exists(side) {
            warn!(path = %side.display(), error = %e, "failed to remove side file");
        }
    }
}

fn discard_leftover(side: &Path) -> Result<()> {
    if fs_ops::remove_file_if_exists(side)? {
        warn!(path = %side.display(), "removed side file left by an interrupted run");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::ChecksumAlgorithm;
    use crate::error::ErrorKind;
    use std::path::PathBuf;

    fn settings() -> FingerprintSettings {
        FingerprintSettings {
            algorithm: ChecksumAlgorithm::Blake3,
            partial_threshold_bytes: 1024 * 1024,
            window_bytes: 4096,
        }
    }

    fn engine(dry_run: bool) -> TransferEngine {
        TransferEngine::new(&settings(), dry_run)
    }

    fn write_jpeg(path: &Path, width: u32, height: u32) {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([120, 80, 40]));
        img.save_with_format(path, image::ImageFormat::Jpeg)
            .expect("Failed to write test JPEG");
    }

    #[test]
    fn test_verified_copy_creates_identical_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("DSCF0001.MOV");
        let dst = temp_dir.path().join("bulk").join("2024").join("DSCF0001.MOV");
        fs::write(&src, vec![42u8; 10_000]).expect("Failed to write source");

        let mut engine = engine(false);
        let outcome = engine.verified_copy(&src, &dst);
        assert!(outcome.is_success(), "unexpected outcome: {:?}", outcome);
        assert_eq!(
            fs::read(&src).expect("read src"),
            fs::read(&dst).expect("read dst")
        );
        assert!(!fs_ops::side_path(&dst).exists());
        assert!(engine.verifier_mut().verify_identical(&src, &dst).expect("compare"));
    }

    #[test]
    fn test_verified_copy_skips_identical_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.jpg");
        let dst = temp_dir.path().join("b.jpg");
        fs::write(&src, b"same").expect("Failed to write src");
        fs::write(&dst, b"same").expect("Failed to write dst");

        let outcome = engine(false).verified_copy(&src, &dst);
        assert!(matches!(outcome, TransferOutcome::SkippedDuplicate));
    }

    #[test]
    fn test_verified_copy_replaces_different_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.jpg");
        let dst = temp_dir.path().join("b.jpg");
        fs::write(&src, b"new content").expect("Failed to write src");
        fs::write(&dst, b"old").expect("Failed to write dst");

        let outcome = engine(false).verified_copy(&src, &dst);
        assert!(outcome.is_success());
        assert_eq!(fs::read(&dst).expect("read dst"), b"new content");
    }

    #[test]
    fn test_verified_copy_missing_source_fails_without_side_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("missing.jpg");
        let dst = temp_dir.path().join("dst.jpg");

        let outcome = engine(false).verified_copy(&src, &dst);
        let err = outcome.error().expect("copy must fail");
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert!(!dst.exists());
        assert!(!fs_ops::side_path(&dst).exists());
    }

    #[test]
    fn test_verified_copy_dry_run_writes_nothing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.jpg");
        let dst = temp_dir.path().join("out").join("a.jpg");
        fs::write(&src, b"bytes").expect("Failed to write src");

        let outcome = engine(true).verified_copy(&src, &dst);
        assert!(outcome.is_success());
        assert!(!dst.exists());
        assert!(!temp_dir.path().join("out").exists());
    }

    #[test]
    fn test_verified_copy_removes_stale_side_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.jpg");
        let dst = temp_dir.path().join("final").join("a.jpg");
        fs::write(&src, b"complete").expect("Failed to write src");
        fs::create_dir(temp_dir.path().join("final")).expect("Failed to create final");
        fs::write(fs_ops::side_path(&dst), b"compl").expect("Failed to write stale side");

        let outcome = engine(false).verified_copy(&src, &dst);
        assert!(outcome.is_success());
        assert!(!fs_ops::side_path(&dst).exists());
        assert_eq!(fs::read(&dst).expect("read dst"), b"complete");
    }

    #[test]
    fn test_verified_copy_insufficient_space_is_precondition() {
        struct NoSpace;
        impl SpaceProbe for NoSpace {
            fn available_bytes(&self, _path: &Path) -> Option<u64> {
                Some(0)
            }
        }

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.mov");
        let dst = temp_dir.path().join("b.mov");
        fs::write(&src, b"video").expect("Failed to write src");

        let mut engine =
            TransferEngine::with_parts(Verifier::new(&settings()), Box::new(NoSpace), false);
        let outcome = engine.verified_copy(&src, &dst);
        assert!(outcome.error().expect("must fail").is_precondition());
        assert!(!dst.exists());
    }

    #[test]
    fn test_atomic_replace_swaps_valid_json() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("data").join("photos.json");

        let mut engine = engine(false);
        let outcome = engine.atomic_replace(&target, ContentKind::Json, |side| {
            fs::write(side, br#"{"total_images": 0}"#).map_err(|e| EngineError::WriteError {
                path: side.to_path_buf(),
                source: e,
            })
        });
        assert!(outcome.is_success());
        assert_eq!(
            fs::read_to_string(&target).expect("read target"),
            r#"{"total_images": 0}"#
        );
    }

    #[test]
    fn test_atomic_replace_rejects_malformed_content() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("DSCF0001.JPG");
        write_jpeg(&target, 16, 16);
        let before = fs::read(&target).expect("read target");

        let mut engine = engine(false);
        let outcome = engine.atomic_replace(&target, ContentKind::Image, |side| {
            fs::write(side, b"not a jpeg").map_err(|e| EngineError::WriteError {
                path: side.to_path_buf(),
                source: e,
            })
        });
        let err = outcome.error().expect("must fail");
        assert_eq!(err.kind(), ErrorKind::VerificationMismatch);
        assert_eq!(fs::read(&target).expect("read target"), before);
        assert!(!fs_ops::side_path(&target).exists());
    }

    #[test]
    fn test_atomic_replace_producer_failure_leaves_target() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("keep.bin");
        fs::write(&target, b"original").expect("Failed to write target");

        let mut engine = engine(false);
        let outcome = engine.atomic_replace(&target, ContentKind::Opaque, |side| {
            fs::write(side, b"half").expect("Failed to write side");
            Err(EngineError::ImageProcessing {
                path: PathBuf::from(side),
                reason: "encoder crashed".to_string(),
            })
        });
        assert!(outcome.error().is_some());
        assert_eq!(fs::read(&target).expect("read target"), b"original");
        assert!(!fs_ops::side_path(&target).exists());
    }

    #[test]
    fn test_atomic_replace_dry_run_does_not_call_producer() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("x.json");

        let mut called = false;
        let outcome = engine(true).atomic_replace(&target, ContentKind::Json, |_| {
            called = true;
            Ok(())
        });
        assert!(outcome.is_success());
        assert!(!called);
        assert!(!target.exists());
    }

    #[test]
    fn test_remove_respects_dry_run() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("DSCF0001.RAF");
        fs::write(&path, b"raw").expect("Failed to write raw");

        assert!(engine(true).remove(&path).is_success());
        assert!(path.exists());
        assert!(engine(false).remove(&path).is_success());
        assert!(!path.exists());
    }

    #[test]
    fn test_validate_content_kinds() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let jpeg = temp_dir.path().join(".x.photoflow-partial");
        write_jpeg(&temp_dir.path().join("x.jpg"), 8, 8);
        fs::copy(temp_dir.path().join("x.jpg"), &jpeg).expect("Failed to copy jpeg");
        assert!(validate_content(&jpeg, ContentKind::Image).is_ok());

        let empty = temp_dir.path().join("empty");
        fs::write(&empty, b"").expect("Failed to write empty");
        assert!(validate_content(&empty, ContentKind::Opaque).is_err());
        assert!(validate_content(&empty, ContentKind::Json).is_err());
    }
}
