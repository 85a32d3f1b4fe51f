//! Lifecycle operations.
//!
//! This module provides the operations that move media between storage roles:
//! - Import: capture device → staging / raw archive / bulk storage
//! - Finalize: staging → compressed final archive → back onto the device
//! - Cleanup: delete raw sidecars whose still image was never finalized
//! - Publish: reconcile the gallery against the final archive and deploy it
//! - Recompress, Backup and Status, for maintenance
//!
//! Operations process one item at a time. A failing item is recorded in the
//! operation's report and the batch continues; precondition failures are
//! returned as `Err` before anything is written.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{roles, Config, StorageConfig};
use crate::error::{EngineError, Result};
use crate::external::{
    sync_with_fallback, ArtifactBuilder, Confirmer, MetadataCopier, MetadataExtractor, TreeSync,
};
use crate::fs_ops::{self, MediaFile};
use crate::manifest::{Manifest, ManifestEntry};
use crate::model::{ItemFailure, Location, MediaCatalog, MediaKind, Tally, TransferOutcome};
use crate::progress::{Operation, ProgressCallback};
use crate::reconcile::{self, DesiredEntry};
use crate::report::{
    BackupReport, CleanupReport, FinalizeReport, ImportReport, PublishReport, RecompressReport,
    StatusReport, StepStatus,
};
use crate::transfer::TransferEngine;
use crate::transform;

/// External capabilities a workflow depends on.
pub struct Collaborators<'a> {
    pub metadata_copier: &'a dyn MetadataCopier,
    pub extractor: &'a dyn MetadataExtractor,
    pub sync: &'a dyn TreeSync,
    /// Gallery build; `None` skips the build step
    pub builder: Option<&'a dyn ArtifactBuilder>,
    pub confirmer: &'a dyn Confirmer,
}

/// Runs lifecycle operations against one configuration.
pub struct Workflow<'a> {
    config: &'a Config,
    engine: TransferEngine,
    tools: Collaborators<'a>,
    progress: Option<&'a dyn ProgressCallback>,
}

fn existing(value: &Option<PathBuf>) -> Option<&Path> {
    value.as_deref().filter(|p| p.is_dir())
}

fn of_kind(files: Vec<MediaFile>, kind: MediaKind) -> Vec<MediaFile> {
    files.into_iter().filter(|f| f.kind == kind).collect()
}

fn base_set(files: &[MediaFile]) -> BTreeSet<String> {
    files.iter().map(|f| f.base.clone()).collect()
}

fn total_len(files: &[MediaFile]) -> u64 {
    files.iter().map(|f| f.len).sum()
}

fn finalized_bases(config: &Config) -> Result<BTreeSet<String>> {
    match existing(&config.storage.final_archive) {
        Some(dir) => {
            let stills = of_kind(fs_ops::scan_dir(dir, &config.media)?, MediaKind::StillImage);
            Ok(base_set(&stills))
        }
        None => Ok(BTreeSet::new()),
    }
}

/// Raw sidecars in `raw_dir` with no same-named still image in `final_dir`.
pub fn orphaned_raws(raw_dir: &Path, final_dir: &Path, config: &Config) -> Result<Vec<PathBuf>> {
    let finals = of_kind(fs_ops::scan_dir(final_dir, &config.media)?, MediaKind::StillImage);
    let finals = base_set(&finals);
    let raws = of_kind(fs_ops::scan_dir(raw_dir, &config.media)?, MediaKind::RawSidecar);
    Ok(raws
        .into_iter()
        .filter(|raw| !finals.contains(&raw.base))
        .map(|raw| raw.path)
        .collect())
}

fn remote_join(target: &str, name: &str) -> String {
    format!("{}/{}", target.trim_end_matches('/'), name)
}

/// A skipped copy rests on a cached comparison. Re-read both sides before
/// anything is deleted on the strength of it.
fn recheck_duplicate(
    engine: &mut TransferEngine,
    src: &Path,
    dst: &Path,
    outcome: TransferOutcome,
) -> TransferOutcome {
    if !matches!(outcome, TransferOutcome::SkippedDuplicate) {
        return outcome;
    }
    match engine.verifier_mut().verify_identical(src, dst) {
        Ok(true) => outcome,
        Ok(false) => TransferOutcome::Failed(EngineError::VerificationMismatch {
            source_path: src.to_path_buf(),
            destination: dst.to_path_buf(),
        }),
        Err(e) => TransferOutcome::Failed(e),
    }
}

fn discard(engine: &mut TransferEngine, path: &Path) {
    if let TransferOutcome::Failed(e) = engine.remove(path) {
        warn!(path = %path.display(), error = %e, "failed to remove working file");
    }
}

// ---------------------------------------------------------------------------
// Finalize stages
//
// Each staged image moves Pending → Transformed → Copied → SourceRemoved.
// Only a Copied value can remove the staged original, and a Copied value only
// exists once the final archive holds verified, compressed content.
// ---------------------------------------------------------------------------

struct Pending {
    staged: PathBuf,
}

struct Transformed {
    staged: PathBuf,
    /// Compressed bytes: the scratch copy, or a private copy in a dry run
    content: PathBuf,
    scratch: Option<PathBuf>,
}

struct Copied {
    staged: PathBuf,
    content: PathBuf,
    scratch: Option<PathBuf>,
    final_path: PathBuf,
    outcome: TransferOutcome,
}

struct SourceRemoved {
    /// Where the compressed bytes can be read from once the stage is done
    readable: PathBuf,
    outcome: TransferOutcome,
}

impl Pending {
    // In a dry run the staged file is compressed into a private copy under
    // `preview`, outside every storage role.
    fn transform(
        self,
        engine: &mut TransferEngine,
        config: &Config,
        copier: &dyn MetadataCopier,
        preview: Option<&Path>,
    ) -> Result<Transformed> {
        let scratch = fs_ops::scratch_path(&self.staged);
        if scratch.exists() {
            warn!(path = %scratch.display(), "discarding scratch copy left by an interrupted run");
            engine.remove(&scratch).into_result()?;
        }

        if let Some(dir) = preview {
            let copy = dir.join(self.staged.file_name().unwrap_or_default());
            fs_ops::copy_file_with_metadata(&self.staged, &copy)?;
            let mut private = TransferEngine::new(&config.fingerprint, false);
            transform::compress_in_place(&mut private, &copy, &config.compression, copier)
                .into_result()?;
            return Ok(Transformed {
                staged: self.staged,
                content: copy,
                scratch: None,
            });
        }

        engine.verified_copy(&self.staged, &scratch).into_result()?;
        if let TransferOutcome::Failed(e) =
            transform::compress_in_place(engine, &scratch, &config.compression, copier)
        {
            discard(engine, &scratch);
            return Err(e);
        }
        Ok(Transformed {
            staged: self.staged,
            content: scratch.clone(),
            scratch: Some(scratch),
        })
    }
}

impl Transformed {
    fn copy(self, engine: &mut TransferEngine, final_dir: &Path) -> Result<Copied> {
        let final_path = final_dir.join(self.staged.file_name().unwrap_or_default());
        let outcome = engine.verified_copy(&self.content, &final_path);
        let outcome = recheck_duplicate(engine, &self.content, &final_path, outcome);
        if let TransferOutcome::Failed(e) = outcome {
            if let Some(scratch) = &self.scratch {
                discard(engine, scratch);
            }
            return Err(e);
        }
        Ok(Copied {
            staged: self.staged,
            content: self.content,
            scratch: self.scratch,
            final_path,
            outcome,
        })
    }
}

impl Copied {
    fn remove_source(self, engine: &mut TransferEngine) -> Result<SourceRemoved> {
        if let Some(scratch) = &self.scratch {
            engine.remove(scratch).into_result()?;
        }
        engine.remove(&self.staged).into_result()?;
        let readable = if engine.is_dry_run() {
            self.content
        } else {
            self.final_path
        };
        Ok(SourceRemoved {
            readable,
            outcome: self.outcome,
        })
    }
}

impl<'a> Workflow<'a> {
    pub fn new(config: &'a Config, tools: Collaborators<'a>, dry_run: bool) -> Self {
        Self::with_engine(config, tools, TransferEngine::new(&config.fingerprint, dry_run))
    }

    pub fn with_engine(config: &'a Config, tools: Collaborators<'a>, engine: TransferEngine) -> Self {
        Workflow {
            config,
            engine,
            tools,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.engine.is_dry_run()
    }

    fn started(&self, operation: Operation, total: usize) {
        if let Some(progress) = self.progress {
            progress.on_operation_started(operation, total);
        }
    }

    fn item_started(&self, index: usize, path: &Path) {
        if let Some(progress) = self.progress {
            progress.on_item_started(index, path);
        }
    }

    fn item_done(&self, index: usize, path: &Path, outcome: &TransferOutcome) {
        if let TransferOutcome::Failed(e) = outcome {
            warn!(path = %path.display(), kind = %e.kind(), error = %e, "item failed");
        }
        if let Some(progress) = self.progress {
            progress.on_item_completed(index, path, outcome);
        }
    }

    fn message(&self, message: &str) {
        debug!("{}", message);
        if let Some(progress) = self.progress {
            progress.on_message(message);
        }
    }

    fn completed(&self, operation: Operation, tally: &Tally) {
        info!(%operation, processed = tally.processed, skipped = tally.skipped, failed = tally.failed, "operation finished");
        if let Some(progress) = self.progress {
            progress.on_operation_completed(operation, tally);
        }
    }

    fn transfer_item(
        &mut self,
        index: usize,
        src: &Path,
        dst_dir: &Path,
        move_source: bool,
        tally: &mut Tally,
    ) -> bool {
        self.item_started(index, src);
        let dst = dst_dir.join(src.file_name().unwrap_or_default());
        let mut outcome = self.engine.verified_copy(src, &dst);
        if move_source && outcome.is_success() {
            if let TransferOutcome::Failed(e) = self.engine.remove(src) {
                outcome = TransferOutcome::Failed(e);
            }
        }
        tally.record(src, &outcome);
        self.item_done(index, src, &outcome);
        outcome.is_settled()
    }

    // Identical copies already in `dir` cost nothing.
    fn pending_bytes(&mut self, dir: &Path, files: &[MediaFile]) -> u64 {
        let verifier = self.engine.verifier_mut();
        files
            .iter()
            .filter(|file| {
                let dst = dir.join(file.path.file_name().unwrap_or_default());
                !(dst.exists() && verifier.identical(&file.path, &dst).unwrap_or(false))
            })
            .map(|file| file.len)
            .sum()
    }

    // -----------------------------------------------------------------------
    // Import
    // -----------------------------------------------------------------------

    /// Pull new media off the capture device.
    ///
    /// Motion clips are moved to bulk storage; still images are copied to
    /// staging and raw sidecars to the raw archive, leaving the device copies
    /// in place. Stills whose base name is already in the final archive are
    /// left alone.
    pub fn import(&mut self) -> Result<ImportReport> {
        let run_id = Uuid::new_v4();
        let dry_run = self.is_dry_run();
        let span = info_span!("operation", op = %Operation::Import, %run_id, dry_run);
        let _enter = span.enter();

        let config = self.config;
        let storage = &config.storage;
        let capture = StorageConfig::require_existing(roles::CAPTURE_SOURCE, &storage.capture_source)?;
        let finalized = finalized_bases(config)?;
        let files = fs_ops::scan_tree(capture, &config.media)?;

        let mut clips = Vec::new();
        let mut stills = Vec::new();
        let mut raws = Vec::new();
        let mut skipped_finalized = 0;
        for file in files {
            match file.kind {
                MediaKind::MotionClip => clips.push(file),
                MediaKind::StillImage if finalized.contains(&file.base) => {
                    debug!(path = %file.path.display(), "already finalized, not importing");
                    skipped_finalized += 1;
                }
                MediaKind::StillImage => stills.push(file),
                MediaKind::RawSidecar => raws.push(file),
            }
        }

        // Preconditions, all checked before the first write.
        let bulk = if clips.is_empty() {
            None
        } else {
            Some(StorageConfig::require_existing(roles::BULK_STORAGE, &storage.bulk_storage)?)
        };
        let staging = if stills.is_empty() {
            None
        } else {
            Some(StorageConfig::require(roles::STAGING, &storage.staging)?)
        };
        let raw_archive = if raws.is_empty() {
            None
        } else {
            Some(StorageConfig::require(roles::RAW_ARCHIVE, &storage.raw_archive)?)
        };
        for (dir, files) in [(bulk, &clips), (staging, &stills), (raw_archive, &raws)] {
            if let Some(dir) = dir {
                let required = self.pending_bytes(dir, files);
                self.engine.check_space(dir, required)?;
            }
        }

        info!(
            clips = clips.len(),
            stills = stills.len(),
            raws = raws.len(),
            skipped_finalized,
            "import plan"
        );
        self.started(Operation::Import, clips.len() + stills.len() + raws.len());

        let mut report = ImportReport {
            run_id,
            dry_run,
            clips: Tally::default(),
            stills: Tally::default(),
            raws: Tally::default(),
            skipped_finalized,
        };
        let mut index = 0;
        let batches = [
            (&clips, bulk, true, &mut report.clips),
            (&stills, staging, false, &mut report.stills),
            (&raws, raw_archive, false, &mut report.raws),
        ];
        for (files, dir, move_source, tally) in batches {
            let Some(dir) = dir else { continue };
            for file in files.iter() {
                self.transfer_item(index, &file.path, dir, move_source, tally);
                index += 1;
            }
        }

        self.completed(Operation::Import, &report.total());
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Finalize
    // -----------------------------------------------------------------------

    /// Compress every staged image into the final archive, copy the results
    /// back onto the capture device, and report raw archive orphans.
    pub fn finalize(&mut self) -> Result<FinalizeReport> {
        let run_id = Uuid::new_v4();
        let dry_run = self.is_dry_run();
        let span = info_span!("operation", op = %Operation::Finalize, %run_id, dry_run);
        let _enter = span.enter();

        let config = self.config;
        let storage = &config.storage;
        let staging = StorageConfig::require_existing(roles::STAGING, &storage.staging)?;
        let final_dir = StorageConfig::require(roles::FINAL_ARCHIVE, &storage.final_archive)?;
        self.tools.metadata_copier.ensure_available()?;
        let staged = of_kind(fs_ops::scan_dir(staging, &config.media)?, MediaKind::StillImage);
        self.engine.check_space(final_dir, total_len(&staged))?;

        self.discard_stray_scratch(staging);
        let preview = if dry_run {
            Some(tempfile::tempdir().map_err(|e| EngineError::DirectoryCreationFailed {
                path: std::env::temp_dir(),
                source: e,
            })?)
        } else {
            None
        };

        let mut report = FinalizeReport {
            run_id,
            dry_run,
            finalized: Tally::default(),
            copied_to_device: Tally::default(),
            device_raws_removed: Tally::default(),
            orphaned_raws: Vec::new(),
        };

        self.message(&format!("Found {} photo(s) in staging", staged.len()));
        self.started(Operation::Finalize, staged.len());
        let mut finalized = Vec::new();
        for (index, file) in staged.iter().enumerate() {
            self.item_started(index, &file.path);
            let preview_dir = preview.as_ref().map(|dir| dir.path());
            let outcome = match self.finalize_item(&file.path, final_dir, preview_dir) {
                Ok(done) => {
                    finalized.push((file.base.clone(), done.readable));
                    done.outcome
                }
                Err(e) => TransferOutcome::Failed(e),
            };
            report.finalized.record(&file.path, &outcome);
            self.item_done(index, &file.path, &outcome);
        }

        if config.device.copy_back {
            self.copy_back_to_device(&finalized, &mut report);
        }

        report.orphaned_raws = match (
            existing(&storage.raw_archive),
            existing(&storage.final_archive),
        ) {
            (Some(raw_dir), Some(final_dir)) => orphaned_raws(raw_dir, final_dir, config)
                .unwrap_or_else(|e| {
                    warn!(error = %e, "could not compute orphaned raws");
                    Vec::new()
                }),
            _ => Vec::new(),
        };
        self.message(&format!(
            "Found {} orphaned RAW file(s); run cleanup to remove them",
            report.orphaned_raws.len()
        ));

        self.completed(Operation::Finalize, &report.finalized);
        Ok(report)
    }

    fn finalize_item(
        &mut self,
        staged: &Path,
        final_dir: &Path,
        preview: Option<&Path>,
    ) -> Result<SourceRemoved> {
        let config = self.config;
        let copier = self.tools.metadata_copier;
        let pending = Pending {
            staged: staged.to_path_buf(),
        };
        let transformed = pending.transform(&mut self.engine, config, copier, preview)?;
        let copied = transformed.copy(&mut self.engine, final_dir)?;
        copied.remove_source(&mut self.engine)
    }

    fn discard_stray_scratch(&mut self, staging: &Path) {
        let Ok(entries) = std::fs::read_dir(staging) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if let Some(origin) = fs_ops::scratch_origin(&path) {
                if !origin.exists() {
                    warn!(path = %path.display(), "removing stray scratch copy");
                    discard(&mut self.engine, &path);
                }
            }
        }
    }

    fn copy_back_to_device(&mut self, finalized: &[(String, PathBuf)], report: &mut FinalizeReport) {
        let config = self.config;
        let Some(capture) = existing(&config.storage.capture_source) else {
            self.message("Camera not connected; skipping copy back to camera");
            return;
        };
        if finalized.is_empty() {
            return;
        }

        let device_dir = match fs_ops::resolve_device_folder(capture, &config.device.folder) {
            Ok(dir) => dir,
            Err(e) => {
                report.copied_to_device.record_error(capture, &e);
                return;
            }
        };
        self.message(&format!(
            "Copying {} photo(s) back to {}",
            finalized.len(),
            device_dir.display()
        ));

        for (index, (_, content)) in finalized.iter().enumerate() {
            self.item_started(index, content);
            let dst = device_dir.join(content.file_name().unwrap_or_default());
            let outcome = self.engine.verified_copy(content, &dst);
            report.copied_to_device.record(content, &outcome);
            self.item_done(index, content, &outcome);
        }

        if config.device.remove_raws {
            let bases: BTreeSet<&str> = finalized.iter().map(|(base, _)| base.as_str()).collect();
            self.remove_device_raws(capture, &bases, report);
        }
    }

    fn remove_device_raws(&mut self, capture: &Path, bases: &BTreeSet<&str>, report: &mut FinalizeReport) {
        let config = self.config;
        let Some(raw_dir) = config.storage.raw_archive.as_deref() else {
            self.message("Raw archive not configured; leaving RAW files on the camera");
            return;
        };
        let device_raws = match fs_ops::scan_tree(capture, &config.media) {
            Ok(files) => of_kind(files, MediaKind::RawSidecar),
            Err(e) => {
                report.device_raws_removed.record_error(capture, &e);
                return;
            }
        };

        for (index, raw) in device_raws
            .iter()
            .filter(|raw| bases.contains(raw.base.as_str()))
            .enumerate()
        {
            self.item_started(index, &raw.path);
            let archived = raw_dir.join(raw.path.file_name().unwrap_or_default());
            let outcome = self.engine.verified_copy(&raw.path, &archived);
            let mut outcome = recheck_duplicate(&mut self.engine, &raw.path, &archived, outcome);
            if outcome.is_settled() {
                outcome = match self.engine.remove(&raw.path) {
                    TransferOutcome::Failed(e) => TransferOutcome::Failed(e),
                    _ => TransferOutcome::Succeeded,
                };
            }
            report.device_raws_removed.record(&raw.path, &outcome);
            self.item_done(index, &raw.path, &outcome);
        }
    }

    // -----------------------------------------------------------------------
    // Cleanup
    // -----------------------------------------------------------------------

    /// Delete raw sidecars with no finalized still image.
    ///
    /// The orphan list is always reported through the progress callback
    /// first. A live run then asks the confirmer; declining returns
    /// `ConfirmationDeclined` and nothing is deleted.
    pub fn cleanup(&mut self) -> Result<CleanupReport> {
        let run_id = Uuid::new_v4();
        let dry_run = self.is_dry_run();
        let span = info_span!("operation", op = %Operation::Cleanup, %run_id, dry_run);
        let _enter = span.enter();

        let config = self.config;
        let storage = &config.storage;
        let raw_dir = StorageConfig::require_existing(roles::RAW_ARCHIVE, &storage.raw_archive)?;
        // Without the final archive every raw would look orphaned.
        let final_dir = StorageConfig::require_existing(roles::FINAL_ARCHIVE, &storage.final_archive)?;
        let orphans = orphaned_raws(raw_dir, final_dir, config)?;

        self.message(&format!("Found {} orphaned RAW file(s)", orphans.len()));
        for orphan in &orphans {
            self.message(&format!("  {}", orphan.display()));
        }

        let mut report = CleanupReport {
            run_id,
            dry_run,
            orphans,
            removed: Tally::default(),
        };
        if report.orphans.is_empty() {
            self.completed(Operation::Cleanup, &report.removed);
            return Ok(report);
        }

        if !dry_run
            && !self
                .tools
                .confirmer
                .confirm("Delete these orphaned RAW files?", &report.orphans)
        {
            info!(pending = report.orphans.len(), "cleanup declined");
            return Err(EngineError::ConfirmationDeclined {
                pending: report.orphans.len(),
            });
        }

        self.started(Operation::Cleanup, report.orphans.len());
        for (index, orphan) in report.orphans.iter().enumerate() {
            self.item_started(index, orphan);
            let outcome = self.engine.remove(orphan);
            report.removed.record(orphan, &outcome);
            self.item_done(index, orphan, &outcome);
        }

        self.completed(Operation::Cleanup, &report.removed);
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Publish
    // -----------------------------------------------------------------------

    /// Make the gallery hold exactly the final-archive images rated at or
    /// above the threshold, regenerate the manifest, then build and deploy.
    pub fn publish(&mut self) -> Result<PublishReport> {
        let run_id = Uuid::new_v4();
        let dry_run = self.is_dry_run();
        let span = info_span!("operation", op = %Operation::Publish, %run_id, dry_run);
        let _enter = span.enter();

        let config = self.config;
        let settings = &config.publish;
        let final_dir =
            StorageConfig::require_existing(roles::FINAL_ARCHIVE, &config.storage.final_archive)?;
        let root = StorageConfig::require_existing(roles::PUBLISH_ROOT, &config.storage.publish_root)?;
        let photos_dir = root.join(&settings.photos_dir);

        let mut unreadable = Tally::default();
        let mut unknown = BTreeSet::new();

        // Desired: every final image, with rating and fingerprint.
        let finals = of_kind(fs_ops::scan_dir(final_dir, &config.media)?, MediaKind::StillImage);
        let mut desired = BTreeMap::new();
        let mut sources = BTreeMap::new();
        let mut candidates = BTreeMap::new();
        for file in &finals {
            let read = self.tools.extractor.extract(&file.path).and_then(|metadata| {
                let fingerprint = self.engine.verifier_mut().fingerprint_default(&file.path)?;
                Ok((metadata, fingerprint))
            });
            let (metadata, fingerprint) = match read {
                Ok(read) => read,
                Err(e) => {
                    unreadable.record_error(&file.path, &e);
                    unknown.insert(file.base.clone());
                    continue;
                }
            };
            if metadata.rating >= settings.min_rating {
                let name = file.path.file_name().unwrap_or_default().to_string_lossy();
                candidates.insert(
                    file.base.clone(),
                    ManifestEntry::new(name, file.len, metadata.clone()),
                );
            }
            desired.insert(
                file.base.clone(),
                DesiredEntry {
                    fingerprint,
                    rating: metadata.rating,
                },
            );
            sources.insert(file.base.clone(), file.path.clone());
        }

        // Observed: what the gallery holds now.
        let mut observed = BTreeMap::new();
        let mut present = BTreeMap::new();
        if photos_dir.is_dir() {
            let gallery = of_kind(fs_ops::scan_dir(&photos_dir, &config.media)?, MediaKind::StillImage);
            for file in gallery {
                if unknown.contains(&file.base) {
                    continue;
                }
                match self.engine.verifier_mut().fingerprint_default(&file.path) {
                    Ok(fingerprint) => {
                        observed.insert(file.base.clone(), fingerprint);
                        present.insert(file.base, file.path);
                    }
                    Err(e) => unreadable.record_error(&file.path, &e),
                }
            }
        }

        let plan = reconcile::plan(&desired, &observed, settings.min_rating);
        self.message(&format!(
            "Publish plan: {} to add, {} to remove, {} unchanged",
            plan.to_add.len(),
            plan.to_remove.len(),
            plan.unchanged.len()
        ));
        self.started(Operation::Publish, plan.to_add.len() + plan.to_remove.len());

        let mut added = Tally::default();
        let mut removed = Tally::default();
        // The manifest lists only what the gallery actually holds afterwards.
        let mut published: BTreeSet<&str> = plan.unchanged.iter().map(String::as_str).collect();
        let mut index = 0;
        for (base, reason) in &plan.to_add {
            let Some(src) = sources.get(base) else { continue };
            debug!(base = %base, ?reason, "publishing");
            if self.transfer_item(index, src, &photos_dir, false, &mut added) {
                published.insert(base.as_str());
            }
            index += 1;
        }
        for base in &plan.to_remove {
            let Some(path) = present.get(base) else { continue };
            self.item_started(index, path);
            let outcome = self.engine.remove(path);
            removed.record(path, &outcome);
            self.item_done(index, path, &outcome);
            index += 1;
        }

        let manifest_path = root.join(&settings.manifest_path);
        let entries = candidates
            .into_iter()
            .filter(|(base, _)| published.contains(base.as_str()))
            .map(|(_, entry)| entry)
            .collect();
        let manifest = Manifest::new(entries, Utc::now());
        let mut manifest_tally = Tally::default();
        let outcome = manifest.write(&mut self.engine, &manifest_path);
        manifest_tally.record(&manifest_path, &outcome);
        self.message(&format!(
            "Manifest: {} image(s) → {}",
            manifest.total_images,
            manifest_path.display()
        ));

        let build = match self.tools.builder {
            None => StepStatus::NotConfigured,
            Some(_) if dry_run => StepStatus::DryRun,
            Some(builder) => {
                self.message("Building gallery");
                match builder.build(root) {
                    Ok(()) => StepStatus::Done,
                    Err(e) => StepStatus::Failed(ItemFailure::from_error(root, &e)),
                }
            }
        };

        let sync = match config.remote.publish_target.as_deref() {
            None => StepStatus::NotConfigured,
            Some(_) if dry_run => StepStatus::DryRun,
            Some(_) if build.is_failure() => StepStatus::Skipped,
            Some(target) => {
                let output = root.join(&settings.build_output);
                self.message(&format!("Deploying {} to {}", output.display(), target));
                self.sync_tree(&output, target)
            }
        };

        let mut overall = Tally::default();
        overall.merge(&added);
        overall.merge(&removed);
        self.completed(Operation::Publish, &overall);

        Ok(PublishReport {
            run_id,
            dry_run,
            plan,
            added,
            removed,
            unreadable,
            manifest: manifest_tally,
            build,
            sync,
        })
    }

    fn sync_tree(&self, local: &Path, remote: &str) -> StepStatus {
        match sync_with_fallback(self.tools.sync, local, remote, &self.config.remote.jump_hosts) {
            Ok(route) => StepStatus::Synced(route),
            Err(e) => StepStatus::Failed(ItemFailure::from_error(local, &e)),
        }
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Re-run compression over every image in the final archive.
    pub fn recompress(&mut self) -> Result<RecompressReport> {
        let run_id = Uuid::new_v4();
        let dry_run = self.is_dry_run();
        let span = info_span!("operation", op = %Operation::Recompress, %run_id, dry_run);
        let _enter = span.enter();

        let config = self.config;
        let final_dir =
            StorageConfig::require_existing(roles::FINAL_ARCHIVE, &config.storage.final_archive)?;
        self.tools.metadata_copier.ensure_available()?;
        let images = of_kind(fs_ops::scan_dir(final_dir, &config.media)?, MediaKind::StillImage);

        let c = &config.compression;
        self.message(&format!(
            "{} image(s) to recompress at {}x{} max, quality {}, chroma {}",
            images.len(),
            c.max_width,
            c.max_height,
            c.quality,
            c.chroma
        ));
        let paths: Vec<PathBuf> = images.iter().map(|f| f.path.clone()).collect();
        if !dry_run
            && !paths.is_empty()
            && !self.tools.confirmer.confirm("Recompress these images in place?", &paths)
        {
            return Err(EngineError::ConfirmationDeclined {
                pending: paths.len(),
            });
        }

        self.started(Operation::Recompress, paths.len());
        let mut compressed = Tally::default();
        for (index, path) in paths.iter().enumerate() {
            self.item_started(index, path);
            let outcome =
                transform::compress_in_place(&mut self.engine, path, c, self.tools.metadata_copier);
            compressed.record(path, &outcome);
            self.item_done(index, path, &outcome);
        }

        self.completed(Operation::Recompress, &compressed);
        Ok(RecompressReport {
            run_id,
            dry_run,
            compressed,
        })
    }

    /// Mirror the final and raw archives to the remote backup target.
    pub fn backup(&mut self) -> Result<BackupReport> {
        let run_id = Uuid::new_v4();
        let dry_run = self.is_dry_run();
        let span = info_span!("operation", op = %Operation::Backup, %run_id, dry_run);
        let _enter = span.enter();

        let config = self.config;
        let target = config
            .remote
            .backup_target
            .as_deref()
            .ok_or(EngineError::StorageNotConfigured {
                role: roles::BACKUP_TARGET,
            })?;
        let final_dir =
            StorageConfig::require_existing(roles::FINAL_ARCHIVE, &config.storage.final_archive)?;
        let raw_dir = StorageConfig::require_existing(roles::RAW_ARCHIVE, &config.storage.raw_archive)?;

        let mut report = BackupReport {
            run_id,
            dry_run,
            final_archive: StepStatus::DryRun,
            raw_archive: StepStatus::DryRun,
        };
        let jobs = [
            (final_dir, "final", &mut report.final_archive),
            (raw_dir, "raws", &mut report.raw_archive),
        ];
        self.started(Operation::Backup, jobs.len());
        let mut tally = Tally::default();
        for (index, (local, name, status)) in jobs.into_iter().enumerate() {
            let remote = remote_join(target, name);
            self.message(&format!("Backing up {} to {}", local.display(), remote));
            if dry_run {
                tally.processed += 1;
                continue;
            }
            self.item_started(index, local);
            *status = self.sync_tree(local, &remote);
            let outcome = match status {
                StepStatus::Failed(failure) => {
                    tally.failed += 1;
                    tally.failures.push(failure.clone());
                    "failed"
                }
                _ => {
                    tally.processed += 1;
                    "done"
                }
            };
            debug!(local = %local.display(), outcome, "backup step");
        }

        self.completed(Operation::Backup, &tally);
        Ok(report)
    }

    /// Read-only snapshot of every storage role, counted per base name.
    pub fn status(&self) -> Result<StatusReport> {
        let config = self.config;
        let storage = &config.storage;
        let media = &config.media;

        let gallery = storage
            .publish_root
            .as_ref()
            .map(|root| root.join(&config.publish.photos_dir));

        let mut catalog = MediaCatalog::new();
        let roles = [
            (Location::CaptureDevice, &storage.capture_source, true),
            (Location::Staging, &storage.staging, false),
            (Location::RawArchive, &storage.raw_archive, false),
            (Location::FinalArchive, &storage.final_archive, false),
            (Location::BulkStorage, &storage.bulk_storage, false),
            (Location::PublishTarget, &gallery, false),
        ];
        for (location, value, recursive) in roles {
            let Some(dir) = existing(value) else { continue };
            let files = if recursive {
                fs_ops::scan_tree(dir, media)?
            } else {
                fs_ops::scan_dir(dir, media)?
            };
            for file in files {
                catalog.discover(&file.path, file.kind, location);
            }
        }

        let mut report = StatusReport {
            camera_connected: existing(&storage.capture_source).is_some(),
            bulk_storage_connected: existing(&storage.bulk_storage).is_some(),
            ..StatusReport::default()
        };
        // Without the final archive nothing can be called orphaned.
        let final_known = existing(&storage.final_archive).is_some();
        for item in catalog.iter() {
            let finalized = item.is_present(MediaKind::StillImage, Location::FinalArchive);
            if item.is_present(MediaKind::MotionClip, Location::CaptureDevice) {
                report.pending_clips += 1;
            }
            if item.is_present(MediaKind::StillImage, Location::CaptureDevice) && !finalized {
                report.pending_stills += 1;
            }
            if item.is_present(MediaKind::RawSidecar, Location::CaptureDevice) {
                report.pending_raws += 1;
            }
            if item.is_present(MediaKind::StillImage, Location::Staging) {
                report.staging_files += 1;
            }
            if final_known && item.is_present(MediaKind::RawSidecar, Location::RawArchive) && !finalized {
                report.orphaned_raws += 1;
            }
            if item.is_present(MediaKind::MotionClip, Location::BulkStorage) {
                report.archived_clips += 1;
            }
            if item.is_present(MediaKind::StillImage, Location::PublishTarget) {
                report.published_photos += 1;
            }
        }
        debug!(items = catalog.len(), "status catalog built");
        Ok(report)
    }
}
