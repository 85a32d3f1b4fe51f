//! Structured results of the lifecycle operations.
//!
//! Every report carries the run id that appears in the operation's log span
//! and whether it was a dry run. Counts are never collapsed into a single
//! success flag; callers decide what partial success means.

use std::path::PathBuf;

use uuid::Uuid;

use crate::external::SyncRoute;
use crate::model::{ItemFailure, Tally};
use crate::reconcile::ReconciliationPlan;

/// Outcome of a single external step (build, sync).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StepStatus {
    /// Nothing configured for this step
    #[default]
    NotConfigured,
    /// Would have run
    DryRun,
    /// Not attempted because an earlier step failed
    Skipped,
    Done,
    /// Sync completed over the given route
    Synced(SyncRoute),
    Failed(ItemFailure),
}

impl StepStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepStatus::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub clips: Tally,
    pub stills: Tally,
    pub raws: Tally,
    /// Stills left on the device because they are already finalized
    pub skipped_finalized: usize,
}

impl ImportReport {
    pub fn total(&self) -> Tally {
        let mut total = Tally::default();
        total.merge(&self.clips);
        total.merge(&self.stills);
        total.merge(&self.raws);
        total
    }

    pub fn has_failures(&self) -> bool {
        self.total().has_failures()
    }
}

#[derive(Debug, Clone)]
pub struct FinalizeReport {
    pub run_id: Uuid,
    pub dry_run: bool,
    /// Staging → final archive
    pub finalized: Tally,
    /// Final archive → capture device
    pub copied_to_device: Tally,
    /// Raw sidecars removed from the capture device
    pub device_raws_removed: Tally,
    /// Raw archive entries with no finalized image
    pub orphaned_raws: Vec<PathBuf>,
}

impl FinalizeReport {
    pub fn has_failures(&self) -> bool {
        self.finalized.has_failures()
            || self.copied_to_device.has_failures()
            || self.device_raws_removed.has_failures()
    }
}

#[derive(Debug, Clone)]
pub struct CleanupReport {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub orphans: Vec<PathBuf>,
    pub removed: Tally,
}

impl CleanupReport {
    pub fn has_failures(&self) -> bool {
        self.removed.has_failures()
    }
}

#[derive(Debug, Clone)]
pub struct PublishReport {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub plan: ReconciliationPlan,
    pub added: Tally,
    pub removed: Tally,
    /// Final-archive images whose metadata or fingerprint could not be read
    pub unreadable: Tally,
    pub manifest: Tally,
    pub build: StepStatus,
    pub sync: StepStatus,
}

impl PublishReport {
    pub fn has_failures(&self) -> bool {
        self.added.has_failures()
            || self.removed.has_failures()
            || self.unreadable.has_failures()
            || self.manifest.has_failures()
            || self.build.is_failure()
            || self.sync.is_failure()
    }
}

#[derive(Debug, Clone)]
pub struct RecompressReport {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub compressed: Tally,
}

impl RecompressReport {
    pub fn has_failures(&self) -> bool {
        self.compressed.has_failures()
    }
}

#[derive(Debug, Clone)]
pub struct BackupReport {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub final_archive: StepStatus,
    pub raw_archive: StepStatus,
}

impl BackupReport {
    pub fn has_failures(&self) -> bool {
        self.final_archive.is_failure() || self.raw_archive.is_failure()
    }
}

/// Read-only snapshot of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub camera_connected: bool,
    pub bulk_storage_connected: bool,
    pub pending_clips: usize,
    /// Device stills not yet finalized
    pub pending_stills: usize,
    pub pending_raws: usize,
    pub staging_files: usize,
    pub orphaned_raws: usize,
    /// Clips already moved to bulk storage
    pub archived_clips: usize,
    pub published_photos: usize,
}
