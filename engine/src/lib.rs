//! # photoflow engine - Photo Workflow Library
//!
//! A headless engine that moves camera media through a fixed lifecycle:
//! capture device → staging → compressed final archive → published gallery,
//! with raw sidecars and motion clips routed to their own archives.
//! Designed as the foundation for the CLI and for automation.
//!
//! ## Overview
//!
//! - Every copy is verified before the source is ever deleted
//! - Every in-place rewrite goes through a side file and an atomic rename
//! - Re-running any operation after a crash converges without duplicates
//! - Dry runs take the same decisions and write nothing
//! - Progress reporting via callbacks (decoupled from UI technology)
//!
//! ## Basic Usage
//!
//! ```no_run
//! use photoflow_engine::external::{AssumeYes, ExiftoolExtractor, ExiftoolMetadataCopier, RsyncSync};
//! use photoflow_engine::{Collaborators, Config, Workflow};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("photoflow.toml")?;
//! let copier = ExiftoolMetadataCopier::default();
//! let extractor = ExiftoolExtractor::default();
//! let sync = RsyncSync::new(config.remote.rsync_program());
//! let tools = Collaborators {
//!     metadata_copier: &copier,
//!     extractor: &extractor,
//!     sync: &sync,
//!     builder: None,
//!     confirmer: &AssumeYes,
//! };
//!
//! let mut workflow = Workflow::new(&config, tools, false);
//! let report = workflow.import()?;
//! println!("{} stills staged", report.stills.processed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **config**: TOML configuration and storage roles
//! - **model**: Media kinds, catalog, transfer outcomes and tallies
//! - **error**: Error types and the failure taxonomy
//! - **fs_ops**: Low-level filesystem operations and media scanning
//! - **checksums**, **verify**: Content fingerprints and comparison
//! - **transfer**: Verified copy, atomic replace and delete
//! - **transform**: Resize and re-encode in place
//! - **external**: exiftool, rsync and build command collaborators
//! - **reconcile**, **manifest**: Published collection planning and `photos.json`
//! - **workflow**: The lifecycle operations
//! - **progress**, **report**: Progress callbacks and per-operation results

pub mod checksums;
pub mod config;
pub mod error;
pub mod external;
pub mod fs_ops;
pub mod manifest;
pub mod model;
pub mod progress;
pub mod reconcile;
pub mod report;
pub mod transfer;
pub mod transform;
pub mod verify;
pub mod workflow;

// Re-export main types and functions
pub use checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
pub use config::Config;
pub use error::{EngineError, ErrorKind};
pub use model::{MediaKind, Tally, TransferOutcome};
pub use progress::{Operation, ProgressCallback};
pub use report::{
    BackupReport, CleanupReport, FinalizeReport, ImportReport, PublishReport, RecompressReport,
    StatusReport, StepStatus,
};
pub use transfer::TransferEngine;
pub use workflow::{Collaborators, Workflow};
