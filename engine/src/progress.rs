//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which keeps the workflows
//! independent of how (or whether) progress is shown.

use std::fmt;
use std::path::Path;

use crate::model::{Tally, TransferOutcome};

/// The lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Status,
    Import,
    Finalize,
    Cleanup,
    Publish,
    Backup,
    Recompress,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Status => "status",
            Operation::Import => "import",
            Operation::Finalize => "finalize",
            Operation::Cleanup => "cleanup",
            Operation::Publish => "publish",
            Operation::Backup => "backup",
            Operation::Recompress => "recompress",
        };
        f.write_str(name)
    }
}

/// Trait for receiving progress updates from an operation.
///
/// All methods are called synchronously, in order, from the thread running
/// the operation.
pub trait ProgressCallback: Send {
    /// Called once discovery is done and `total` items are about to be processed.
    fn on_operation_started(&self, operation: Operation, total: usize);

    /// Called when an item is about to be processed.
    fn on_item_started(&self, index: usize, path: &Path);

    /// Called when an item is done (copied, skipped, or failed).
    fn on_item_completed(&self, index: usize, path: &Path, outcome: &TransferOutcome);

    /// Free-form notice: previews, phase changes, warnings.
    fn on_message(&self, message: &str);

    /// Called when the operation has finished all items.
    fn on_operation_completed(&self, operation: Operation, tally: &Tally);
}
