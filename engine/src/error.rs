//! Error types for the photoflow engine.
//!
//! `EngineError` is returned by every fallible engine function. Batch
//! operations do not propagate per-item errors; they record them in the
//! operation's [`Tally`](crate::model::Tally) and keep going. Only precondition
//! failures abort an operation, and they do so before the first mutation.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// The five user-visible failure classes.
///
/// Every `EngineError` maps onto exactly one of these through
/// [`EngineError::kind`], so reports can group failures without matching
/// on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Permission or disk problem while reading, writing or renaming.
    IoFailure,
    /// Post-copy or post-transform content check disagreed.
    VerificationMismatch,
    /// Missing storage role, missing tool, insufficient space, bad config.
    PreconditionFailure,
    /// A subprocess collaborator exited unsuccessfully.
    ExternalToolFailure,
    /// The caller declined a destructive step.
    ConfirmationDeclined,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::IoFailure => write!(f, "io-failure"),
            ErrorKind::VerificationMismatch => write!(f, "verification-mismatch"),
            ErrorKind::PreconditionFailure => write!(f, "precondition-failure"),
            ErrorKind::ExternalToolFailure => write!(f, "external-tool-failure"),
            ErrorKind::ConfirmationDeclined => write!(f, "confirmation-declined"),
        }
    }
}

/// Errors raised by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Failed to read from a file or directory
    #[error("Failed to read {}: {source}", path.display())]
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write, rename or delete
    #[error("Failed to write {}: {source}", path.display())]
    WriteError { path: PathBuf, source: io::Error },

    /// Failed to enumerate a directory
    #[error("Failed to enumerate directory {}: {source}", path.display())]
    EnumerationFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory
    #[error("Failed to create directory {}: {source}", path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// Content check after a copy or transform disagreed
    #[error("Verification failed: {} does not match {}", destination.display(), source_path.display())]
    VerificationMismatch {
        source_path: PathBuf,
        destination: PathBuf,
    },

    /// Produced content could not be decoded as its declared kind
    #[error("Malformed {kind} content in {}: {reason}", path.display())]
    MalformedContent {
        path: PathBuf,
        kind: &'static str,
        reason: String,
    },

    /// Source image could not be decoded or encoded
    #[error("Image processing failed for {}: {reason}", path.display())]
    ImageProcessing { path: PathBuf, reason: String },

    /// A configured storage role is missing or not mounted
    #[error("{role} not available at {}", path.display())]
    StorageUnavailable { role: &'static str, path: PathBuf },

    /// A storage role is required but not configured
    #[error("{role} is not configured")]
    StorageNotConfigured { role: &'static str },

    /// Free-space probe says the destination cannot hold the data
    #[error(
        "Insufficient space at {}: {required} bytes required, {available} available",
        path.display()
    )]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    /// A required external tool is not installed or not runnable
    #[error("Required tool '{tool}' is not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    /// An external tool ran and failed
    #[error("'{tool}' failed ({status}) for {}: {stderr}", path.display())]
    ExternalTool {
        tool: String,
        path: PathBuf,
        status: String,
        stderr: String,
    },

    /// Configuration file unreadable or invalid
    #[error("Invalid configuration {}: {reason}", path.display())]
    InvalidConfig { path: PathBuf, reason: String },

    /// Caller declined a destructive step
    #[error("Confirmation declined; {pending} item(s) left untouched")]
    ConfirmationDeclined { pending: usize },
}

impl EngineError {
    /// Map this error onto the user-visible taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ReadError { .. }
            | Self::WriteError { .. }
            | Self::EnumerationFailed { .. }
            | Self::DirectoryCreationFailed { .. }
            | Self::ImageProcessing { .. } => ErrorKind::IoFailure,
            Self::VerificationMismatch { .. } | Self::MalformedContent { .. } => {
                ErrorKind::VerificationMismatch
            }
            Self::StorageUnavailable { .. }
            | Self::StorageNotConfigured { .. }
            | Self::InsufficientSpace { .. }
            | Self::ToolUnavailable { .. }
            | Self::InvalidConfig { .. } => ErrorKind::PreconditionFailure,
            Self::ExternalTool { .. } => ErrorKind::ExternalToolFailure,
            Self::ConfirmationDeclined { .. } => ErrorKind::ConfirmationDeclined,
        }
    }

    /// The path this error is about, when there is one.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::ReadError { path, .. }
            | Self::WriteError { path, .. }
            | Self::EnumerationFailed { path, .. }
            | Self::DirectoryCreationFailed { path, .. }
            | Self::MalformedContent { path, .. }
            | Self::ImageProcessing { path, .. }
            | Self::StorageUnavailable { path, .. }
            | Self::InsufficientSpace { path, .. }
            | Self::ExternalTool { path, .. }
            | Self::InvalidConfig { path, .. } => Some(path),
            Self::VerificationMismatch { destination, .. } => Some(destination),
            Self::StorageNotConfigured { .. }
            | Self::ToolUnavailable { .. }
            | Self::ConfirmationDeclined { .. } => None,
        }
    }

    /// True for failures that must abort an operation before it mutates anything.
    pub fn is_precondition(&self) -> bool {
        self.kind() == ErrorKind::PreconditionFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let io_err = EngineError::WriteError {
            path: PathBuf::from("/tmp/x"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(io_err.kind(), ErrorKind::IoFailure);

        let mismatch = EngineError::VerificationMismatch {
            source_path: PathBuf::from("a"),
            destination: PathBuf::from("b"),
        };
        assert_eq!(mismatch.kind(), ErrorKind::VerificationMismatch);
        assert_eq!(mismatch.path(), Some(std::path::Path::new("b")));

        let space = EngineError::InsufficientSpace {
            path: PathBuf::from("/mnt"),
            required: 10,
            available: 1,
        };
        assert!(space.is_precondition());

        let declined = EngineError::ConfirmationDeclined { pending: 3 };
        assert_eq!(declined.kind(), ErrorKind::ConfirmationDeclined);
        assert!(declined.path().is_none());
    }

    #[test]
    fn test_display_includes_path() {
        let err = EngineError::StorageUnavailable {
            role: "capture source",
            path: PathBuf::from("/Volumes/CARD"),
        };
        let text = err.to_string();
        assert!(text.contains("/Volumes/CARD"));
        assert!(text.contains("capture source"));
    }
}
