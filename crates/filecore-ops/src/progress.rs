//! Progress reporting types for file operations.

use filecore_core::{FileError, FileHandle, FileUri};
use serde::{Deserialize, Serialize};

use crate::OperationError;

/// The type of operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Copy,
    Move,
    Delete,
    Rename,
    CreateFile,
    CreateDirectory,
    Compress,
    Extract,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Copy => write!(f, "Copy"),
            Self::Move => write!(f, "Move"),
            Self::Delete => write!(f, "Delete"),
            Self::Rename => write!(f, "Rename"),
            Self::CreateFile => write!(f, "Create file"),
            Self::CreateDirectory => write!(f, "Create directory"),
            Self::Compress => write!(f, "Compress"),
            Self::Extract => write!(f, "Extract"),
        }
    }
}

/// Byte-level progress of a transfer or delete.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TransferProgress {
    /// Index of the current entry in the flat plan.
    pub file_index: usize,
    /// Bytes of the current entry done so far.
    pub file_bytes: u64,
    /// Index of the root the current entry belongs to.
    pub root_index: usize,
    /// Bytes done within the current root.
    pub root_bytes: u64,
    /// Bytes done across the whole operation.
    pub total_bytes: u64,
    /// Bytes per second, only reported when a remote backend is involved.
    pub speed: Option<f64>,
    /// The current entry is finished.
    pub file_done: bool,
}

/// Events emitted by the operation engines, in order: `Started`, any number
/// of updates, then exactly one terminal event.
#[derive(Debug)]
pub enum OperationEvent {
    Started {
        operation: OperationType,
    },
    /// The flat plan, announced once sizing is done.
    FilesListUpdate {
        files: Vec<FileHandle>,
        roots: Vec<FileHandle>,
        total_bytes: u64,
        total_files: usize,
    },
    Progress(TransferProgress),
    /// One entry landed at `uri` (the target for transfers, the victim for
    /// deletes).
    Success {
        uri: FileUri,
    },
    Finished(OperationComplete),
    Cancelled,
    FatalError {
        error: FileError,
    },
}

impl OperationEvent {
    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished(_) | Self::Cancelled | Self::FatalError { .. }
        )
    }
}

/// Result of a completed operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationComplete {
    /// The type of operation.
    pub operation_type: OperationType,
    /// Number of items successfully processed.
    pub succeeded: usize,
    /// Number of items that failed.
    pub failed: usize,
    /// Total bytes processed.
    pub bytes_processed: u64,
    /// Errors that occurred.
    pub errors: Vec<OperationError>,
}

impl OperationComplete {
    /// An empty result for `operation_type`.
    pub fn new(operation_type: OperationType) -> Self {
        Self {
            operation_type,
            succeeded: 0,
            failed: 0,
            bytes_processed: 0,
            errors: Vec::new(),
        }
    }

    /// Record one failed item.
    pub fn record_failure(&mut self, error: OperationError) {
        self.failed += 1;
        self.errors.push(error);
    }

    /// Check if the operation was fully successful.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Get a human-readable summary of the operation.
    pub fn summary(&self) -> String {
        let action = match self.operation_type {
            OperationType::Copy => "Copied",
            OperationType::Move => "Moved",
            OperationType::Delete => "Deleted",
            OperationType::Rename => "Renamed",
            OperationType::CreateFile => "Created",
            OperationType::CreateDirectory => "Created",
            OperationType::Compress => "Compressed",
            OperationType::Extract => "Extracted",
        };

        if self.failed == 0 {
            format!("{} {} items", action, self.succeeded)
        } else {
            format!(
                "{} {} items, {} failed",
                action, self.succeeded, self.failed
            )
        }
    }
}
