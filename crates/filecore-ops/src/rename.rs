//! Rename operation.

use std::sync::Arc;

use filecore_backend::BackendRegistry;
use filecore_core::{FileError, FileResult, FileUri, ProtectedPaths};
use tokio::sync::mpsc;

use crate::progress::{OperationComplete, OperationEvent, OperationType};
use crate::{OperationError, OPERATION_CHANNEL_SIZE};

/// Rename `uri` in place to `new_name`, returning the new URI.
///
/// The name must pass [`validate_filename`]. Protected paths are refused, and
/// so is a rename onto an existing sibling.
pub async fn rename(
    registry: Arc<BackendRegistry>,
    protected: ProtectedPaths,
    uri: FileUri,
    new_name: String,
) -> FileResult<FileUri> {
    validate_filename(&new_name).map_err(|reason| FileError::InvalidName {
        name: new_name.clone(),
        reason,
    })?;
    protected.check(&uri)?;

    tokio::task::spawn_blocking(move || {
        let backend = registry.backend_for(&uri)?;
        let handle = backend.stat(&uri)?;
        let parent = uri
            .parent()
            .ok_or_else(|| FileError::unsupported("rename of a root", &uri))?;
        let target = if handle.is_dir() {
            parent.child_dir(&new_name)?
        } else {
            parent.child(&new_name)?
        };
        protected.check(&target)?;

        if target != uri && backend.exists(&target)? {
            return Err(FileError::AlreadyExists {
                uri: target.access_path(),
            });
        }
        let renamed = backend.rename(&uri, &new_name)?;
        tracing::debug!(from = %uri, to = %renamed, "renamed");
        Ok(renamed)
    })
    .await
    .map_err(|e| FileError::other(format!("Task failed: {e}")))?
}

/// Start an async rename, reporting through the operation event channel.
pub fn start_rename(
    registry: Arc<BackendRegistry>,
    protected: ProtectedPaths,
    uri: FileUri,
    new_name: String,
) -> mpsc::Receiver<OperationEvent> {
    let (tx, rx) = mpsc::channel(OPERATION_CHANNEL_SIZE);

    tokio::spawn(async move {
        let _ = tx
            .send(OperationEvent::Started {
                operation: OperationType::Rename,
            })
            .await;
        let result = rename(registry, protected, uri.clone(), new_name).await;
        let complete = single_item_outcome(OperationType::Rename, &uri, result, &tx).await;
        let _ = tx.send(OperationEvent::Finished(complete)).await;
    });

    rx
}

/// Send `Success` for a finished single-item operation and build its summary.
pub(crate) async fn single_item_outcome(
    operation: OperationType,
    uri: &FileUri,
    result: FileResult<FileUri>,
    tx: &mpsc::Sender<OperationEvent>,
) -> OperationComplete {
    let mut complete = OperationComplete::new(operation);
    match result {
        Ok(done) => {
            complete.succeeded = 1;
            let _ = tx.send(OperationEvent::Success { uri: done }).await;
        }
        Err(error) => {
            tracing::warn!(%uri, %error, %operation, "operation failed");
            complete.record_failure(OperationError::from_error(uri, &error));
        }
    }
    complete
}

/// Validate a filename for cross-platform compatibility.
pub fn validate_filename(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Name cannot be empty".into());
    }

    if name.len() > 255 {
        return Err("Name is too long (max 255 characters)".into());
    }

    let invalid_chars = ['/', '\0'];
    for c in invalid_chars {
        if name.contains(c) {
            return Err(format!("Name cannot contain '{}'", c));
        }
    }

    // Network shares reject these whatever the host OS.
    let share_invalid = ['\\', ':', '*', '?', '"', '<', '>', '|'];
    for c in share_invalid {
        if name.contains(c) {
            return Err(format!("Name cannot contain '{}'", c));
        }
    }

    let reserved = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let upper_name = name.to_uppercase();
    let base_name = upper_name.split('.').next().unwrap_or("");
    if reserved.contains(&base_name) {
        return Err("Reserved filename".into());
    }

    if name.starts_with(' ') || name.ends_with(' ') {
        return Err("Name cannot start or end with spaces".into());
    }

    if name.ends_with('.') {
        return Err("Name cannot end with a dot".into());
    }

    if name == "." || name == ".." {
        return Err("'.' and '..' are reserved names".into());
    }

    Ok(())
}
