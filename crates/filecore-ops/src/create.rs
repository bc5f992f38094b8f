//! File and directory creation operations.

use std::sync::Arc;

use filecore_backend::BackendRegistry;
use filecore_core::{FileError, FileResult, FileUri};
use tokio::sync::mpsc;

use crate::progress::{OperationEvent, OperationType};
use crate::rename::{single_item_outcome, validate_filename};
use crate::OPERATION_CHANNEL_SIZE;

/// Create an empty file at `uri`. Fails if anything already exists there.
pub async fn create_file(registry: Arc<BackendRegistry>, uri: FileUri) -> FileResult<FileUri> {
    check_name(&uri)?;
    tokio::task::spawn_blocking(move || {
        let backend = registry.backend_for(&uri)?;
        if backend.exists(&uri)? {
            return Err(FileError::AlreadyExists {
                uri: uri.access_path(),
            });
        }
        backend.create_file(&uri)?;
        tracing::debug!(%uri, "file created");
        Ok(uri)
    })
    .await
    .map_err(|e| FileError::other(format!("Task failed: {e}")))?
}

/// Create one directory at `uri`. The parent must exist.
pub async fn create_directory(
    registry: Arc<BackendRegistry>,
    uri: FileUri,
) -> FileResult<FileUri> {
    check_name(&uri)?;
    tokio::task::spawn_blocking(move || {
        let backend = registry.backend_for(&uri)?;
        if backend.exists(&uri)? {
            return Err(FileError::AlreadyExists {
                uri: uri.access_path(),
            });
        }
        backend.mkdir(&uri)?;
        tracing::debug!(%uri, "directory created");
        Ok(uri.as_directory())
    })
    .await
    .map_err(|e| FileError::other(format!("Task failed: {e}")))?
}

fn check_name(uri: &FileUri) -> FileResult<()> {
    let name = uri.name();
    validate_filename(&name).map_err(|reason| FileError::InvalidName { name, reason })
}

/// Start an async file creation, reporting through the operation event channel.
pub fn start_create_file(
    registry: Arc<BackendRegistry>,
    uri: FileUri,
) -> mpsc::Receiver<OperationEvent> {
    let (tx, rx) = mpsc::channel(OPERATION_CHANNEL_SIZE);

    tokio::spawn(async move {
        let _ = tx
            .send(OperationEvent::Started {
                operation: OperationType::CreateFile,
            })
            .await;
        let result = create_file(registry, uri.clone()).await;
        let complete = single_item_outcome(OperationType::CreateFile, &uri, result, &tx).await;
        let _ = tx.send(OperationEvent::Finished(complete)).await;
    });

    rx
}

/// Start an async directory creation, reporting through the operation event channel.
pub fn start_create_directory(
    registry: Arc<BackendRegistry>,
    uri: FileUri,
) -> mpsc::Receiver<OperationEvent> {
    let (tx, rx) = mpsc::channel(OPERATION_CHANNEL_SIZE);

    tokio::spawn(async move {
        let _ = tx
            .send(OperationEvent::Started {
                operation: OperationType::CreateDirectory,
            })
            .await;
        let result = create_directory(registry, uri.clone()).await;
        let complete =
            single_item_outcome(OperationType::CreateDirectory, &uri, result, &tx).await;
        let _ = tx.send(OperationEvent::Finished(complete)).await;
    });

    rx
}
