//! Sequential delete with progress reporting.

use std::sync::Arc;

use filecore_backend::BackendRegistry;
use filecore_core::{EngineConfig, FileHandle, FileResult, FileUri};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::operation::{OperationError, Sources};
use crate::progress::{OperationComplete, OperationEvent, OperationType, TransferProgress};

/// Deletes files and directory trees, one batch at a time.
#[derive(Debug)]
pub struct DeleteEngine {
    registry: Arc<BackendRegistry>,
    config: EngineConfig,
    token: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl DeleteEngine {
    pub fn new(registry: Arc<BackendRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            token: CancellationToken::new(),
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Start deleting `targets`. Returns `None` while another delete is running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self, targets: impl Into<Sources>) -> Option<mpsc::Receiver<OperationEvent>> {
        if self.is_running() {
            tracing::debug!("delete already running, ignoring start");
            return None;
        }

        let (tx, rx) = mpsc::channel(self.config.channel_size.max(1));
        self.token = CancellationToken::new();
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();
        let token = self.token.clone();
        let targets = targets.into();

        self.worker = Some(tokio::task::spawn_blocking(move || {
            delete_impl(&registry, &config, &token, targets, &tx);
        }));
        Some(rx)
    }

    /// Stop before the next item. Items already deleted stay deleted.
    pub fn stop(&self) {
        self.token.cancel();
    }
}

/// Internal implementation of a delete batch.
fn delete_impl(
    registry: &BackendRegistry,
    config: &EngineConfig,
    token: &CancellationToken,
    targets: Sources,
    tx: &mpsc::Sender<OperationEvent>,
) {
    let _ = tx.blocking_send(OperationEvent::Started {
        operation: OperationType::Delete,
    });

    let mut complete = OperationComplete::new(OperationType::Delete);
    let mut progress = TransferProgress::default();

    let items: Vec<(FileUri, Option<FileHandle>)> = match targets {
        Sources::Handles(handles) => handles
            .into_iter()
            .map(|h| (h.uri.clone(), Some(h)))
            .collect(),
        Sources::Uris(uris) => uris.into_iter().map(|uri| (uri, None)).collect(),
    };

    for (index, (uri, handle)) in items.into_iter().enumerate() {
        if token.is_cancelled() {
            tracing::debug!(deleted = complete.succeeded, "delete cancelled");
            let _ = tx.blocking_send(OperationEvent::Cancelled);
            return;
        }

        match delete_one(registry, config, &uri, handle) {
            Ok(length) => {
                tracing::debug!(%uri, "deleted");
                complete.succeeded += 1;
                complete.bytes_processed += length;
                let _ = tx.blocking_send(OperationEvent::Success { uri: uri.clone() });
                progress.total_bytes += length;
            }
            Err(error) if error.needs_credentials() || config.stop_on_error => {
                tracing::warn!(%uri, %error, "delete aborted");
                let _ = tx.blocking_send(OperationEvent::FatalError { error });
                return;
            }
            Err(error) => {
                tracing::warn!(%uri, %error, "delete failed");
                complete.record_failure(OperationError::from_error(&uri, &error));
            }
        }

        progress.file_index = index;
        progress.root_index = index;
        progress.file_done = true;
        let _ = tx.blocking_send(OperationEvent::Progress(progress));
    }

    let _ = tx.blocking_send(OperationEvent::Finished(complete));
}

/// Delete one item; returns the file bytes it held (zero for directories).
fn delete_one(
    registry: &BackendRegistry,
    config: &EngineConfig,
    uri: &FileUri,
    handle: Option<FileHandle>,
) -> FileResult<u64> {
    config.protected.check(uri)?;
    let backend = registry.backend_for(uri)?;
    let handle = match handle {
        Some(handle) => handle,
        None => backend.stat(uri)?,
    };

    if handle.is_dir() {
        backend.delete_tree(uri)?;
        Ok(0)
    } else {
        backend.delete(uri)?;
        Ok(handle.length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filecore_core::{FileError, ProtectedPaths};

    #[test]
    fn test_protected_item_is_refused_before_lookup() {
        let registry = BackendRegistry::new();
        let config = EngineConfig {
            protected: ProtectedPaths::new(["/media/DCIM"]),
            ..Default::default()
        };
        let uri = FileUri::parse("/media/DCIM").unwrap();
        let err = delete_one(&registry, &config, &uri, None).unwrap_err();
        assert!(matches!(err, FileError::ProtectedPath { .. }));
    }
}
