//! Zip extraction into any writable backend.

use std::sync::Arc;

use filecore_backend::BackendRegistry;
use filecore_core::{EngineConfig, FileUri};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::operation::{Sources, TransferRequest};
use crate::progress::OperationEvent;
use crate::transfer::TransferTask;

/// Unpacks zip archives, one batch at a time.
///
/// Members are copied like any other transfer: collisions in the destination
/// get "(copy)" names, a failed member does not stop the others, and `stop()`
/// removes the member being written.
#[derive(Debug)]
pub struct ExtractEngine {
    registry: Arc<BackendRegistry>,
    config: EngineConfig,
    token: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl ExtractEngine {
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

    /// Extract every archive in `archives` into the directory `destination`.
    /// Returns `None` while another extraction is running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &mut self,
        archives: impl Into<Sources>,
        destination: FileUri,
    ) -> Option<mpsc::Receiver<OperationEvent>> {
        if self.is_running() {
            tracing::debug!("extraction already running, ignoring start");
            return None;
        }

        let roots: Vec<FileUri> = match archives.into() {
            Sources::Handles(handles) => handles.iter().map(|h| archive_root(&h.uri)).collect(),
            Sources::Uris(uris) => uris.iter().map(archive_root).collect(),
        };

        let (tx, rx) = mpsc::channel(self.config.channel_size.max(1));
        self.token = CancellationToken::new();
        let task = TransferTask::new(
            Arc::clone(&self.registry),
            self.config.clone(),
            self.token.clone(),
            tx,
            TransferRequest::copy(roots, destination),
        )
        .extracting();
        self.worker = Some(tokio::task::spawn_blocking(move || task.run()));
        Some(rx)
    }

    pub fn stop(&self) {
        self.token.cancel();
    }
}

/// The `zip://` root of a local archive. Anything else is returned as-is and
/// fails later as "not an archive".
pub fn archive_root(uri: &FileUri) -> FileUri {
    if uri.is_local() {
        if let Ok(root) = FileUri::parse(&format!("zip://{}", uri.path())) {
            return root;
        }
    }
    uri.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_root() {
        let local = FileUri::parse("/music/my album.zip").unwrap();
        assert_eq!(
            archive_root(&local).to_string(),
            "zip:///music/my%20album.zip"
        );

        let inner = FileUri::parse("zip:///music/a.zip/disc1").unwrap();
        assert_eq!(archive_root(&inner), inner);

        let remote = FileUri::parse("smb://nas/share/a.zip").unwrap();
        assert_eq!(archive_root(&remote), remote);
    }
}
