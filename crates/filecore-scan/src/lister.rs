//! Timeout-bounded directory listing delivered as events.

use std::sync::Arc;
use std::time::Duration;

use filecore_backend::BackendRegistry;
use filecore_core::{DEFAULT_CHANNEL_SIZE, ErrorKind, FileError, FileHandle, FileResult, FileUri};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::options::ListingOptions;

/// Events emitted for one listing, in order: `Started`, then at most one
/// `Update`, then exactly one terminal event.
#[derive(Debug)]
pub enum ListingEvent {
    Started,
    /// Filtered and sorted entries of the directory.
    Update(Vec<FileHandle>),
    /// The listing finished (or was aborted).
    End,
    /// No answer within the configured timeout.
    TimedOut,
    /// The backend needs credentials before it can list.
    CredentialRequired(FileError),
    FatalError { error: FileError, kind: ErrorKind },
}

impl ListingEvent {
    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started | Self::Update(_))
    }
}

/// Lists directories through the backend registry, one listing at a time.
#[derive(Debug)]
pub struct ListingEngine {
    registry: Arc<BackendRegistry>,
    channel_size: usize,
    token: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl ListingEngine {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            channel_size: DEFAULT_CHANNEL_SIZE,
            token: CancellationToken::new(),
            worker: None,
        }
    }

    pub fn with_channel_size(mut self, channel_size: usize) -> Self {
        self.channel_size = channel_size.max(1);
        self
    }

    /// Whether a listing is still in flight.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Start listing `uri`. Returns `None` while another listing is running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &mut self,
        uri: FileUri,
        options: ListingOptions,
    ) -> Option<mpsc::Receiver<ListingEvent>> {
        if self.is_running() {
            tracing::debug!(%uri, "listing already running, ignoring start");
            return None;
        }

        let (tx, rx) = mpsc::channel(self.channel_size);
        self.token = CancellationToken::new();
        let token = self.token.clone();
        let registry = Arc::clone(&self.registry);

        self.worker = Some(tokio::spawn(async move {
            list_impl(registry, uri, options, token, tx).await;
        }));
        Some(rx)
    }

    /// Stop the running listing. It ends with `End` and reports no error.
    pub fn abort(&self) {
        self.token.cancel();
    }
}

/// Internal implementation of a listing.
async fn list_impl(
    registry: Arc<BackendRegistry>,
    uri: FileUri,
    options: ListingOptions,
    token: CancellationToken,
    tx: mpsc::Sender<ListingEvent>,
) {
    let _ = tx.send(ListingEvent::Started).await;

    let timeout = options.timeout;
    let blocking_uri = uri.clone();
    let listing = tokio::task::spawn_blocking(move || {
        list_blocking(&registry, &blocking_uri, &options)
    });

    let joined = tokio::select! {
        biased;
        _ = token.cancelled() => {
            tracing::debug!(%uri, "listing aborted");
            let _ = tx.send(ListingEvent::End).await;
            return;
        }
        _ = expire(timeout) => {
            tracing::warn!(%uri, "listing timed out");
            let _ = tx.send(ListingEvent::TimedOut).await;
            return;
        }
        joined = listing => joined,
    };

    // An abort that lands after the backend answered still wins.
    if token.is_cancelled() {
        let _ = tx.send(ListingEvent::End).await;
        return;
    }

    let event = match joined {
        Ok(Ok(entries)) => {
            tracing::debug!(%uri, count = entries.len(), "listing complete");
            let _ = tx.send(ListingEvent::Update(entries)).await;
            ListingEvent::End
        }
        Ok(Err(error)) if error.needs_credentials() => ListingEvent::CredentialRequired(error),
        Ok(Err(error)) => {
            tracing::warn!(%uri, %error, "listing failed");
            ListingEvent::FatalError {
                kind: error.kind(),
                error,
            }
        }
        Err(join_error) => ListingEvent::FatalError {
            error: FileError::other(format!("listing task failed: {join_error}")),
            kind: ErrorKind::Unknown,
        },
    };
    let _ = tx.send(event).await;
}

fn list_blocking(
    registry: &BackendRegistry,
    uri: &FileUri,
    options: &ListingOptions,
) -> FileResult<Vec<FileHandle>> {
    let backend = registry.backend_for(uri)?;
    let entries = backend.list(uri)?;
    Ok(options.apply(entries))
}

async fn expire(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
