//! Media index notifications.

use std::fmt;

use filecore_core::FileUri;

/// Receives notice of files that appeared or disappeared on local storage.
pub trait MediaIndex: Send + Sync + fmt::Debug {
    /// A file was created, written or moved into place.
    fn scan(&self, uri: &FileUri);

    /// A file was deleted or moved away.
    fn remove(&self, uri: &FileUri);
}

/// Ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMediaIndex;

impl MediaIndex for NoopMediaIndex {
    fn scan(&self, _uri: &FileUri) {}

    fn remove(&self, _uri: &FileUri) {}
}

/// Logs notifications at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMediaIndex;

impl MediaIndex for LoggingMediaIndex {
    fn scan(&self, uri: &FileUri) {
        tracing::debug!(%uri, "media index scan");
    }

    fn remove(&self, uri: &FileUri) {
        tracing::debug!(%uri, "media index remove");
    }
}
