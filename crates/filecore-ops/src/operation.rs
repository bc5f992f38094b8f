//! Operation requests and per-item errors.

use filecore_core::{ErrorKind, FileError, FileHandle, FileUri};
use serde::{Deserialize, Serialize};

/// Whether a transfer keeps or removes its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransferMode {
    #[default]
    Copy,
    Cut,
}

/// The root items of an operation.
#[derive(Debug, Clone)]
pub enum Sources {
    /// Already-resolved handles.
    Handles(Vec<FileHandle>),
    /// URIs that still have to be resolved through the registry.
    Uris(Vec<FileUri>),
}

impl Sources {
    pub fn len(&self) -> usize {
        match self {
            Self::Handles(handles) => handles.len(),
            Self::Uris(uris) => uris.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<FileHandle>> for Sources {
    fn from(handles: Vec<FileHandle>) -> Self {
        Self::Handles(handles)
    }
}

impl From<FileUri> for Sources {
    fn from(uri: FileUri) -> Self {
        Self::Uris(vec![uri])
    }
}

impl From<Vec<FileUri>> for Sources {
    fn from(uris: Vec<FileUri>) -> Self {
        Self::Uris(uris)
    }
}

/// Where transferred roots land.
#[derive(Debug, Clone)]
pub enum Destination {
    /// Into this directory, with collision-safe naming.
    Directory(FileUri),
    /// One explicit target per root, used literally.
    Targets(Vec<FileUri>),
}

/// A copy or cut of several roots.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub sources: Sources,
    pub destination: Destination,
    pub mode: TransferMode,
    /// Replace existing targets instead of picking a "(copy)" name.
    pub overwrite: bool,
}

impl TransferRequest {
    /// Copy `sources` into the directory `destination`.
    pub fn copy(sources: impl Into<Sources>, destination: FileUri) -> Self {
        Self {
            sources: sources.into(),
            destination: Destination::Directory(destination),
            mode: TransferMode::Copy,
            overwrite: false,
        }
    }

    /// Move `sources` into the directory `destination`.
    pub fn cut(sources: impl Into<Sources>, destination: FileUri) -> Self {
        Self {
            mode: TransferMode::Cut,
            ..Self::copy(sources, destination)
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Use `targets` literally, one per root.
    pub fn with_targets(mut self, targets: Vec<FileUri>) -> Self {
        self.destination = Destination::Targets(targets);
        self
    }
}

/// An error that occurred during a file operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationError {
    /// The credential-free URI that caused the error.
    pub uri: String,
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
}

impl OperationError {
    /// Summarize `error` against `uri`.
    pub fn from_error(uri: &FileUri, error: &FileError) -> Self {
        Self {
            uri: uri.access_path(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.uri, self.message)
    }
}
