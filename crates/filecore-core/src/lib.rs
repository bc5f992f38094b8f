//! Core types for filecore.
//!
//! This crate provides the data model shared by every backend and engine:
//! URIs, file handles, the error taxonomy and engine configuration.

mod config;
mod error;
mod handle;
mod uri;

pub use config::{
    DEFAULT_CHANNEL_SIZE, DEFAULT_CHUNK_SIZE, DEFAULT_PROGRESS_EVERY, EngineConfig,
    EngineConfigBuilder, ProtectedPaths,
};
pub use error::{ErrorKind, FileError, FileResult};
pub use handle::{BackendKind, EntryKind, FileHandle};
pub use uri::FileUri;
