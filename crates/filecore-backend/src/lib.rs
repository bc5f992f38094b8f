//! Storage backends for filecore.
//!
//! Every storage family implements the [`Backend`] capability trait and is
//! registered under its URI scheme in a [`BackendRegistry`]. Engines only ever
//! talk to backends through the registry.

mod archive;
mod backend;
mod local;
mod media;
mod memory;
mod registry;

pub use archive::ZipBackend;
pub use backend::{Backend, InputStream, OutputStream};
pub use local::LocalBackend;
pub use media::{LoggingMediaIndex, MediaIndex, NoopMediaIndex};
pub use memory::MemoryBackend;
pub use registry::BackendRegistry;
