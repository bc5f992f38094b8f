//! Copy, cut, delete, rename, create, compress and extract across filecore
//! backends.
//!
//! Long-running operations run on the blocking pool and report through a
//! bounded channel of [`OperationEvent`]s: `Started`, then updates, then
//! exactly one of `Finished`, `Cancelled` or `FatalError`.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use filecore_backend::{BackendRegistry, NoopMediaIndex};
//! use filecore_core::{EngineConfig, FileUri, ProtectedPaths};
//! use filecore_ops::{OperationEvent, TransferEngine};
//!
//! # async fn run() -> filecore_core::FileResult<()> {
//! let registry = Arc::new(BackendRegistry::with_defaults(
//!     Arc::new(NoopMediaIndex),
//!     ProtectedPaths::standard(),
//! ));
//! let mut engine = TransferEngine::new(registry, EngineConfig::default());
//! let sources = vec![FileUri::parse("/tmp/movie.mkv")?];
//! if let Some(mut events) = engine.copy(sources, FileUri::parse("/tmp/backup")?) {
//!     while let Some(event) = events.recv().await {
//!         if let OperationEvent::Finished(complete) = &event {
//!             println!("{}", complete.summary());
//!         }
//!         if event.is_terminal() {
//!             break;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod compress;
mod create;
mod delete;
mod extract;
mod naming;
mod operation;
mod progress;
mod rename;
mod transfer;

pub use compress::CompressEngine;
pub use create::{create_directory, create_file, start_create_directory, start_create_file};
pub use delete::DeleteEngine;
pub use extract::{archive_root, ExtractEngine};
pub use naming::{DirectoryNames, NameResolver};
pub use operation::{Destination, OperationError, Sources, TransferMode, TransferRequest};
pub use progress::{OperationComplete, OperationEvent, OperationType, TransferProgress};
pub use rename::{rename, start_rename, validate_filename};
pub use transfer::TransferEngine;

/// Default channel buffer size for operation progress updates.
pub const OPERATION_CHANNEL_SIZE: usize = filecore_core::DEFAULT_CHANNEL_SIZE;
