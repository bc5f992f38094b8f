//! Directory listing engine for filecore.
//!
//! [`ListingEngine`] lists one directory at a time through the backend
//! registry and reports the result as a stream of [`ListingEvent`]s:
//!
//! - **Filtering** of hidden entries, SMB pseudo-shares, and files by
//!   extension or MIME type
//! - **Sorting** with directories first, by URI, name, size or date
//! - **Time-outs** and user aborts
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use filecore_backend::{BackendRegistry, NoopMediaIndex};
//! use filecore_core::{FileUri, ProtectedPaths};
//! use filecore_scan::{ListingEngine, ListingEvent, ListingOptions};
//!
//! # async fn run() {
//! let registry = Arc::new(BackendRegistry::with_defaults(
//!     Arc::new(NoopMediaIndex),
//!     ProtectedPaths::standard(),
//! ));
//! let mut engine = ListingEngine::new(registry);
//! let uri = FileUri::parse("/home/me/Videos").unwrap();
//! let mut rx = engine.start(uri, ListingOptions::default()).unwrap();
//! while let Some(event) = rx.recv().await {
//!     if let ListingEvent::Update(entries) = &event {
//!         println!("{} entries", entries.len());
//!     }
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! # }
//! ```

mod lister;
mod options;

pub use lister::{ListingEngine, ListingEvent};
pub use options::{ListingOptions, ListingOptionsBuilder, SortKey, SortOrder};
