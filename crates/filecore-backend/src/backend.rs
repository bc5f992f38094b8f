//! The capability trait every storage adapter implements.

use std::fmt;
use std::io::{Read, Write};

use filecore_core::{BackendKind, FileError, FileHandle, FileResult, FileUri};

/// Byte source returned by [`Backend::open_read`].
pub type InputStream = Box<dyn Read + Send>;

/// Byte sink returned by [`Backend::open_write`].
pub type OutputStream = Box<dyn Write + Send>;

/// Operations a storage backend offers on the URIs of its scheme(s).
///
/// All calls are blocking; engines run them on the blocking pool. A
/// capability the backend lacks fails with [`FileError::Unsupported`].
pub trait Backend: Send + Sync + fmt::Debug {
    /// Family this backend belongs to.
    fn kind(&self) -> BackendKind;

    /// Whether bytes travel over the network.
    fn is_remote(&self) -> bool {
        self.kind().is_remote()
    }

    /// Resolve a handle for `uri`.
    fn stat(&self, uri: &FileUri) -> FileResult<FileHandle>;

    /// Whether `uri` exists. Only `NotFound` counts as absent.
    fn exists(&self, uri: &FileUri) -> FileResult<bool> {
        match self.stat(uri) {
            Ok(_) => Ok(true),
            Err(FileError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Children of a directory, in backend order.
    fn list(&self, uri: &FileUri) -> FileResult<Vec<FileHandle>>;

    /// Open a file for reading, starting `offset` bytes in.
    fn open_read(&self, uri: &FileUri, offset: u64) -> FileResult<InputStream>;

    /// Create or truncate a file for writing.
    fn open_write(&self, uri: &FileUri) -> FileResult<OutputStream>;

    /// Create one directory. The parent must exist.
    fn mkdir(&self, uri: &FileUri) -> FileResult<()>;

    /// Create an empty file. Fails if it already exists.
    fn create_file(&self, uri: &FileUri) -> FileResult<()>;

    /// Delete a file or an empty directory.
    fn delete(&self, uri: &FileUri) -> FileResult<()>;

    /// Delete a file or a whole directory tree, bottom-up.
    fn delete_tree(&self, uri: &FileUri) -> FileResult<()> {
        let handle = self.stat(uri)?;
        if handle.is_dir() {
            for child in self.list(uri)? {
                self.delete_tree(&child.uri)?;
            }
        }
        self.delete(uri)
    }

    /// Rename in place, returning the new URI.
    fn rename(&self, uri: &FileUri, new_name: &str) -> FileResult<FileUri>;

    /// Move without streaming bytes. `Unsupported` means the caller must
    /// copy and delete instead.
    fn move_to(&self, uri: &FileUri, _target: &FileUri) -> FileResult<()> {
        Err(FileError::unsupported("move", uri))
    }

    /// Free bytes on the volume holding `uri`, `None` when unknown.
    fn available_space(&self, _uri: &FileUri) -> FileResult<Option<u64>> {
        Ok(None)
    }

    /// Called once after a complete, uncancelled streamed write.
    fn finalize_write(&self, _uri: &FileUri) -> FileResult<()> {
        Ok(())
    }
}
