//! Local filesystem backend.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filecore_core::{
    BackendKind, EntryKind, FileError, FileHandle, FileResult, FileUri, ProtectedPaths,
};

use crate::backend::{Backend, InputStream, OutputStream};
use crate::media::MediaIndex;

/// Serves `file://` URIs from the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    media: Arc<dyn MediaIndex>,
    protected: ProtectedPaths,
}

impl LocalBackend {
    pub fn new(media: Arc<dyn MediaIndex>, protected: ProtectedPaths) -> Self {
        Self { media, protected }
    }

    fn handle_for(&self, uri: &FileUri, path: &Path) -> FileResult<FileHandle> {
        let meta = fs::symlink_metadata(path).map_err(|e| FileError::io(uri, e))?;

        let (kind, size) = if meta.file_type().is_symlink() {
            // Report the size of what the link points at when it resolves.
            let len = fs::metadata(path).map(|m| m.len()).unwrap_or(meta.len());
            (EntryKind::Shortcut, len)
        } else if meta.is_dir() {
            (EntryKind::Directory, meta.len())
        } else {
            (EntryKind::File, meta.len())
        };

        let mut handle = FileHandle::new(uri.clone(), kind, BackendKind::Local)
            .with_size(size)
            .with_access(true, !meta.permissions().readonly());
        if let Ok(modified) = meta.modified() {
            handle = handle.with_modified(modified);
        }
        Ok(handle)
    }

    fn remove_tree(&self, uri: &FileUri, path: &Path) -> FileResult<()> {
        let meta = fs::symlink_metadata(path).map_err(|e| FileError::io(uri, e))?;
        if meta.is_dir() {
            let entries = fs::read_dir(path).map_err(|e| FileError::io(uri, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| FileError::io(uri, e))?;
                let child = FileUri::from_path(entry.path())?;
                self.remove_tree(&child, &entry.path())?;
            }
            fs::remove_dir(path).map_err(|e| FileError::io(uri, e))?;
        } else {
            fs::remove_file(path).map_err(|e| FileError::io(uri, e))?;
        }
        self.media.remove(uri);
        Ok(())
    }
}

impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn stat(&self, uri: &FileUri) -> FileResult<FileHandle> {
        let path = uri.to_file_path()?;
        self.handle_for(uri, &path)
    }

    fn list(&self, uri: &FileUri) -> FileResult<Vec<FileHandle>> {
        let path = uri.to_file_path()?;
        let entries = fs::read_dir(&path).map_err(|e| FileError::io(uri, e))?;

        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FileError::io(uri, e))?;
            // Built from the path so names that are not UTF-8 keep their bytes.
            let child = FileUri::from_path(entry.path())?;
            match self.handle_for(&child, &entry.path()) {
                Ok(handle) => children.push(handle),
                // Entry vanished between read_dir and stat.
                Err(FileError::NotFound { .. }) => {
                    tracing::debug!(uri = %child, "entry disappeared during listing");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(children)
    }

    fn open_read(&self, uri: &FileUri, offset: u64) -> FileResult<InputStream> {
        let path = uri.to_file_path()?;
        let mut file = File::open(&path).map_err(|e| FileError::io(uri, e))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| FileError::io(uri, e))?;
        }
        Ok(Box::new(file))
    }

    fn open_write(&self, uri: &FileUri) -> FileResult<OutputStream> {
        let path = uri.to_file_path()?;
        if self.protected.contains_path(&path) {
            return Err(FileError::ProtectedPath {
                uri: uri.access_path(),
            });
        }
        let file = File::create(&path).map_err(|e| FileError::io(uri, e))?;
        Ok(Box::new(file))
    }

    fn mkdir(&self, uri: &FileUri) -> FileResult<()> {
        let path = uri.to_file_path()?;
        fs::create_dir(&path).map_err(|e| FileError::io(uri, e))?;
        self.media.scan(uri);
        Ok(())
    }

    fn create_file(&self, uri: &FileUri) -> FileResult<()> {
        let path = uri.to_file_path()?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| FileError::io(uri, e))?;
        self.media.scan(uri);
        Ok(())
    }

    fn delete(&self, uri: &FileUri) -> FileResult<()> {
        self.protected.check(uri)?;
        let path = uri.to_file_path()?;
        let meta = fs::symlink_metadata(&path).map_err(|e| FileError::io(uri, e))?;
        if meta.is_dir() {
            fs::remove_dir(&path).map_err(|e| FileError::io(uri, e))?;
        } else {
            fs::remove_file(&path).map_err(|e| FileError::io(uri, e))?;
        }
        self.media.remove(uri);
        Ok(())
    }

    fn delete_tree(&self, uri: &FileUri) -> FileResult<()> {
        self.protected.check(uri)?;
        let path = uri.to_file_path()?;
        self.remove_tree(uri, &path)
    }

    fn rename(&self, uri: &FileUri, new_name: &str) -> FileResult<FileUri> {
        self.protected.check(uri)?;
        let parent = uri
            .parent()
            .ok_or_else(|| FileError::unsupported("rename", uri))?;
        let target = parent.child(new_name)?;
        let from = uri.to_file_path()?;
        let to = target.to_file_path()?;

        if to != from && fs::symlink_metadata(&to).is_ok() {
            return Err(FileError::AlreadyExists {
                uri: target.access_path(),
            });
        }
        fs::rename(&from, &to).map_err(|e| FileError::io(uri, e))?;
        self.media.remove(uri);
        self.media.scan(&target);
        Ok(target)
    }

    fn move_to(&self, uri: &FileUri, target: &FileUri) -> FileResult<()> {
        if !target.is_local() {
            return Err(FileError::unsupported("move", target));
        }
        self.protected.check(uri)?;
        self.protected.check(target)?;
        let from = uri.to_file_path()?;
        let to = target.to_file_path()?;

        if fs::symlink_metadata(&to).is_ok() {
            return Err(FileError::AlreadyExists {
                uri: target.access_path(),
            });
        }
        match fs::rename(&from, &to) {
            Ok(()) => {
                self.media.remove(uri);
                self.media.scan(target);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                Err(FileError::unsupported("move across devices", uri))
            }
            Err(e) => Err(FileError::io(uri, e)),
        }
    }

    fn available_space(&self, uri: &FileUri) -> FileResult<Option<u64>> {
        let path = uri.to_file_path()?;
        let Some(existing) = nearest_existing(&path) else {
            return Ok(None);
        };
        Ok(free_space(&existing))
    }

    fn finalize_write(&self, uri: &FileUri) -> FileResult<()> {
        self.media.scan(uri);
        Ok(())
    }
}

/// Closest ancestor (or self) that exists, so space can be queried for targets
/// that are not created yet.
fn nearest_existing(path: &Path) -> Option<PathBuf> {
    path.ancestors().find(|p| p.exists()).map(Path::to_path_buf)
}

#[cfg(unix)]
fn free_space(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let path_c = CString::new(path.as_os_str().as_bytes()).ok()?;
    // SAFETY: `path_c` is a valid NUL-terminated string and `stat` is a
    // zeroed out-parameter owned by this frame.
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(path_c.as_ptr(), &mut stat) == 0 {
            #[allow(clippy::unnecessary_cast)]
            let available = (stat.f_bavail as u64) * (stat.f_frsize as u64);
            Some(available)
        } else {
            None
        }
    }
}

#[cfg(not(unix))]
fn free_space(_path: &Path) -> Option<u64> {
    None
}
