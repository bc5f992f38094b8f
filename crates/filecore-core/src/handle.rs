//! File handle types.

use std::time::SystemTime;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::uri::FileUri;

/// Family of storage a handle lives on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    Local,
    Smb,
    Ftp,
    Sftp,
    WebDav,
    Zip,
    Content,
    Http,
    Memory,
}

impl BackendKind {
    /// Map a URI scheme onto a backend family.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        let kind = match scheme.to_ascii_lowercase().as_str() {
            "file" => Self::Local,
            "smb" => Self::Smb,
            "ftp" | "ftps" => Self::Ftp,
            "sftp" => Self::Sftp,
            "webdav" | "webdavs" => Self::WebDav,
            "zip" => Self::Zip,
            "content" => Self::Content,
            "http" | "https" => Self::Http,
            "mem" => Self::Memory,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether bytes travel over the network for this family.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Smb | Self::Ftp | Self::Sftp | Self::WebDav | Self::Http
        )
    }

    /// Whether directory URIs of this family end in `/`.
    pub fn uses_directory_suffix(&self) -> bool {
        self.is_remote()
    }
}

/// The type of entry a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    /// Symbolic link or shortcut, treated as a file.
    Shortcut,
}

/// A file or directory on some backend.
///
/// Children are never cached on the handle; they come from a backend listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHandle {
    pub uri: FileUri,
    pub name: CompactString,
    pub kind: EntryKind,
    pub backend: BackendKind,
    /// Size in bytes, `None` when the backend cannot tell.
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
    pub readable: bool,
    pub writable: bool,
    #[serde(skip)]
    computed_size: Option<u64>,
}

impl FileHandle {
    /// Create a handle with unknown size and timestamp.
    pub fn new(uri: FileUri, kind: EntryKind, backend: BackendKind) -> Self {
        let name = CompactString::from(uri.name());
        Self {
            uri,
            name,
            kind,
            backend,
            size: None,
            modified: None,
            readable: true,
            writable: true,
            computed_size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_access(mut self, readable: bool, writable: bool) -> Self {
        self.readable = readable;
        self.writable = writable;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Files and shortcuts.
    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    pub fn is_shortcut(&self) -> bool {
        self.kind == EntryKind::Shortcut
    }

    /// Whether this handle is a member of an archive.
    pub fn is_archive_member(&self) -> bool {
        self.backend == BackendKind::Zip
    }

    /// Size in bytes, zero when unknown.
    pub fn length(&self) -> u64 {
        self.size.unwrap_or(0)
    }

    /// Size in bytes, `-1` when unknown.
    pub fn length_or_unknown(&self) -> i64 {
        self.size
            .and_then(|s| i64::try_from(s).ok())
            .unwrap_or(-1)
    }

    /// Pre-scanned total size for directories, falling back to `length()`.
    pub fn computed_length(&self) -> u64 {
        self.computed_size.unwrap_or_else(|| self.length())
    }

    pub fn set_computed_length(&mut self, size: u64) {
        self.computed_size = Some(size);
    }

    pub fn parent(&self) -> Option<FileUri> {
        self.uri.parent()
    }

    /// Credential-free URI string.
    pub fn access_path(&self) -> String {
        self.uri.access_path()
    }

    /// Lowercase extension of the name, if any.
    pub fn extension(&self) -> Option<String> {
        let (base, ext) = self.name.rsplit_once('.')?;
        if base.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Dot-files are hidden.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }
}

impl PartialEq for FileHandle {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for FileHandle {}

impl std::hash::Hash for FileHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
    }
}
