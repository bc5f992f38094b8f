//! In-process storage volume served under `mem://`.
//!
//! Useful for staging transfers and for exercising the remote-backend code
//! paths of the engines: the volume can claim to be remote, enforce a
//! capacity quota, slow down reads and demand credentials.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use filecore_core::{BackendKind, EntryKind, FileError, FileHandle, FileResult, FileUri};

use crate::backend::{Backend, InputStream, OutputStream};

#[derive(Debug, Clone)]
enum Node {
    Directory { modified: SystemTime },
    File { data: Vec<u8>, modified: SystemTime },
}

#[derive(Debug, Default)]
struct Volume {
    /// Keyed by decoded path without trailing `/`; the root is `""`.
    nodes: BTreeMap<String, Node>,
}

impl Volume {
    fn used(&self) -> u64 {
        self.nodes
            .values()
            .map(|node| match node {
                Node::File { data, .. } => data.len() as u64,
                Node::Directory { .. } => 0,
            })
            .sum()
    }

    fn is_dir(&self, key: &str) -> bool {
        key.is_empty() || matches!(self.nodes.get(key), Some(Node::Directory { .. }))
    }

    fn exists(&self, key: &str) -> bool {
        key.is_empty() || self.nodes.contains_key(key)
    }

    fn has_children(&self, key: &str) -> bool {
        let prefix = format!("{key}/");
        self.nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    /// Keys of `key` and everything below it.
    fn subtree(&self, key: &str) -> Vec<String> {
        let prefix = format!("{key}/");
        let mut keys = vec![key.to_string()];
        keys.extend(
            self.nodes
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, _)| k.clone()),
        );
        keys
    }

    fn relocate(&mut self, from: &str, to: &str) {
        for key in self.subtree(from) {
            if let Some(node) = self.nodes.remove(&key) {
                let moved = format!("{to}{}", &key[from.len()..]);
                self.nodes.insert(moved, node);
            }
        }
    }
}

/// An in-memory volume. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    volume: Arc<Mutex<Volume>>,
    remote: bool,
    capacity: Option<u64>,
    read_delay: Option<Duration>,
    require_credentials: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report this volume as a network backend.
    pub fn remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }

    /// Limit the total number of file bytes the volume holds.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Sleep this long on every listing and on every read call.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Fail every call with `AuthenticationRequired` while set.
    pub fn set_require_credentials(&self, required: bool) {
        self.require_credentials.store(required, Ordering::SeqCst);
    }

    /// Store a file, creating missing parent directories.
    pub fn put(&self, path: &str, data: impl Into<Vec<u8>>) -> FileResult<FileUri> {
        let key = normalize(path);
        let mut volume = self.lock()?;
        let mut parent = key.as_str();
        while let Some((head, _)) = parent.rsplit_once('/') {
            if !head.is_empty() {
                volume
                    .nodes
                    .entry(head.to_string())
                    .or_insert(Node::Directory {
                        modified: SystemTime::now(),
                    });
            }
            parent = head;
        }
        volume.nodes.insert(
            key.clone(),
            Node::File {
                data: data.into(),
                modified: SystemTime::now(),
            },
        );
        uri_for(&key)
    }

    /// Create a directory and its missing parents.
    pub fn put_dir(&self, path: &str) -> FileResult<FileUri> {
        let key = normalize(path);
        let mut volume = self.lock()?;
        let mut current = String::new();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            volume
                .nodes
                .entry(current.clone())
                .or_insert(Node::Directory {
                    modified: SystemTime::now(),
                });
        }
        uri_for(&key)
    }

    /// Contents of a stored file.
    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        let volume = self.lock().ok()?;
        match volume.nodes.get(&normalize(path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Whether a file or directory exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.lock()
            .map(|volume| volume.exists(&normalize(path)))
            .unwrap_or(false)
    }

    fn lock(&self) -> FileResult<MutexGuard<'_, Volume>> {
        self.volume
            .lock()
            .map_err(|_| FileError::other("memory volume lock poisoned"))
    }

    fn check_access(&self, uri: &FileUri) -> FileResult<()> {
        if self.require_credentials.load(Ordering::SeqCst) {
            return Err(FileError::AuthenticationRequired {
                uri: uri.access_path(),
            });
        }
        Ok(())
    }

    fn key(&self, uri: &FileUri) -> FileResult<String> {
        self.check_access(uri)?;
        Ok(normalize(&uri.decoded_path()))
    }

    fn handle(uri: &FileUri, node: &Node) -> FileHandle {
        match node {
            Node::Directory { modified } => {
                FileHandle::new(uri.clone(), EntryKind::Directory, BackendKind::Memory)
                    .with_size(0)
                    .with_modified(*modified)
            }
            Node::File { data, modified } => {
                FileHandle::new(uri.clone(), EntryKind::File, BackendKind::Memory)
                    .with_size(data.len() as u64)
                    .with_modified(*modified)
            }
        }
    }

    fn not_found(uri: &FileUri) -> FileError {
        FileError::NotFound {
            uri: uri.access_path(),
        }
    }

    fn require_parent(volume: &Volume, key: &str, uri: &FileUri) -> FileResult<()> {
        let parent = parent_key(key);
        if volume.is_dir(parent) {
            Ok(())
        } else {
            Err(Self::not_found(uri))
        }
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// `mem:///` URI for a volume key, percent-encoding each segment.
fn uri_for(key: &str) -> FileResult<FileUri> {
    let mut uri = FileUri::parse("mem:///")?;
    for segment in key.split('/').filter(|s| !s.is_empty()) {
        uri = uri.child(segment)?;
    }
    Ok(uri)
}

fn parent_key(key: &str) -> &str {
    key.rsplit_once('/').map(|(head, _)| head).unwrap_or("")
}

impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn is_remote(&self) -> bool {
        self.remote
    }

    fn stat(&self, uri: &FileUri) -> FileResult<FileHandle> {
        let key = self.key(uri)?;
        if key.is_empty() {
            return Ok(
                FileHandle::new(uri.clone(), EntryKind::Directory, BackendKind::Memory)
                    .with_size(0),
            );
        }
        let volume = self.lock()?;
        volume
            .nodes
            .get(&key)
            .map(|node| Self::handle(uri, node))
            .ok_or_else(|| Self::not_found(uri))
    }

    fn list(&self, uri: &FileUri) -> FileResult<Vec<FileHandle>> {
        let key = self.key(uri)?;
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }
        let volume = self.lock()?;
        if !volume.exists(&key) {
            return Err(Self::not_found(uri));
        }
        if !volume.is_dir(&key) {
            return Err(FileError::io(
                uri,
                io::Error::from(io::ErrorKind::NotADirectory),
            ));
        }

        let prefix = format!("{key}/");
        let mut children = Vec::new();
        for (path, node) in volume.nodes.range(prefix.clone()..) {
            let Some(name) = path.strip_prefix(&prefix) else {
                break;
            };
            if name.contains('/') {
                continue;
            }
            children.push(Self::handle(&uri.child(name)?, node));
        }
        Ok(children)
    }

    fn open_read(&self, uri: &FileUri, offset: u64) -> FileResult<InputStream> {
        let key = self.key(uri)?;
        let volume = self.lock()?;
        match volume.nodes.get(&key) {
            Some(Node::File { data, .. }) => {
                let mut cursor = Cursor::new(data.clone());
                cursor.set_position(offset);
                Ok(Box::new(MemoryReader {
                    inner: cursor,
                    delay: self.read_delay,
                }))
            }
            Some(Node::Directory { .. }) => Err(FileError::unsupported("read of a directory", uri)),
            None => Err(Self::not_found(uri)),
        }
    }

    fn open_write(&self, uri: &FileUri) -> FileResult<OutputStream> {
        let key = self.key(uri)?;
        let mut volume = self.lock()?;
        Self::require_parent(&volume, &key, uri)?;
        if volume.is_dir(&key) {
            return Err(FileError::AlreadyExists {
                uri: uri.access_path(),
            });
        }
        volume.nodes.insert(
            key.clone(),
            Node::File {
                data: Vec::new(),
                modified: SystemTime::now(),
            },
        );
        Ok(Box::new(MemoryWriter {
            volume: Arc::clone(&self.volume),
            key,
            capacity: self.capacity,
        }))
    }

    fn mkdir(&self, uri: &FileUri) -> FileResult<()> {
        let key = self.key(uri)?;
        let mut volume = self.lock()?;
        if volume.exists(&key) {
            return Err(FileError::AlreadyExists {
                uri: uri.access_path(),
            });
        }
        Self::require_parent(&volume, &key, uri)?;
        volume.nodes.insert(
            key,
            Node::Directory {
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn create_file(&self, uri: &FileUri) -> FileResult<()> {
        let key = self.key(uri)?;
        let mut volume = self.lock()?;
        if volume.exists(&key) {
            return Err(FileError::AlreadyExists {
                uri: uri.access_path(),
            });
        }
        Self::require_parent(&volume, &key, uri)?;
        volume.nodes.insert(
            key,
            Node::File {
                data: Vec::new(),
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn delete(&self, uri: &FileUri) -> FileResult<()> {
        let key = self.key(uri)?;
        let mut volume = self.lock()?;
        if key.is_empty() {
            return Err(FileError::unsupported("delete of the volume root", uri));
        }
        if volume.has_children(&key) {
            return Err(FileError::io(
                uri,
                io::Error::from(io::ErrorKind::DirectoryNotEmpty),
            ));
        }
        volume
            .nodes
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(uri))
    }

    fn rename(&self, uri: &FileUri, new_name: &str) -> FileResult<FileUri> {
        let key = self.key(uri)?;
        let parent = uri
            .parent()
            .ok_or_else(|| FileError::unsupported("rename", uri))?;
        let target = parent.child(new_name)?;
        let target_key = normalize(&target.decoded_path());

        let mut volume = self.lock()?;
        if !volume.nodes.contains_key(&key) {
            return Err(Self::not_found(uri));
        }
        if target_key != key && volume.exists(&target_key) {
            return Err(FileError::AlreadyExists {
                uri: target.access_path(),
            });
        }
        volume.relocate(&key, &target_key);
        Ok(target)
    }

    fn move_to(&self, uri: &FileUri, target: &FileUri) -> FileResult<()> {
        if target.scheme() != uri.scheme() {
            return Err(FileError::unsupported("move", target));
        }
        let key = self.key(uri)?;
        let target_key = normalize(&target.decoded_path());

        let mut volume = self.lock()?;
        if !volume.nodes.contains_key(&key) {
            return Err(Self::not_found(uri));
        }
        if volume.exists(&target_key) {
            return Err(FileError::AlreadyExists {
                uri: target.access_path(),
            });
        }
        Self::require_parent(&volume, &target_key, target)?;
        volume.relocate(&key, &target_key);
        Ok(())
    }

    fn available_space(&self, uri: &FileUri) -> FileResult<Option<u64>> {
        self.check_access(uri)?;
        let Some(capacity) = self.capacity else {
            return Ok(None);
        };
        let used = self.lock()?.used();
        Ok(Some(capacity.saturating_sub(used)))
    }
}

struct MemoryReader {
    inner: Cursor<Vec<u8>>,
    delay: Option<Duration>,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.inner.read(buf)
    }
}

/// Appends straight into the shared volume so partial writes are visible.
struct MemoryWriter {
    volume: Arc<Mutex<Volume>>,
    key: String,
    capacity: Option<u64>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut volume = self
            .volume
            .lock()
            .map_err(|_| io::Error::other("memory volume lock poisoned"))?;
        if let Some(capacity) = self.capacity {
            if volume.used() + buf.len() as u64 > capacity {
                return Err(io::Error::from(io::ErrorKind::StorageFull));
            }
        }
        match volume.nodes.get_mut(&self.key) {
            Some(Node::File { data, modified }) => {
                data.extend_from_slice(buf);
                *modified = SystemTime::now();
                Ok(buf.len())
            }
            _ => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
