//! Zip compression from any readable backend into any writable one.
//!
//! Sources are walked into a flat pre-order list of archive entries, packed
//! into a spool file on local temporary storage, and the finished archive is
//! then written to the target backend. A cancelled or failed upload removes
//! the partial archive.

use std::collections::HashSet;
use std::fs::File;
use std::io::{ErrorKind as IoErrorKind, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Datelike, Timelike, Utc};
use filecore_backend::{Backend, BackendRegistry, InputStream, OutputStream};
use filecore_core::{EngineConfig, FileError, FileHandle, FileResult, FileUri};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::naming::{DirectoryNames, NameResolver};
use crate::operation::{OperationError, Sources};
use crate::progress::{OperationComplete, OperationEvent, OperationType, TransferProgress};

/// Entries at or above this size need zip64 headers.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Packs files and directory trees into zip archives, one at a time.
#[derive(Debug)]
pub struct CompressEngine {
    registry: Arc<BackendRegistry>,
    config: EngineConfig,
    token: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl CompressEngine {
    pub fn new(registry: Arc<BackendRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            token: CancellationToken::new(),
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Pack `sources` into a new archive at `target`. Returns `None` while
    /// another compression is running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &mut self,
        sources: impl Into<Sources>,
        target: FileUri,
    ) -> Option<mpsc::Receiver<OperationEvent>> {
        if self.is_running() {
            tracing::debug!("compression already running, ignoring start");
            return None;
        }

        let (tx, rx) = mpsc::channel(self.config.channel_size.max(1));
        self.token = CancellationToken::new();
        let task = CompressTask {
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
            token: self.token.clone(),
            tx,
            sources: sources.into(),
            target,
            entries: Vec::new(),
            blocked: HashSet::new(),
            progress: TransferProgress::default(),
            complete: OperationComplete::new(OperationType::Compress),
        };
        self.worker = Some(tokio::task::spawn_blocking(move || task.run()));
        Some(rx)
    }

    /// Cancel the running compression. No archive is left behind.
    pub fn stop(&self) {
        self.token.cancel();
    }
}

#[derive(Debug)]
struct ArchiveEntry {
    handle: FileHandle,
    /// Path inside the archive, without a trailing `/`.
    name: String,
    root: usize,
    parent: Option<usize>,
}

struct CompressTask {
    registry: Arc<BackendRegistry>,
    config: EngineConfig,
    token: CancellationToken,
    tx: mpsc::Sender<OperationEvent>,
    sources: Sources,
    target: FileUri,

    entries: Vec<ArchiveEntry>,
    /// Entries whose subtree is skipped.
    blocked: HashSet<usize>,

    progress: TransferProgress,
    complete: OperationComplete,
}

impl CompressTask {
    fn run(mut self) {
        self.send(OperationEvent::Started {
            operation: OperationType::Compress,
        });

        let event = match self.execute() {
            Ok(()) => {
                tracing::debug!(summary = %self.complete.summary(), "compression finished");
                OperationEvent::Finished(self.complete.clone())
            }
            Err(FileError::Cancelled) => {
                tracing::debug!("compression cancelled");
                OperationEvent::Cancelled
            }
            Err(error) => {
                tracing::warn!(%error, "compression failed");
                OperationEvent::FatalError { error }
            }
        };
        self.send(event);
    }

    fn send(&self, event: OperationEvent) {
        let _ = self.tx.blocking_send(event);
    }

    fn send_progress(&self) {
        self.send(OperationEvent::Progress(self.progress));
    }

    fn check_cancelled(&self) -> FileResult<()> {
        if self.token.is_cancelled() {
            Err(FileError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn backend(&self, uri: &FileUri) -> FileResult<Arc<dyn Backend>> {
        self.registry.backend_for(uri)
    }

    fn absorb(&mut self, uri: &FileUri, error: FileError) -> FileResult<()> {
        if matches!(error, FileError::Cancelled) || error.needs_credentials() {
            return Err(error);
        }
        tracing::warn!(%uri, %error, "compression item failed");
        if self.config.stop_on_error {
            return Err(error);
        }
        self.complete
            .record_failure(OperationError::from_error(uri, &error));
        Ok(())
    }

    fn execute(&mut self) -> FileResult<()> {
        let target = self.target.clone();
        let target_backend = self.backend(&target)?;
        self.config.protected.check(&target)?;
        if target_backend.exists(&target)? {
            return Err(FileError::AlreadyExists {
                uri: target.access_path(),
            });
        }

        let roots = self.resolve_sources()?;
        if let Some(root) = roots.iter().find(|root| target.is_within(&root.uri)) {
            return Err(FileError::TargetInsideSource {
                uri: root.uri.access_path(),
            });
        }

        self.size(roots)?;
        let spool = self.pack()?;
        self.upload(spool, target_backend.as_ref())
    }

    fn resolve_sources(&mut self) -> FileResult<Vec<FileHandle>> {
        let candidates: Vec<(FileUri, FileResult<FileHandle>)> = match &self.sources {
            Sources::Handles(handles) => handles
                .iter()
                .map(|h| (h.uri.clone(), Ok(h.clone())))
                .collect(),
            Sources::Uris(uris) => uris
                .iter()
                .map(|uri| (uri.clone(), self.registry.resolve(uri)))
                .collect(),
        };

        let mut roots = Vec::new();
        for (uri, candidate) in candidates {
            match candidate {
                Ok(handle) => roots.push(handle),
                Err(error) => self.absorb(&uri, error)?,
            }
        }
        Ok(roots)
    }

    /// Build the entry list and announce its totals.
    fn size(&mut self, roots: Vec<FileHandle>) -> FileResult<()> {
        // Roots from different directories may share a name.
        let resolver = NameResolver::from_config(&self.config).with_prefix(None);
        let mut names = DirectoryNames::default();

        for (root, handle) in roots.into_iter().enumerate() {
            self.check_cancelled()?;
            let index = self.entries.len();
            let is_dir = handle.is_dir();
            let name = names.claim(&resolver, &handle.name);
            self.entries.push(ArchiveEntry {
                handle,
                name,
                root,
                parent: None,
            });
            if is_dir {
                let size = self.walk(index, root)?;
                self.entries[index].handle.set_computed_length(size);
            }
        }

        let files = || self.entries.iter().filter(|e| !e.handle.is_dir());
        let total_bytes: u64 = files().map(|e| e.handle.length()).sum();
        let total_files = files().count();
        let roots = self
            .entries
            .iter()
            .filter(|e| e.parent.is_none())
            .map(|e| e.handle.clone())
            .collect();
        tracing::debug!(entries = self.entries.len(), total_bytes, "compression sized");
        self.send(OperationEvent::FilesListUpdate {
            files: self.entries.iter().map(|e| e.handle.clone()).collect(),
            roots,
            total_bytes,
            total_files,
        });
        Ok(())
    }

    fn walk(&mut self, dir: usize, root: usize) -> FileResult<u64> {
        let uri = self.entries[dir].handle.uri.clone();
        let listing = self.backend(&uri).and_then(|backend| backend.list(&uri));
        let children = match listing {
            Ok(children) => children,
            Err(error) => {
                self.absorb(&uri, error)?;
                self.blocked.insert(dir);
                return Ok(0);
            }
        };

        let mut size = 0;
        for child in children {
            self.check_cancelled()?;
            let index = self.entries.len();
            let is_dir = child.is_dir();
            let length = child.length();
            let name = format!("{}/{}", self.entries[dir].name, child.name);
            self.entries.push(ArchiveEntry {
                handle: child,
                name,
                root,
                parent: Some(dir),
            });
            if is_dir {
                let below = self.walk(index, root)?;
                self.entries[index].handle.set_computed_length(below);
                size += below;
            } else {
                size += length;
            }
        }
        Ok(size)
    }

    /// Write every entry into a spool file; returns it rewound.
    fn pack(&mut self) -> FileResult<File> {
        let spool = tempfile::tempfile().map_err(|e| FileError::io(&self.target, e))?;
        let mut zip = ZipWriter::new(spool);

        let mut current_root = None;
        for index in 0..self.entries.len() {
            self.check_cancelled()?;

            let root = self.entries[index].root;
            if current_root != Some(root) {
                current_root = Some(root);
                self.progress.root_index = root;
                self.progress.root_bytes = 0;
            }
            if let Some(parent) = self.entries[index].parent {
                if self.blocked.contains(&parent) {
                    self.blocked.insert(index);
                }
            }
            if self.blocked.contains(&index) {
                continue;
            }

            self.progress.file_index = index;
            self.progress.file_bytes = 0;
            self.progress.file_done = false;
            self.send_progress();

            let source = self.entries[index].handle.uri.clone();
            let result = if self.entries[index].handle.is_dir() {
                self.add_directory(&mut zip, index)
            } else {
                self.add_file(&mut zip, index)
            };
            match result {
                Ok(()) => {
                    self.complete.succeeded += 1;
                    self.send(OperationEvent::Success { uri: source });
                }
                Err(error) => {
                    self.absorb(&source, error)?;
                    self.blocked.insert(index);
                }
            }

            self.progress.file_done = true;
            self.send_progress();
        }

        let mut spool = zip.finish().map_err(|e| zip_error(&self.target, e))?;
        spool
            .seek(SeekFrom::Start(0))
            .map_err(|e| FileError::io(&self.target, e))?;
        Ok(spool)
    }

    fn add_directory(&self, zip: &mut ZipWriter<File>, index: usize) -> FileResult<()> {
        let entry = &self.entries[index];
        zip.add_directory(format!("{}/", entry.name), entry_options(&entry.handle))
            .map_err(|e| zip_error(&entry.handle.uri, e))
    }

    fn add_file(&mut self, zip: &mut ZipWriter<File>, index: usize) -> FileResult<()> {
        let handle = self.entries[index].handle.clone();
        let options = entry_options(&handle).large_file(handle.length() >= ZIP64_THRESHOLD);
        zip.start_file(self.entries[index].name.as_str(), options)
            .map_err(|e| zip_error(&handle.uri, e))?;

        let written = match self.backend(&handle.uri) {
            Ok(backend) => match backend.open_read(&handle.uri, 0) {
                Ok(mut input) => self.pump(&mut input, zip, &handle.uri, backend.is_remote()),
                Err(error) => Err(error),
            },
            Err(error) => Err(error),
        };
        if written.is_err() {
            if let Err(error) = zip.abort_file() {
                tracing::warn!(uri = %handle.uri, %error, "could not drop partial archive entry");
            }
        }
        written
    }

    fn pump(
        &mut self,
        input: &mut InputStream,
        zip: &mut ZipWriter<File>,
        source: &FileUri,
        remote: bool,
    ) -> FileResult<()> {
        let mut buffer = vec![0u8; self.config.chunk_size.max(1)];
        let every = self.config.progress_every.max(1);
        let started = Instant::now();
        let mut copied = 0u64;
        let mut chunks = 0u32;

        loop {
            let read = match input.read(&mut buffer) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => return Err(FileError::io(source, e)),
            };
            zip.write_all(&buffer[..read])
                .map_err(|e| FileError::io(&self.target, e))?;
            copied += read as u64;
            self.progress.file_bytes += read as u64;
            self.progress.root_bytes += read as u64;
            self.progress.total_bytes += read as u64;
            self.complete.bytes_processed += read as u64;
            self.check_cancelled()?;

            chunks = chunks.wrapping_add(1);
            if chunks % every == 0 {
                self.progress.speed = remote.then(|| {
                    let elapsed = started.elapsed().as_secs_f64();
                    if elapsed > 0.0 {
                        copied as f64 / elapsed
                    } else {
                        0.0
                    }
                });
                self.send_progress();
            }
        }
    }

    /// Copy the finished spool to the target, removing it on failure.
    fn upload(&self, mut spool: File, backend: &dyn Backend) -> FileResult<()> {
        let target = &self.target;
        let length = spool
            .metadata()
            .map_err(|e| FileError::io(target, e))?
            .len();
        if let Some(available) = backend.available_space(target)? {
            if available < length {
                return Err(FileError::InsufficientSpace {
                    uri: target.access_path(),
                    required: length,
                    available,
                });
            }
        }

        let mut output = backend.open_write(target)?;
        let copied = self.copy_spool(&mut spool, &mut output);
        drop(output);

        match copied.and_then(|()| backend.finalize_write(target)) {
            Ok(()) => {
                tracing::debug!(%target, bytes = length, "archive written");
                Ok(())
            }
            Err(error) => {
                if let Err(cleanup) = backend.delete(target) {
                    tracing::warn!(%target, error = %cleanup, "could not remove partial archive");
                }
                Err(error)
            }
        }
    }

    fn copy_spool(&self, spool: &mut File, output: &mut OutputStream) -> FileResult<()> {
        let target = &self.target;
        let mut buffer = vec![0u8; self.config.chunk_size.max(1)];
        loop {
            self.check_cancelled()?;
            let read = match spool.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => return Err(FileError::io(target, e)),
            };
            output
                .write_all(&buffer[..read])
                .map_err(|e| FileError::io(target, e))?;
        }
        output.flush().map_err(|e| FileError::io(target, e))
    }
}

fn entry_options(handle: &FileHandle) -> SimpleFileOptions {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    match handle.modified.and_then(zip_time) {
        Some(time) => options.last_modified_time(time),
        None => options,
    }
}

/// Zip timestamps are DOS date/time fields, stored here in UTC.
fn zip_time(time: SystemTime) -> Option<zip::DateTime> {
    let time = DateTime::<Utc>::from(time);
    zip::DateTime::from_date_and_time(
        u16::try_from(time.year()).ok()?,
        time.month() as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
    )
    .ok()
}

fn zip_error(uri: &FileUri, error: ZipError) -> FileError {
    match error {
        ZipError::Io(e) => FileError::io(uri, e),
        other => FileError::other(format!("{uri}: {other}")),
    }
}
