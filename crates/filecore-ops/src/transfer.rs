//! Copy and cut across backends with progress reporting.
//!
//! A transfer runs on the blocking pool in three phases. Sizing lists every
//! source directory into a flat pre-order plan. Resolving picks a target for
//! each planned entry. Copying walks the plan, moving files in place when the
//! backend allows it and streaming them chunk by chunk otherwise.

use std::collections::{HashMap, HashSet};
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::sync::Arc;
use std::time::Instant;

use filecore_backend::{Backend, BackendRegistry, InputStream, OutputStream};
use filecore_core::{EngineConfig, FileError, FileHandle, FileResult, FileUri};
use indexmap::IndexSet;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::naming::{DirectoryNames, NameResolver};
use crate::operation::{Destination, OperationError, Sources, TransferMode, TransferRequest};
use crate::progress::{OperationComplete, OperationEvent, OperationType, TransferProgress};

/// Runs copy and cut operations, one at a time.
#[derive(Debug)]
pub struct TransferEngine {
    registry: Arc<BackendRegistry>,
    config: EngineConfig,
    token: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl TransferEngine {
    pub fn new(registry: Arc<BackendRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            token: CancellationToken::new(),
            worker: None,
        }
    }

    /// Whether a transfer is still in flight.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Copy `sources` into the directory `destination`.
    pub fn copy(
        &mut self,
        sources: impl Into<Sources>,
        destination: FileUri,
    ) -> Option<mpsc::Receiver<OperationEvent>> {
        self.start(TransferRequest::copy(sources, destination))
    }

    /// Move `sources` into the directory `destination`.
    pub fn cut(
        &mut self,
        sources: impl Into<Sources>,
        destination: FileUri,
    ) -> Option<mpsc::Receiver<OperationEvent>> {
        self.start(TransferRequest::cut(sources, destination))
    }

    /// Start a transfer. Returns `None` while another one is running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self, request: TransferRequest) -> Option<mpsc::Receiver<OperationEvent>> {
        if self.is_running() {
            tracing::debug!("transfer already running, ignoring start");
            return None;
        }

        let (tx, rx) = mpsc::channel(self.config.channel_size.max(1));
        self.token = CancellationToken::new();
        let task = TransferTask::new(
            Arc::clone(&self.registry),
            self.config.clone(),
            self.token.clone(),
            tx,
            request,
        );
        self.worker = Some(tokio::task::spawn_blocking(move || task.run()));
        Some(rx)
    }

    /// Cancel the running transfer. The partial target is removed and the
    /// operation ends with `Cancelled`.
    pub fn stop(&self) {
        self.token.cancel();
    }
}

#[derive(Debug)]
struct PlanEntry {
    handle: FileHandle,
    /// Index of the root this entry belongs to.
    root: usize,
    /// Plan index of the directory this entry was listed from.
    parent: Option<usize>,
}

pub(crate) struct TransferTask {
    registry: Arc<BackendRegistry>,
    config: EngineConfig,
    resolver: NameResolver,
    token: CancellationToken,
    tx: mpsc::Sender<OperationEvent>,
    request: TransferRequest,

    plan: Vec<PlanEntry>,
    /// Explicit target per root, only for `Destination::Targets`.
    explicit: Vec<Option<FileUri>>,
    targets: Vec<Option<FileUri>>,
    /// Source children of each planned directory not yet removed by a cut.
    children: HashMap<usize, IndexSet<usize>>,
    /// Entries whose subtree is skipped.
    blocked: HashSet<usize>,
    /// Transfer what each source directory holds rather than the directory.
    contents_only: bool,

    progress: TransferProgress,
    complete: OperationComplete,
}

impl TransferTask {
    pub(crate) fn new(
        registry: Arc<BackendRegistry>,
        config: EngineConfig,
        token: CancellationToken,
        tx: mpsc::Sender<OperationEvent>,
        request: TransferRequest,
    ) -> Self {
        let operation = match request.mode {
            TransferMode::Copy => OperationType::Copy,
            TransferMode::Cut => OperationType::Move,
        };
        Self {
            resolver: NameResolver::from_config(&config),
            registry,
            config,
            token,
            tx,
            request,
            plan: Vec::new(),
            explicit: Vec::new(),
            targets: Vec::new(),
            children: HashMap::new(),
            blocked: HashSet::new(),
            contents_only: false,
            progress: TransferProgress::default(),
            complete: OperationComplete::new(operation),
        }
    }

    /// Unpack each source: its entries become the roots of a copy.
    pub(crate) fn extracting(mut self) -> Self {
        self.contents_only = true;
        self.complete = OperationComplete::new(OperationType::Extract);
        self
    }

    pub(crate) fn run(mut self) {
        self.send(OperationEvent::Started {
            operation: self.complete.operation_type,
        });

        let event = match self.execute() {
            Ok(()) => {
                tracing::debug!(summary = %self.complete.summary(), "transfer finished");
                OperationEvent::Finished(self.complete.clone())
            }
            Err(FileError::Cancelled) => {
                tracing::debug!("transfer cancelled");
                OperationEvent::Cancelled
            }
            Err(error) => {
                tracing::warn!(%error, "transfer failed");
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

    fn is_cut(&self) -> bool {
        self.request.mode == TransferMode::Cut
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

    /// Record a per-item failure, or escalate it when it ends the operation.
    fn absorb(&mut self, uri: &FileUri, error: FileError) -> FileResult<()> {
        if matches!(error, FileError::Cancelled) || error.needs_credentials() {
            return Err(error);
        }
        tracing::warn!(%uri, %error, "transfer item failed");
        if self.config.stop_on_error {
            return Err(error);
        }
        self.complete
            .record_failure(OperationError::from_error(uri, &error));
        Ok(())
    }

    fn execute(&mut self) -> FileResult<()> {
        let roots = self.resolve_sources()?;
        if let Destination::Directory(dir) = &self.request.destination {
            let dir = dir.clone();
            ensure_directory(self.backend(&dir)?.as_ref(), &dir)?;
        }

        self.size(roots)?;
        self.resolve_targets()?;
        self.copy_all()
    }

    /// Resolve the roots, keeping explicit targets aligned with them.
    fn resolve_sources(&mut self) -> FileResult<Vec<FileHandle>> {
        let explicit: Vec<Option<FileUri>> = match &self.request.destination {
            Destination::Targets(targets) => {
                if targets.len() != self.request.sources.len() {
                    return Err(FileError::other(format!(
                        "{} targets given for {} sources",
                        targets.len(),
                        self.request.sources.len()
                    )));
                }
                targets.iter().cloned().map(Some).collect()
            }
            Destination::Directory(_) => vec![None; self.request.sources.len()],
        };

        let candidates: Vec<FileResult<FileHandle>> = match &self.request.sources {
            Sources::Handles(handles) => handles.iter().cloned().map(Ok).collect(),
            Sources::Uris(uris) => uris.iter().map(|uri| self.registry.resolve(uri)).collect(),
        };

        let mut roots = Vec::new();
        for (index, candidate) in candidates.into_iter().enumerate() {
            match candidate {
                Ok(handle) => {
                    roots.push(handle);
                    self.explicit.push(explicit[index].clone());
                }
                Err(error) => {
                    let uri = match &self.request.sources {
                        Sources::Uris(uris) => uris[index].clone(),
                        Sources::Handles(handles) => handles[index].uri.clone(),
                    };
                    self.absorb(&uri, error)?;
                }
            }
        }
        if self.contents_only {
            return self.expand(roots);
        }
        Ok(roots)
    }

    /// Replace every root by the entries listed inside it.
    fn expand(&mut self, roots: Vec<FileHandle>) -> FileResult<Vec<FileHandle>> {
        let mut entries = Vec::new();
        for root in roots {
            self.check_cancelled()?;
            if !root.is_dir() {
                self.absorb(&root.uri, FileError::unsupported("extraction", &root.uri))?;
                continue;
            }
            let listing = self
                .backend(&root.uri)
                .and_then(|backend| backend.list(&root.uri));
            match listing {
                Ok(listed) => entries.extend(listed),
                Err(error) => self.absorb(&root.uri, error)?,
            }
        }
        self.explicit = vec![None; entries.len()];
        Ok(entries)
    }

    /// Build the flat pre-order plan and announce its totals.
    fn size(&mut self, roots: Vec<FileHandle>) -> FileResult<()> {
        for (root, handle) in roots.into_iter().enumerate() {
            self.check_cancelled()?;
            let index = self.plan.len();
            let is_dir = handle.is_dir();
            self.plan.push(PlanEntry {
                handle,
                root,
                parent: None,
            });
            if is_dir {
                let size = self.walk(index, root)?;
                self.plan[index].handle.set_computed_length(size);
            }
        }

        let total_bytes: u64 = self
            .plan
            .iter()
            .filter(|e| !e.handle.is_dir())
            .map(|e| e.handle.length())
            .sum();
        let total_files = self.plan.iter().filter(|e| !e.handle.is_dir()).count();
        let roots = self
            .plan
            .iter()
            .filter(|e| e.parent.is_none())
            .map(|e| e.handle.clone())
            .collect();
        tracing::debug!(entries = self.plan.len(), total_bytes, "transfer sized");
        self.send(OperationEvent::FilesListUpdate {
            files: self.plan.iter().map(|e| e.handle.clone()).collect(),
            roots,
            total_bytes,
            total_files,
        });
        Ok(())
    }

    /// List `dir` recursively into the plan; returns the bytes below it.
    fn walk(&mut self, dir: usize, root: usize) -> FileResult<u64> {
        let uri = self.plan[dir].handle.uri.clone();
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
            let index = self.plan.len();
            let is_dir = child.is_dir();
            let length = child.length();
            self.plan.push(PlanEntry {
                handle: child,
                root,
                parent: Some(dir),
            });
            self.children.entry(dir).or_default().insert(index);
            if is_dir {
                let below = self.walk(index, root)?;
                self.plan[index].handle.set_computed_length(below);
                size += below;
            } else {
                size += length;
            }
        }
        Ok(size)
    }

    fn resolve_targets(&mut self) -> FileResult<()> {
        self.targets = vec![None; self.plan.len()];

        let mut names = match &self.request.destination {
            Destination::Directory(dir) => {
                let listing = self.backend(dir)?.list(dir)?;
                Some(DirectoryNames::new(
                    listing.into_iter().map(|h| h.name.to_string()),
                ))
            }
            Destination::Targets(_) => None,
        };

        for index in 0..self.plan.len() {
            let (parent, root) = (self.plan[index].parent, self.plan[index].root);
            let target = match parent {
                None => {
                    let handle = self.plan[index].handle.clone();
                    let source = handle.uri.clone();
                    let target = match self.root_target(root, &handle, names.as_mut()) {
                        Ok(target) => target,
                        Err(error) => {
                            self.absorb(&source, error)?;
                            self.blocked.insert(index);
                            continue;
                        }
                    };
                    if let Err(error) = self.check_root(&source, &target) {
                        self.absorb(&source, error)?;
                        self.blocked.insert(index);
                        continue;
                    }
                    target
                }
                Some(parent) => {
                    let Some(parent_target) = &self.targets[parent] else {
                        continue;
                    };
                    let handle = &self.plan[index].handle;
                    parent_target.child_like(&handle.uri, handle.is_dir())?
                }
            };
            self.targets[index] = Some(target);
        }
        Ok(())
    }

    fn root_target(
        &self,
        root: usize,
        handle: &FileHandle,
        names: Option<&mut DirectoryNames>,
    ) -> FileResult<FileUri> {
        if let Some(Some(target)) = self.explicit.get(root) {
            if !self.request.overwrite && self.backend(target)?.exists(target)? {
                return Err(FileError::AlreadyExists {
                    uri: target.access_path(),
                });
            }
            return Ok(target.clone());
        }

        let Destination::Directory(dir) = &self.request.destination else {
            return Err(FileError::other("no target for source"));
        };
        let Some(names) = names else {
            return Err(FileError::other("destination listing unavailable"));
        };
        let name = if self.request.overwrite {
            names.claim_literal(&self.resolver, &handle.name)
        } else {
            names.claim(&self.resolver, &handle.name)
        };
        if name == handle.name.as_str() {
            dir.child_like(&handle.uri, handle.is_dir())
        } else if handle.is_dir() {
            dir.child_dir(&name)
        } else {
            dir.child(&name)
        }
    }

    fn check_root(&self, source: &FileUri, target: &FileUri) -> FileResult<()> {
        if target.is_within(source) {
            return Err(FileError::TargetInsideSource {
                uri: source.access_path(),
            });
        }
        if self.request.overwrite {
            self.config.protected.check(target)?;
        }
        if self.is_cut() {
            self.config.protected.check(source)?;
        }
        Ok(())
    }

    fn copy_all(&mut self) -> FileResult<()> {
        let mut current_root = None;
        for index in 0..self.plan.len() {
            self.check_cancelled()?;

            let root = self.plan[index].root;
            if current_root != Some(root) {
                current_root = Some(root);
                self.progress.root_index = root;
                self.progress.root_bytes = 0;
            }

            if let Some(parent) = self.plan[index].parent {
                if self.blocked.contains(&parent) {
                    self.blocked.insert(index);
                }
            }
            if self.blocked.contains(&index) {
                continue;
            }
            let Some(target) = self.targets[index].clone() else {
                continue;
            };

            self.progress.file_index = index;
            self.progress.file_bytes = 0;
            self.progress.file_done = false;
            self.progress.speed = None;
            self.send_progress();

            let result = if self.plan[index].handle.is_dir() {
                self.copy_directory(index, &target)
            } else {
                self.transfer_file(index, &target)
            };
            match result {
                Ok(()) => self.complete.succeeded += 1,
                Err(error) => {
                    let source = self.plan[index].handle.uri.clone();
                    self.absorb(&source, error)?;
                    self.blocked.insert(index);
                }
            }

            self.progress.file_done = true;
            self.send_progress();
        }
        Ok(())
    }

    fn copy_directory(&mut self, index: usize, target: &FileUri) -> FileResult<()> {
        let backend = self.backend(target)?;
        match backend.mkdir(target) {
            Ok(()) => {}
            Err(FileError::AlreadyExists { .. }) if backend.stat(target)?.is_dir() => {}
            Err(error) => return Err(error),
        }
        tracing::debug!(%target, "directory created");

        let has_children = self.children.get(&index).is_some_and(|c| !c.is_empty());
        if self.is_cut() && !has_children {
            let source = self.plan[index].handle.uri.clone();
            self.backend(&source)?.delete(&source)?;
            self.release(index);
        }
        Ok(())
    }

    fn transfer_file(&mut self, index: usize, target: &FileUri) -> FileResult<()> {
        let source = self.plan[index].handle.clone();
        let source_backend = self.backend(&source.uri)?;

        if self.is_cut() && self.registry.same_backend(&source.uri, target) {
            match source_backend.move_to(&source.uri, target) {
                Ok(()) => {
                    let length = source.length();
                    self.count_bytes(length);
                    tracing::debug!(source = %source.uri, %target, "moved in place");
                    self.release(index);
                    self.send(OperationEvent::Success {
                        uri: target.clone(),
                    });
                    return Ok(());
                }
                Err(error) if error.needs_credentials() => return Err(error),
                Err(error) => {
                    tracing::debug!(source = %source.uri, %error, "fast move unavailable, copying");
                }
            }
        }

        self.stream_copy(&source, source_backend.as_ref(), target)?;

        if self.is_cut() {
            source_backend.delete(&source.uri)?;
            self.release(index);
        }
        tracing::debug!(source = %source.uri, %target, "file transferred");
        self.send(OperationEvent::Success {
            uri: target.clone(),
        });
        Ok(())
    }

    fn stream_copy(
        &mut self,
        source: &FileHandle,
        source_backend: &dyn Backend,
        target: &FileUri,
    ) -> FileResult<()> {
        let target_backend = self.backend(target)?;
        let required = source.length();
        if let Some(available) = target_backend.available_space(target)? {
            if available < required {
                return Err(FileError::InsufficientSpace {
                    uri: target.access_path(),
                    required,
                    available,
                });
            }
        }

        let mut input = source_backend.open_read(&source.uri, 0)?;
        let mut output = target_backend.open_write(target)?;
        let remote = source_backend.is_remote() || target_backend.is_remote();
        let pumped = self.pump(&mut input, &mut output, &source.uri, target, remote);
        drop(output);

        match pumped {
            Ok(()) => target_backend.finalize_write(target),
            Err(error) => {
                if let Err(cleanup) = target_backend.delete(target) {
                    tracing::warn!(%target, error = %cleanup, "could not remove partial target");
                }
                Err(error)
            }
        }
    }

    fn pump(
        &mut self,
        input: &mut InputStream,
        output: &mut OutputStream,
        source: &FileUri,
        target: &FileUri,
        remote: bool,
    ) -> FileResult<()> {
        let mut buffer = vec![0u8; self.config.chunk_size.max(1)];
        let every = self.config.progress_every.max(1);
        let started = Instant::now();
        let mut copied = 0u64;
        let mut chunks = 0u32;

        loop {
            let read = match input.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => return Err(FileError::io(source, e)),
            };
            output
                .write_all(&buffer[..read])
                .map_err(|e| FileError::io(target, e))?;
            copied += read as u64;
            self.count_bytes(read as u64);
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
        output.flush().map_err(|e| FileError::io(target, e))
    }

    fn count_bytes(&mut self, bytes: u64) {
        self.progress.file_bytes += bytes;
        self.progress.root_bytes += bytes;
        self.progress.total_bytes += bytes;
        self.complete.bytes_processed += bytes;
    }

    /// Drop `removed` from its parent's children; a planned directory left
    /// with none is deleted, and the check repeats one level up.
    fn release(&mut self, removed: usize) {
        let mut current = removed;
        while let Some(parent) = self.plan[current].parent {
            let Some(children) = self.children.get_mut(&parent) else {
                break;
            };
            children.shift_remove(&current);
            if !children.is_empty() {
                break;
            }

            let uri = self.plan[parent].handle.uri.clone();
            let deleted = self
                .backend(&uri)
                .and_then(|backend| backend.delete(&uri));
            match deleted {
                Ok(()) => tracing::debug!(%uri, "emptied source directory removed"),
                Err(error) => {
                    tracing::warn!(%uri, %error, "could not remove emptied source directory");
                    break;
                }
            }
            current = parent;
        }
    }
}

/// Make sure `dir` exists, creating missing ancestors top-down.
fn ensure_directory(backend: &dyn Backend, dir: &FileUri) -> FileResult<()> {
    let mut missing = Vec::new();
    let mut current = Some(dir.clone());
    while let Some(uri) = current.take() {
        match backend.stat(&uri) {
            Ok(handle) if handle.is_dir() => break,
            Ok(_) => {
                return Err(FileError::AlreadyExists {
                    uri: uri.access_path(),
                });
            }
            Err(FileError::NotFound { .. }) => {
                current = uri.parent();
                missing.push(uri);
            }
            Err(error) => return Err(error),
        }
    }
    for uri in missing.iter().rev() {
        tracing::debug!(%uri, "creating destination directory");
        backend.mkdir(uri)?;
    }
    Ok(())
}
