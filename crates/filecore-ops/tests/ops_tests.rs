use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use filecore_backend::{BackendRegistry, MemoryBackend, NoopMediaIndex};
use filecore_core::{EngineConfig, ErrorKind, FileError, FileUri, ProtectedPaths};
use filecore_ops::{
    create_directory, create_file, rename, start_create_directory, start_create_file,
    start_rename, CompressEngine, DeleteEngine, ExtractEngine, OperationComplete, OperationEvent,
    OperationType, TransferEngine, TransferProgress, TransferRequest,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

fn registry_with(memory: MemoryBackend) -> Arc<BackendRegistry> {
    let mut registry =
        BackendRegistry::with_defaults(Arc::new(NoopMediaIndex), ProtectedPaths::none());
    registry.register("mem", Arc::new(memory));
    Arc::new(registry)
}

fn local(path: &Path) -> FileUri {
    FileUri::from_path(path).unwrap()
}

fn mem(path: &str) -> FileUri {
    FileUri::parse(&format!("mem://{path}")).unwrap()
}

async fn collect(mut rx: mpsc::Receiver<OperationEvent>) -> Vec<OperationEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

fn finished(events: &[OperationEvent]) -> &OperationComplete {
    match events.last() {
        Some(OperationEvent::Finished(complete)) => complete,
        other => panic!("expected Finished, got {other:?}"),
    }
}

fn progress(events: &[OperationEvent]) -> Vec<TransferProgress> {
    events
        .iter()
        .filter_map(|e| match e {
            OperationEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect()
}

fn successes(events: &[OperationEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            OperationEvent::Success { uri } => Some(uri.name()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_copy_round_trip() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("album");
    fs::create_dir_all(src.join("disc 2")).unwrap();
    fs::write(src.join("01.flac"), vec![7u8; 100_000]).unwrap();
    fs::write(src.join("disc 2").join("02.flac"), b"second").unwrap();
    let dest = temp.path().join("backup");

    let mut engine = TransferEngine::new(registry_with(MemoryBackend::new()), EngineConfig::default());
    let rx = engine.copy(vec![local(&src)], local(&dest)).unwrap();
    let events = collect(rx).await;

    assert!(matches!(events[0], OperationEvent::Started { .. }));
    let OperationEvent::FilesListUpdate {
        files,
        roots,
        total_bytes,
        total_files,
    } = &events[1]
    else {
        panic!("expected the file list, got {:?}", events[1]);
    };
    assert_eq!(files.len(), 4);
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].computed_length(), 100_006);
    assert_eq!(*total_bytes, 100_006);
    assert_eq!(*total_files, 2);

    let complete = finished(&events);
    assert!(complete.is_success());
    assert_eq!(complete.succeeded, 4);
    assert_eq!(complete.bytes_processed, 100_006);

    let copied = dest.join("album");
    assert_eq!(fs::read(copied.join("01.flac")).unwrap(), vec![7u8; 100_000]);
    assert_eq!(fs::read(copied.join("disc 2").join("02.flac")).unwrap(), b"second");
    assert!(src.join("01.flac").exists());
    assert!(src.join("disc 2").join("02.flac").exists());
}

#[tokio::test]
async fn test_copy_into_same_directory_picks_copy_names() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.txt"), b"a").unwrap();
    fs::write(temp.path().join("a (copy).txt"), b"a").unwrap();
    let mut engine = TransferEngine::new(registry_with(MemoryBackend::new()), EngineConfig::default());

    let sources = vec![
        local(&temp.path().join("a.txt")),
        local(&temp.path().join("a (copy).txt")),
    ];
    let rx = engine.copy(sources, local(temp.path())).unwrap();
    let events = collect(rx).await;

    assert!(finished(&events).is_success());
    assert_eq!(successes(&events), vec!["a (copy 2).txt", "a (copy 3).txt"]);
    assert!(temp.path().join("a (copy 3).txt").exists());
}

#[tokio::test]
async fn test_cut_within_local_moves_in_place() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("season");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("e01.mkv"), b"one").unwrap();
    fs::write(src.join("e02.mkv"), b"two").unwrap();
    let dest = temp.path().join("archive");
    fs::create_dir(&dest).unwrap();

    let mut engine = TransferEngine::new(registry_with(MemoryBackend::new()), EngineConfig::default());
    let rx = engine.cut(vec![local(&src)], local(&dest)).unwrap();
    let events = collect(rx).await;

    let complete = finished(&events);
    assert!(complete.is_success(), "{:?}", complete.errors);
    assert_eq!(complete.bytes_processed, 6);
    assert_eq!(fs::read(dest.join("season").join("e01.mkv")).unwrap(), b"one");
    assert_eq!(fs::read(dest.join("season").join("e02.mkv")).unwrap(), b"two");
    assert!(!src.exists());
}

#[tokio::test]
async fn test_cut_across_backends_removes_emptied_source_tree() {
    let memory = MemoryBackend::new().remote(true);
    memory.put("/in/show/s1/e01.mkv", b"episode one".to_vec()).unwrap();
    memory.put("/in/show/e00.mkv", b"pilot".to_vec()).unwrap();
    memory.put_dir("/in/show/empty").unwrap();
    let temp = TempDir::new().unwrap();

    let mut engine = TransferEngine::new(registry_with(memory.clone()), EngineConfig::default());
    let rx = engine.cut(vec![mem("/in/show")], local(temp.path())).unwrap();
    let events = collect(rx).await;

    assert!(finished(&events).is_success());
    let show = temp.path().join("show");
    assert_eq!(fs::read(show.join("s1").join("e01.mkv")).unwrap(), b"episode one");
    assert_eq!(fs::read(show.join("e00.mkv")).unwrap(), b"pilot");
    assert!(show.join("empty").is_dir());
    assert!(!memory.contains("/in/show"));
    assert!(memory.contains("/in"));
}

#[tokio::test]
async fn test_partial_cut_keeps_parent() {
    let memory = MemoryBackend::new();
    memory.put("/d/keep.txt", b"keep".to_vec()).unwrap();
    memory.put("/d/take.txt", b"take".to_vec()).unwrap();
    let temp = TempDir::new().unwrap();

    let mut engine = TransferEngine::new(registry_with(memory.clone()), EngineConfig::default());
    let rx = engine.cut(vec![mem("/d/take.txt")], local(temp.path())).unwrap();
    let events = collect(rx).await;

    assert!(finished(&events).is_success());
    assert!(!memory.contains("/d/take.txt"));
    assert!(memory.contains("/d/keep.txt"));
    assert_eq!(fs::read(temp.path().join("take.txt")).unwrap(), b"take");
}

#[tokio::test]
async fn test_protected_source_is_not_touched() {
    let temp = TempDir::new().unwrap();
    let dcim = temp.path().join("DCIM");
    fs::create_dir(&dcim).unwrap();
    fs::write(dcim.join("img.jpg"), b"jpeg").unwrap();
    let dest = temp.path().join("out");
    fs::create_dir(&dest).unwrap();

    let config = EngineConfig::builder()
        .protected(ProtectedPaths::new([dcim.clone()]))
        .build()
        .unwrap();
    let mut engine = TransferEngine::new(registry_with(MemoryBackend::new()), config);
    let rx = engine.cut(vec![local(&dcim)], local(&dest)).unwrap();
    let events = collect(rx).await;

    let complete = finished(&events);
    assert_eq!(complete.failed, 1);
    assert_eq!(complete.errors[0].kind, ErrorKind::PermissionDenied);
    assert!(dcim.join("img.jpg").exists());
    assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
}

#[tokio::test]
async fn test_target_inside_source_is_rejected() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("dir");
    fs::create_dir_all(src.join("sub")).unwrap();

    let mut engine = TransferEngine::new(registry_with(MemoryBackend::new()), EngineConfig::default());
    let rx = engine.copy(vec![local(&src)], local(&src.join("sub"))).unwrap();
    let events = collect(rx).await;

    let complete = finished(&events);
    assert_eq!(complete.failed, 1);
    assert!(complete.errors[0].message.contains("into itself"));
    assert!(!src.join("sub").join("dir").exists());
}

#[tokio::test]
async fn test_explicit_targets_are_literal() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.txt"), b"new").unwrap();
    fs::write(temp.path().join("b.txt"), b"old").unwrap();
    let sources = vec![local(&temp.path().join("a.txt"))];
    let target = vec![local(&temp.path().join("b.txt"))];

    let mut engine = TransferEngine::new(registry_with(MemoryBackend::new()), EngineConfig::default());
    let request = TransferRequest::copy(sources.clone(), local(temp.path())).with_targets(target.clone());
    let events = collect(engine.start(request).unwrap()).await;
    assert_eq!(finished(&events).errors[0].kind, ErrorKind::Unknown);
    assert_eq!(fs::read(temp.path().join("b.txt")).unwrap(), b"old");

    let request = TransferRequest::copy(sources, local(temp.path()))
        .with_targets(target)
        .with_overwrite(true);
    let mut engine = TransferEngine::new(registry_with(MemoryBackend::new()), EngineConfig::default());
    let events = collect(engine.start(request).unwrap()).await;
    assert!(finished(&events).is_success());
    assert_eq!(fs::read(temp.path().join("b.txt")).unwrap(), b"new");
}

#[tokio::test]
async fn test_stop_leaves_no_partial_target() {
    let memory = MemoryBackend::new()
        .remote(true)
        .with_read_delay(Duration::from_millis(2));
    memory.put("/big.bin", vec![1u8; 8 * 1024 * 1024]).unwrap();
    let temp = TempDir::new().unwrap();

    let mut engine = TransferEngine::new(registry_with(memory.clone()), EngineConfig::default());
    let mut rx = engine.copy(vec![mem("/big.bin")], local(temp.path())).unwrap();
    assert!(engine.is_running());
    assert!(engine.copy(vec![mem("/big.bin")], local(temp.path())).is_none());

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        if matches!(event, OperationEvent::Progress(p) if p.file_bytes > 0) {
            engine.stop();
        }
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }

    assert!(matches!(events.last(), Some(OperationEvent::Cancelled)));
    assert!(successes(&events).is_empty());
    assert!(!temp.path().join("big.bin").exists());
    assert!(memory.contains("/big.bin"));
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    fs::create_dir(&src).unwrap();
    for (name, size) in [("a.bin", 5000), ("b.bin", 12_345), ("c.bin", 1)] {
        fs::write(src.join(name), vec![3u8; size]).unwrap();
    }

    let config = EngineConfig::builder()
        .chunk_size(1024usize)
        .progress_every(1u32)
        .build()
        .unwrap();
    let mut engine = TransferEngine::new(registry_with(MemoryBackend::new()), config);
    let rx = engine.copy(vec![local(&src)], local(&temp.path().join("dst"))).unwrap();
    let events = collect(rx).await;

    let OperationEvent::FilesListUpdate { total_bytes, .. } = &events[1] else {
        panic!("expected the file list");
    };
    let updates = progress(&events);
    assert!(updates.len() > 3);
    assert!(updates.windows(2).all(|w| w[0].total_bytes <= w[1].total_bytes));
    assert!(updates.windows(2).all(|w| w[0].file_index <= w[1].file_index));
    assert_eq!(updates.last().unwrap().total_bytes, *total_bytes);
    assert!(updates.iter().all(|p| p.speed.is_none()));
}

#[tokio::test]
async fn test_remote_side_reports_speed() {
    let memory = MemoryBackend::new().remote(true);
    memory.put("/clip.mp4", vec![9u8; 64 * 1024]).unwrap();
    let temp = TempDir::new().unwrap();

    let config = EngineConfig::builder()
        .chunk_size(4096usize)
        .progress_every(2u32)
        .build()
        .unwrap();
    let mut engine = TransferEngine::new(registry_with(memory), config);
    let rx = engine.copy(vec![mem("/clip.mp4")], local(temp.path())).unwrap();
    let events = collect(rx).await;

    assert!(finished(&events).is_success());
    assert!(progress(&events).iter().any(|p| p.speed.is_some()));
}

#[tokio::test]
async fn test_insufficient_space_fails_that_file_only() {
    let memory = MemoryBackend::new().with_capacity(10);
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("big.bin"), vec![0u8; 100]).unwrap();
    fs::write(temp.path().join("small.txt"), b"tiny").unwrap();

    let mut engine = TransferEngine::new(registry_with(memory.clone()), EngineConfig::default());
    let sources = vec![
        local(&temp.path().join("big.bin")),
        local(&temp.path().join("small.txt")),
    ];
    let rx = engine.copy(sources, mem("/dest")).unwrap();
    let events = collect(rx).await;

    let complete = finished(&events);
    assert_eq!(complete.succeeded, 1);
    assert_eq!(complete.failed, 1);
    assert_eq!(complete.errors[0].kind, ErrorKind::InsufficientSpace);
    assert_eq!(memory.read("/dest/small.txt"), Some(b"tiny".to_vec()));
    assert!(!memory.contains("/dest/big.bin"));
}

#[tokio::test]
async fn test_missing_credentials_are_fatal() {
    let memory = MemoryBackend::new().remote(true);
    memory.put("/share/a.mkv", b"a".to_vec()).unwrap();
    memory.set_require_credentials(true);
    let temp = TempDir::new().unwrap();

    let mut engine = TransferEngine::new(registry_with(memory), EngineConfig::default());
    let rx = engine.copy(vec![mem("/share/a.mkv")], local(temp.path())).unwrap();
    let events = collect(rx).await;

    match events.last().unwrap() {
        OperationEvent::FatalError { error } => assert!(error.needs_credentials()),
        other => panic!("unexpected terminal event {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_engine() {
    let temp = TempDir::new().unwrap();
    let tree = temp.path().join("tree");
    fs::create_dir_all(tree.join("leaf")).unwrap();
    fs::write(tree.join("leaf").join("f"), b"f").unwrap();
    fs::write(temp.path().join("single.txt"), b"12345").unwrap();

    let mut engine = DeleteEngine::new(registry_with(MemoryBackend::new()), EngineConfig::default());
    let targets = vec![
        local(&tree),
        local(&temp.path().join("ghost")),
        local(&temp.path().join("single.txt")),
    ];
    let events = collect(engine.start(targets).unwrap()).await;

    assert!(matches!(events[0], OperationEvent::Started { .. }));
    let complete = finished(&events);
    assert_eq!(complete.succeeded, 2);
    assert_eq!(complete.failed, 1);
    assert_eq!(complete.errors[0].kind, ErrorKind::NotFound);
    assert_eq!(successes(&events), vec!["tree", "single.txt"]);
    assert_eq!(progress(&events).last().unwrap().total_bytes, 5);
    assert!(!tree.exists());
}

#[tokio::test]
async fn test_delete_needs_credentials() {
    let memory = MemoryBackend::new().remote(true);
    memory.put("/share/a", b"a".to_vec()).unwrap();
    memory.set_require_credentials(true);

    let mut engine = DeleteEngine::new(registry_with(memory.clone()), EngineConfig::default());
    let events = collect(engine.start(mem("/share/a")).unwrap()).await;
    assert!(matches!(events.last(), Some(OperationEvent::FatalError { .. })));

    memory.set_require_credentials(false);
    assert!(memory.contains("/share/a"));
}

#[tokio::test]
async fn test_rename_and_create() {
    let temp = TempDir::new().unwrap();
    let registry = registry_with(MemoryBackend::new());

    let dir = create_directory(registry.clone(), local(&temp.path().join("Movies")))
        .await
        .unwrap();
    let file = create_file(registry.clone(), dir.child("a.mkv").unwrap())
        .await
        .unwrap();
    assert!(temp.path().join("Movies").join("a.mkv").is_file());
    assert!(matches!(
        create_file(registry.clone(), file.clone()).await,
        Err(FileError::AlreadyExists { .. })
    ));
    assert!(matches!(
        create_directory(registry.clone(), local(&temp.path().join("bad:name"))).await,
        Err(FileError::InvalidName { .. })
    ));

    fs::write(temp.path().join("Movies").join("b.mkv"), b"b").unwrap();
    assert!(matches!(
        rename(registry.clone(), ProtectedPaths::none(), file.clone(), "b.mkv".into()).await,
        Err(FileError::AlreadyExists { .. })
    ));
    assert!(matches!(
        rename(registry.clone(), ProtectedPaths::none(), file.clone(), "".into()).await,
        Err(FileError::InvalidName { .. })
    ));
    assert!(matches!(
        rename(
            registry.clone(),
            ProtectedPaths::new([temp.path().join("Movies")]),
            dir.clone(),
            "Films".into()
        )
        .await,
        Err(FileError::ProtectedPath { .. })
    ));

    let events = collect(start_rename(
        registry.clone(),
        ProtectedPaths::none(),
        file,
        "c.mkv".into(),
    ))
    .await;
    assert_eq!(successes(&events), vec!["c.mkv"]);
    assert!(finished(&events).is_success());
    assert!(temp.path().join("Movies").join("c.mkv").is_file());

    let events = collect(start_create_directory(
        registry.clone(),
        local(&temp.path().join("Shows")),
    ))
    .await;
    assert!(matches!(
        events[0],
        OperationEvent::Started {
            operation: OperationType::CreateDirectory
        }
    ));
    assert_eq!(successes(&events), vec!["Shows"]);
    assert!(temp.path().join("Shows").is_dir());

    let events = collect(start_create_file(
        registry.clone(),
        local(&temp.path().join("Shows").join("pilot.mkv")),
    ))
    .await;
    assert_eq!(successes(&events), vec!["pilot.mkv"]);
    assert!(finished(&events).is_success());

    let events = collect(start_create_file(
        registry,
        local(&temp.path().join("Shows").join("pilot.mkv")),
    ))
    .await;
    let complete = finished(&events);
    assert_eq!(complete.failed, 1);
    assert!(successes(&events).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_copy_keeps_names_that_are_not_utf8() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    fs::create_dir(&src).unwrap();
    let raw = OsStr::from_bytes(b"caf\xE9.txt");
    fs::write(src.join(raw), b"latin-1").unwrap();
    fs::write(src.join("ok.txt"), b"ok").unwrap();
    let dest = temp.path().join("dest");

    let mut engine = TransferEngine::new(registry_with(MemoryBackend::new()), EngineConfig::default());
    let events = collect(engine.copy(vec![local(&src)], local(&dest)).unwrap()).await;

    let complete = finished(&events);
    assert!(complete.is_success(), "{:?}", complete.errors);
    assert_eq!(complete.succeeded, 3);
    assert_eq!(fs::read(dest.join("src").join(raw)).unwrap(), b"latin-1");
    assert_eq!(fs::read(dest.join("src").join("ok.txt")).unwrap(), b"ok");
}

#[tokio::test]
async fn test_failed_directory_only_skips_its_subtree() {
    let temp = TempDir::new().unwrap();
    let photos = temp.path().join("photos");
    fs::create_dir(&photos).unwrap();
    fs::write(photos.join("a.jpg"), b"jpeg").unwrap();
    fs::write(temp.path().join("notes.txt"), b"notes").unwrap();
    let dest = temp.path().join("dest");
    fs::create_dir(&dest).unwrap();
    // A plain file already sits where the directory has to go.
    fs::write(dest.join("photos"), b"not a directory").unwrap();

    let mut engine = TransferEngine::new(registry_with(MemoryBackend::new()), EngineConfig::default());
    let request = TransferRequest::copy(
        vec![local(&photos), local(&temp.path().join("notes.txt"))],
        local(&dest),
    )
    .with_overwrite(true);
    let events = collect(engine.start(request).unwrap()).await;

    let complete = finished(&events);
    assert_eq!(complete.succeeded, 1);
    assert_eq!(complete.failed, 1);
    assert_eq!(complete.errors[0].uri, local(&photos).access_path());
    assert_eq!(successes(&events), vec!["notes.txt"]);
    assert_eq!(fs::read(dest.join("notes.txt")).unwrap(), b"notes");
    assert_eq!(fs::read(dest.join("photos")).unwrap(), b"not a directory");
    assert!(photos.join("a.jpg").exists());
}

#[tokio::test]
async fn test_delete_stop_between_items_cancels() {
    let temp = TempDir::new().unwrap();
    let targets: Vec<FileUri> = (0..20)
        .map(|i| {
            let path = temp.path().join(format!("{i:02}.tmp"));
            fs::write(&path, b"x").unwrap();
            local(&path)
        })
        .collect();

    let config = EngineConfig::builder().channel_size(1usize).build().unwrap();
    let mut engine = DeleteEngine::new(registry_with(MemoryBackend::new()), config);
    let mut rx = engine.start(targets).unwrap();
    assert!(engine.is_running());

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        if matches!(event, OperationEvent::Success { .. }) {
            engine.stop();
        }
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }

    assert!(matches!(events.last(), Some(OperationEvent::Cancelled)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, OperationEvent::FatalError { .. } | OperationEvent::Finished(_))));
    let deleted = successes(&events).len();
    assert!((1..20).contains(&deleted));
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 20 - deleted);
}

fn archive_names(path: &Path) -> Vec<String> {
    let archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_compress_then_extract() {
    let temp = TempDir::new().unwrap();
    let album = temp.path().join("album");
    fs::create_dir_all(album.join("disc 2")).unwrap();
    fs::write(album.join("01.flac"), vec![7u8; 50_000]).unwrap();
    fs::write(album.join("disc 2").join("02.flac"), b"second").unwrap();
    fs::write(temp.path().join("notes.txt"), b"liner notes").unwrap();
    let archive = temp.path().join("album.zip");
    let registry = registry_with(MemoryBackend::new());

    let mut compress = CompressEngine::new(registry.clone(), EngineConfig::default());
    let sources = vec![local(&album), local(&temp.path().join("notes.txt"))];
    let events = collect(compress.start(sources, local(&archive)).unwrap()).await;

    assert!(matches!(
        events[0],
        OperationEvent::Started {
            operation: OperationType::Compress
        }
    ));
    let OperationEvent::FilesListUpdate {
        total_bytes,
        total_files,
        ..
    } = &events[1]
    else {
        panic!("expected the file list, got {:?}", events[1]);
    };
    assert_eq!((*total_bytes, *total_files), (50_017, 3));
    let complete = finished(&events);
    assert!(complete.is_success(), "{:?}", complete.errors);
    assert_eq!(complete.succeeded, 5);
    assert_eq!(complete.bytes_processed, 50_017);
    assert_eq!(
        archive_names(&archive),
        vec![
            "album/",
            "album/01.flac",
            "album/disc 2/",
            "album/disc 2/02.flac",
            "notes.txt"
        ]
    );

    let out = temp.path().join("out");
    let mut extract = ExtractEngine::new(registry.clone(), EngineConfig::default());
    let events = collect(extract.start(local(&archive), local(&out)).unwrap()).await;
    assert!(matches!(
        events[0],
        OperationEvent::Started {
            operation: OperationType::Extract
        }
    ));
    assert!(finished(&events).is_success());
    assert_eq!(fs::read(out.join("album").join("01.flac")).unwrap(), vec![7u8; 50_000]);
    assert_eq!(
        fs::read(out.join("album").join("disc 2").join("02.flac")).unwrap(),
        b"second"
    );
    assert_eq!(fs::read(out.join("notes.txt")).unwrap(), b"liner notes");

    // A second extraction into the same place picks copy names.
    let mut extract = ExtractEngine::new(registry, EngineConfig::default());
    let events = collect(extract.start(local(&archive), local(&out)).unwrap()).await;
    assert!(finished(&events).is_success());
    assert_eq!(fs::read(out.join("notes (copy).txt")).unwrap(), b"liner notes");
    assert!(out.join("album (copy)").join("disc 2").is_dir());
}

#[tokio::test]
async fn test_extract_skips_what_is_not_an_archive() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("plain.txt"), b"not a zip").unwrap();
    let good = temp.path().join("good.zip");
    {
        let mut zip = zip::ZipWriter::new(fs::File::create(&good).unwrap());
        zip.start_file("inside.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut zip, b"inside").unwrap();
        zip.finish().unwrap();
    }
    let out = temp.path().join("out");

    let mut engine = ExtractEngine::new(registry_with(MemoryBackend::new()), EngineConfig::default());
    let archives = vec![local(&temp.path().join("plain.txt")), local(&good)];
    let events = collect(engine.start(archives, local(&out)).unwrap()).await;

    let complete = finished(&events);
    assert_eq!(complete.failed, 1);
    assert_eq!(complete.succeeded, 1);
    assert_eq!(fs::read(out.join("inside.txt")).unwrap(), b"inside");
}

#[tokio::test]
async fn test_compress_refuses_existing_target_and_self_inclusion() {
    let temp = TempDir::new().unwrap();
    let docs = temp.path().join("docs");
    fs::create_dir(&docs).unwrap();
    fs::write(docs.join("a.txt"), b"a").unwrap();
    fs::write(temp.path().join("taken.zip"), b"keep me").unwrap();
    let registry = registry_with(MemoryBackend::new());

    let mut engine = CompressEngine::new(registry.clone(), EngineConfig::default());
    let events = collect(
        engine
            .start(local(&docs), local(&temp.path().join("taken.zip")))
            .unwrap(),
    )
    .await;
    assert!(matches!(
        events.last(),
        Some(OperationEvent::FatalError {
            error: FileError::AlreadyExists { .. }
        })
    ));
    assert_eq!(fs::read(temp.path().join("taken.zip")).unwrap(), b"keep me");

    let mut engine = CompressEngine::new(registry, EngineConfig::default());
    let events = collect(
        engine
            .start(local(&docs), local(&docs.join("docs.zip")))
            .unwrap(),
    )
    .await;
    assert!(matches!(
        events.last(),
        Some(OperationEvent::FatalError {
            error: FileError::TargetInsideSource { .. }
        })
    ));
    assert!(!docs.join("docs.zip").exists());
}

#[tokio::test]
async fn test_compress_stop_leaves_no_archive() {
    let memory = MemoryBackend::new()
        .remote(true)
        .with_read_delay(Duration::from_millis(2));
    memory.put("/show/e01.mkv", vec![1u8; 8 * 1024 * 1024]).unwrap();
    memory.put("/show/e02.mkv", vec![2u8; 1024]).unwrap();
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("show.zip");

    let mut engine = CompressEngine::new(registry_with(memory.clone()), EngineConfig::default());
    let mut rx = engine.start(mem("/show"), local(&archive)).unwrap();
    assert!(engine.start(mem("/show"), local(&archive)).is_none());

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        if matches!(event, OperationEvent::Progress(p) if p.file_bytes > 0) {
            engine.stop();
        }
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }

    assert!(matches!(events.last(), Some(OperationEvent::Cancelled)));
    assert!(!archive.exists());
    assert!(memory.contains("/show/e01.mkv"));
}
