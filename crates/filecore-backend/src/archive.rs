//! Read-only zip archive backend.
//!
//! URIs look like `zip:///path/to/archive.zip/inner/dir/file.txt`: the archive
//! is the first path prefix that is a regular file on local storage, the rest
//! names a member.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, NaiveDate, Utc};
use filecore_core::{BackendKind, EntryKind, FileError, FileHandle, FileResult, FileUri};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::backend::{Backend, InputStream, OutputStream};

/// Serves members of zip archives stored on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipBackend;

/// One archive member as seen by this backend.
#[derive(Debug, Clone)]
struct Member {
    is_dir: bool,
    size: u64,
    modified: Option<SystemTime>,
}

impl ZipBackend {
    pub fn new() -> Self {
        Self
    }

    /// Split `uri` into the archive file and the member path inside it.
    fn locate(uri: &FileUri) -> FileResult<(PathBuf, String)> {
        let decoded = uri.decoded_path();
        let segments: Vec<&str> = decoded.split('/').filter(|s| !s.is_empty()).collect();

        let mut archive = PathBuf::from("/");
        for (i, segment) in segments.iter().enumerate() {
            archive.push(segment);
            if archive.is_file() {
                return Ok((archive, segments[i + 1..].join("/")));
            }
        }
        Err(FileError::NotFound {
            uri: uri.access_path(),
        })
    }

    fn open_archive(uri: &FileUri, archive: &PathBuf) -> FileResult<ZipArchive<BufReader<File>>> {
        let file = File::open(archive).map_err(|e| FileError::io(uri, e))?;
        ZipArchive::new(BufReader::new(file)).map_err(|e| zip_error(uri, e))
    }

    /// Every member of the archive, keyed by its path without trailing `/`.
    /// Directories implied by nested names are synthesized.
    fn members(uri: &FileUri, archive: &PathBuf) -> FileResult<BTreeMap<String, Member>> {
        let mut zip = Self::open_archive(uri, archive)?;
        let mut members = BTreeMap::new();

        for i in 0..zip.len() {
            let entry = zip.by_index(i).map_err(|e| zip_error(uri, e))?;
            let name = entry.name().trim_matches('/').to_string();
            if name.is_empty() {
                continue;
            }

            let mut parent = name.as_str();
            while let Some((head, _)) = parent.rsplit_once('/') {
                members.entry(head.to_string()).or_insert(Member {
                    is_dir: true,
                    size: 0,
                    modified: None,
                });
                parent = head;
            }

            members.insert(
                name,
                Member {
                    is_dir: entry.is_dir(),
                    size: if entry.is_dir() { 0 } else { entry.size() },
                    modified: entry.last_modified().and_then(to_system_time),
                },
            );
        }
        Ok(members)
    }

    fn handle(uri: FileUri, member: &Member) -> FileHandle {
        let kind = if member.is_dir {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let mut handle = FileHandle::new(uri, kind, BackendKind::Zip)
            .with_size(member.size)
            .with_access(true, false);
        if let Some(modified) = member.modified {
            handle = handle.with_modified(modified);
        }
        handle
    }
}

fn to_system_time(dt: zip::DateTime) -> Option<SystemTime> {
    let naive = NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)?
        .and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32)?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).into())
}

fn zip_error(uri: &FileUri, error: ZipError) -> FileError {
    match error {
        ZipError::Io(e) => FileError::io(uri, e),
        ZipError::FileNotFound => FileError::NotFound {
            uri: uri.access_path(),
        },
        other => FileError::other(format!("{uri}: {other}")),
    }
}

impl Backend for ZipBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Zip
    }

    fn stat(&self, uri: &FileUri) -> FileResult<FileHandle> {
        let (archive, member) = Self::locate(uri)?;
        if member.is_empty() {
            let root = Member {
                is_dir: true,
                size: 0,
                modified: None,
            };
            return Ok(Self::handle(uri.clone(), &root));
        }
        let members = Self::members(uri, &archive)?;
        members
            .get(&member)
            .map(|m| Self::handle(uri.clone(), m))
            .ok_or_else(|| FileError::NotFound {
                uri: uri.access_path(),
            })
    }

    fn list(&self, uri: &FileUri) -> FileResult<Vec<FileHandle>> {
        let (archive, member) = Self::locate(uri)?;
        let members = Self::members(uri, &archive)?;

        if !member.is_empty() {
            match members.get(&member) {
                Some(m) if m.is_dir => {}
                Some(_) => {
                    return Err(FileError::io(
                        uri,
                        std::io::Error::from(std::io::ErrorKind::NotADirectory),
                    ));
                }
                None => {
                    return Err(FileError::NotFound {
                        uri: uri.access_path(),
                    });
                }
            }
        }

        let prefix = if member.is_empty() {
            String::new()
        } else {
            format!("{member}/")
        };

        let mut children = Vec::new();
        for (name, entry) in members.range(prefix.clone()..) {
            let Some(relative) = name.strip_prefix(&prefix) else {
                break;
            };
            if relative.is_empty() || relative.contains('/') {
                continue;
            }
            children.push(Self::handle(uri.child(relative)?, entry));
        }
        Ok(children)
    }

    fn open_read(&self, uri: &FileUri, offset: u64) -> FileResult<InputStream> {
        let (archive, member) = Self::locate(uri)?;
        let mut zip = Self::open_archive(uri, &archive)?;
        let mut entry = zip.by_name(&member).map_err(|e| zip_error(uri, e))?;
        if entry.is_dir() {
            return Err(FileError::unsupported("read of a directory", uri));
        }

        // Members are compressed streams, so seeking means inflating everything.
        let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry
            .read_to_end(&mut data)
            .map_err(|e| FileError::io(uri, e))?;
        let mut cursor = Cursor::new(data);
        cursor.set_position(offset);
        Ok(Box::new(cursor))
    }

    fn open_write(&self, uri: &FileUri) -> FileResult<OutputStream> {
        Err(FileError::unsupported("write", uri))
    }

    fn mkdir(&self, uri: &FileUri) -> FileResult<()> {
        Err(FileError::unsupported("mkdir", uri))
    }

    fn create_file(&self, uri: &FileUri) -> FileResult<()> {
        Err(FileError::unsupported("create", uri))
    }

    fn delete(&self, uri: &FileUri) -> FileResult<()> {
        Err(FileError::unsupported("delete", uri))
    }

    fn delete_tree(&self, uri: &FileUri) -> FileResult<()> {
        Err(FileError::unsupported("delete", uri))
    }

    fn rename(&self, uri: &FileUri, _new_name: &str) -> FileResult<FileUri> {
        Err(FileError::unsupported("rename", uri))
    }
}
