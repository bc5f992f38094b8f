//! Listing options: filters and sort order.

use std::cmp::Ordering;
use std::time::Duration;

use derive_builder::Builder;
use filecore_core::FileHandle;
use serde::{Deserialize, Serialize};

/// Field a listing is sorted by.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SortKey {
    #[default]
    Uri,
    Name,
    Size,
    Date,
}

/// Order of entries within the directory and file groups of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::EnumIter)]
pub enum SortOrder {
    #[default]
    UriAsc,
    UriDesc,
    NameAsc,
    NameDesc,
    SizeAsc,
    SizeDesc,
    DateAsc,
    DateDesc,
}

impl SortOrder {
    pub fn new(key: SortKey, descending: bool) -> Self {
        match (key, descending) {
            (SortKey::Uri, false) => Self::UriAsc,
            (SortKey::Uri, true) => Self::UriDesc,
            (SortKey::Name, false) => Self::NameAsc,
            (SortKey::Name, true) => Self::NameDesc,
            (SortKey::Size, false) => Self::SizeAsc,
            (SortKey::Size, true) => Self::SizeDesc,
            (SortKey::Date, false) => Self::DateAsc,
            (SortKey::Date, true) => Self::DateDesc,
        }
    }

    pub fn key(&self) -> SortKey {
        match self {
            Self::UriAsc | Self::UriDesc => SortKey::Uri,
            Self::NameAsc | Self::NameDesc => SortKey::Name,
            Self::SizeAsc | Self::SizeDesc => SortKey::Size,
            Self::DateAsc | Self::DateDesc => SortKey::Date,
        }
    }

    pub fn is_descending(&self) -> bool {
        matches!(
            self,
            Self::UriDesc | Self::NameDesc | Self::SizeDesc | Self::DateDesc
        )
    }

    /// Compare two entries of the same group.
    ///
    /// Directories have no meaningful size, so size ordering falls back to
    /// URI ordering for them.
    pub fn compare(&self, a: &FileHandle, b: &FileHandle) -> Ordering {
        let ordering = match self.key() {
            SortKey::Uri => compare_uri(a, b),
            SortKey::Name => compare_ignore_case(&a.name, &b.name),
            SortKey::Size if a.is_dir() => compare_uri(a, b),
            SortKey::Size => a.length().cmp(&b.length()),
            SortKey::Date => a.modified.cmp(&b.modified),
        };
        if self.is_descending() {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

fn compare_uri(a: &FileHandle, b: &FileHandle) -> Ordering {
    compare_ignore_case(&a.access_path(), &b.access_path())
}

fn compare_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// What to keep and how to order a directory listing.
#[derive(Debug, Clone, Default, Builder)]
#[builder(setter(into), default, build_fn(validate = "Self::validate"))]
pub struct ListingOptions {
    /// Keep only files with one of these extensions (case-insensitive, no dot).
    pub extensions: Vec<String>,

    /// Keep only files whose guessed MIME type starts with one of these.
    pub mime_prefixes: Vec<String>,

    pub sort: SortOrder,

    /// Give up and report a time-out after this long.
    #[builder(setter(strip_option))]
    pub timeout: Option<Duration>,

    /// Keep dot-files and dot-directories.
    pub keep_hidden: bool,
}

impl ListingOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(Some(timeout)) = self.timeout {
            if timeout.is_zero() {
                return Err("Timeout must be positive".to_string());
            }
        }
        Ok(())
    }
}

impl ListingOptions {
    /// Create a new listing options builder.
    pub fn builder() -> ListingOptionsBuilder {
        ListingOptionsBuilder::default()
    }

    /// Whether `handle` survives the filters.
    ///
    /// Extension and MIME filters only apply to files; a file passes when it
    /// matches any active filter.
    pub fn keep(&self, handle: &FileHandle) -> bool {
        if is_pseudo_share(&handle.name) {
            return false;
        }
        if handle.is_hidden() && !self.keep_hidden {
            return false;
        }
        if handle.is_dir() {
            return true;
        }

        let extension_filtered = self.extensions.iter().any(|e| !e.is_empty());
        let mime_filtered = self.mime_prefixes.iter().any(|m| !m.is_empty());
        if !extension_filtered && !mime_filtered {
            return true;
        }

        let extension = handle.extension();
        if let Some(ref ext) = extension {
            if self
                .extensions
                .iter()
                .any(|filter| !filter.is_empty() && filter.eq_ignore_ascii_case(ext))
            {
                return true;
            }
        }

        if mime_filtered {
            if let Some(mime) = mime_guess::from_path(handle.name.as_str()).first_raw() {
                if self
                    .mime_prefixes
                    .iter()
                    .any(|prefix| !prefix.is_empty() && mime.starts_with(prefix.as_str()))
                {
                    return true;
                }
            }
        }
        false
    }

    /// Filter and order a raw listing: directories first, then files.
    pub fn apply(&self, entries: Vec<FileHandle>) -> Vec<FileHandle> {
        let (mut dirs, mut files): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .filter(|h| self.keep(h))
            .partition(FileHandle::is_dir);
        dirs.sort_by(|a, b| self.sort.compare(a, b));
        files.sort_by(|a, b| self.sort.compare(a, b));
        dirs.extend(files);
        dirs
    }
}

/// SMB administrative shares that are never worth showing.
fn is_pseudo_share(name: &str) -> bool {
    let name = name.trim_end_matches('/');
    name.eq_ignore_ascii_case("IPC$") || name.eq_ignore_ascii_case("print$")
}
