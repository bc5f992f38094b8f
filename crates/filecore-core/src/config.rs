//! Engine configuration types.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{FileError, FileResult};
use crate::uri::FileUri;

/// Default number of bytes moved per read/write round.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Default number of chunks between two progress events.
pub const DEFAULT_PROGRESS_EVERY: u32 = 8;

/// Default capacity of event channels.
pub const DEFAULT_CHANNEL_SIZE: usize = 100;

/// Local directories that must never be deleted, renamed, moved or overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtectedPaths(Vec<PathBuf>);

impl ProtectedPaths {
    pub fn new(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self(paths.into_iter().map(Into::into).collect())
    }

    /// No protection at all.
    pub fn none() -> Self {
        Self(Vec::new())
    }

    /// The storage root and the standard media directories of this host.
    pub fn standard() -> Self {
        let mut paths = Vec::new();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join("DCIM"));
            paths.push(dirs::audio_dir().unwrap_or_else(|| home.join("Music")));
            paths.push(dirs::picture_dir().unwrap_or_else(|| home.join("Pictures")));
            paths.push(dirs::video_dir().unwrap_or_else(|| home.join("Movies")));
            paths.push(home);
        }
        paths.dedup();
        Self(paths)
    }

    /// Whether `path` is exactly one of the protected directories.
    pub fn contains_path(&self, path: &Path) -> bool {
        let trimmed = trim_trailing_separator(path);
        self.0
            .iter()
            .any(|protected| trim_trailing_separator(protected) == trimmed)
    }

    /// Whether `uri` names a protected local directory. Non-local URIs never do.
    pub fn contains(&self, uri: &FileUri) -> bool {
        if !uri.is_local() {
            return false;
        }
        uri.to_file_path()
            .map(|path| self.contains_path(&path))
            .unwrap_or(false)
    }

    /// Fail with [`FileError::ProtectedPath`] when `uri` is protected.
    pub fn check(&self, uri: &FileUri) -> FileResult<()> {
        if self.contains(uri) {
            return Err(FileError::ProtectedPath {
                uri: uri.access_path(),
            });
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn trim_trailing_separator(path: &Path) -> &Path {
    let raw = path.as_os_str().to_str().unwrap_or_default();
    if raw.len() > 1 && raw.ends_with('/') {
        Path::new(raw.trim_end_matches('/'))
    } else {
        path
    }
}

/// Configuration shared by the transfer, delete and listing engines.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Word used in collision suffixes: "name (copy)", "name (copy 2)".
    #[builder(default = "default_copy_word()")]
    #[serde(default = "default_copy_word")]
    pub copy_word: String,

    /// Prefix prepended to every top-level target name.
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    pub target_prefix: Option<String>,

    /// Bytes per streamed chunk.
    #[builder(default = "DEFAULT_CHUNK_SIZE")]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunks between byte-progress events.
    #[builder(default = "DEFAULT_PROGRESS_EVERY")]
    #[serde(default = "default_progress_every")]
    pub progress_every: u32,

    /// Capacity of the event channel.
    #[builder(default = "DEFAULT_CHANNEL_SIZE")]
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,

    /// Abort the whole operation on the first per-file failure.
    #[builder(default = "false")]
    #[serde(default)]
    pub stop_on_error: bool,

    /// Directories that operations refuse to touch.
    #[builder(default = "ProtectedPaths::standard()")]
    #[serde(default = "ProtectedPaths::standard")]
    pub protected: ProtectedPaths,
}

fn default_copy_word() -> String {
    "copy".to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_progress_every() -> u32 {
    DEFAULT_PROGRESS_EVERY
}

fn default_channel_size() -> usize {
    DEFAULT_CHANNEL_SIZE
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref word) = self.copy_word {
            check_copy_word(word)?;
        }
        if self.chunk_size == Some(0) {
            return Err("Chunk size must be positive".to_string());
        }
        if self.progress_every == Some(0) {
            return Err("Progress interval must be positive".to_string());
        }
        if self.channel_size == Some(0) {
            return Err("Channel size must be positive".to_string());
        }
        Ok(())
    }
}

fn check_copy_word(word: &str) -> Result<(), String> {
    if word.trim().is_empty() {
        return Err("Copy word cannot be empty".to_string());
    }
    if word.contains(['(', ')', '/']) {
        return Err("Copy word cannot contain parentheses or slashes".to_string());
    }
    Ok(())
}

impl EngineConfig {
    /// Create a new engine config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Load a TOML configuration file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> FileResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| FileError::InvalidConfig {
            message: format!("{}: {e}", path.display()),
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| FileError::InvalidConfig {
            message: format!("{}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate a config that was built by hand or deserialized.
    pub fn validate(&self) -> FileResult<()> {
        let invalid = |message: String| FileError::InvalidConfig { message };
        check_copy_word(&self.copy_word).map_err(invalid)?;
        if self.chunk_size == 0 || self.progress_every == 0 || self.channel_size == 0 {
            return Err(invalid(
                "chunk_size, progress_every and channel_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            copy_word: default_copy_word(),
            target_prefix: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_every: DEFAULT_PROGRESS_EVERY,
            channel_size: DEFAULT_CHANNEL_SIZE,
            stop_on_error: false,
            protected: ProtectedPaths::standard(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::builder()
            .copy_word("kopie")
            .target_prefix("backup-")
            .chunk_size(1024usize)
            .protected(ProtectedPaths::none())
            .build()
            .unwrap();

        assert_eq!(config.copy_word, "kopie");
        assert_eq!(config.target_prefix.as_deref(), Some("backup-"));
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.progress_every, DEFAULT_PROGRESS_EVERY);
        assert!(config.protected.is_empty());
    }

    #[test]
    fn test_builder_rejects_bad_values() {
        assert!(EngineConfig::builder().copy_word("  ").build().is_err());
        assert!(EngineConfig::builder().chunk_size(0usize).build().is_err());
        assert!(EngineConfig::builder().copy_word("a(b").build().is_err());
    }

    #[test]
    fn test_protected_paths() {
        let protected = ProtectedPaths::new(["/home/me/DCIM", "/home/me/"]);
        assert!(protected.contains_path(Path::new("/home/me/DCIM/")));
        assert!(protected.contains_path(Path::new("/home/me")));
        assert!(!protected.contains_path(Path::new("/home/me/DCIM/2024")));

        let uri = FileUri::parse("/home/me/DCIM").unwrap();
        assert!(matches!(
            protected.check(&uri),
            Err(FileError::ProtectedPath { .. })
        ));
        let remote = FileUri::parse("smb://nas/home/me/DCIM/").unwrap();
        assert!(protected.check(&remote).is_ok());
    }

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }
}
