//! Error taxonomy shared by every backend and engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across filecore.
pub type FileResult<T> = Result<T, FileError>;

/// Errors surfaced by backends and operation engines.
///
/// URIs carried in errors are always the credential-free access path.
#[derive(Debug, Error)]
pub enum FileError {
    /// The file or directory does not exist.
    #[error("Not found: {uri}")]
    NotFound { uri: String },

    /// Permission denied for a path.
    #[error("Permission denied: {uri}")]
    PermissionDenied { uri: String },

    /// The backend needs (new) credentials before anything can proceed.
    #[error("Authentication required: {uri}")]
    AuthenticationRequired { uri: String },

    /// The remote host could not be reached.
    #[error("Host unreachable: {host}")]
    HostUnreachable { host: String },

    /// A network operation timed out.
    #[error("Timed out: {uri}")]
    Timeout { uri: String },

    /// The target volume does not have room for the file.
    #[error("Not enough space for {uri}: {required} bytes needed, {available} available")]
    InsufficientSpace {
        uri: String,
        required: u64,
        available: u64,
    },

    /// No backend is registered for this URI scheme.
    #[error("Unsupported scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    /// The backend does not implement this capability.
    #[error("{operation} is not supported for {uri}")]
    Unsupported {
        operation: &'static str,
        uri: String,
    },

    /// The path is one of the protected media roots.
    #[error("Protected path cannot be modified: {uri}")]
    ProtectedPath { uri: String },

    /// The target already exists.
    #[error("Already exists: {uri}")]
    AlreadyExists { uri: String },

    /// A copy or move target lies inside its own source.
    #[error("Cannot copy or move {uri} into itself")]
    TargetInsideSource { uri: String },

    /// The input could not be parsed as a URI.
    #[error("Invalid URI '{input}': {message}")]
    InvalidUri { input: String, message: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// A file name failed validation.
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic I/O error.
    #[error("I/O error at {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl FileError {
    /// Create an I/O error with URI context, mapping well-known kinds onto the taxonomy.
    pub fn io(uri: impl std::fmt::Display, source: std::io::Error) -> Self {
        let uri = uri.to_string();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { uri },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { uri },
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists { uri },
            std::io::ErrorKind::TimedOut => Self::Timeout { uri },
            std::io::ErrorKind::HostUnreachable
            | std::io::ErrorKind::NetworkUnreachable
            | std::io::ErrorKind::ConnectionRefused => Self::HostUnreachable { host: uri },
            _ => Self::Io { uri, source },
        }
    }

    /// Create an unsupported-capability error.
    pub fn unsupported(operation: &'static str, uri: impl std::fmt::Display) -> Self {
        Self::Unsupported {
            operation,
            uri: uri.to_string(),
        }
    }

    /// Create a free-form error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Coarse classification used to pick a user-facing message.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PermissionDenied { .. } | Self::ProtectedPath { .. } => {
                ErrorKind::PermissionDenied
            }
            Self::AuthenticationRequired { .. } => ErrorKind::AuthenticationRequired,
            Self::HostUnreachable { .. } => ErrorKind::HostUnreachable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InsufficientSpace { .. } => ErrorKind::InsufficientSpace,
            Self::UnsupportedScheme { .. } => ErrorKind::UnsupportedScheme,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Unsupported { .. }
            | Self::AlreadyExists { .. }
            | Self::TargetInsideSource { .. }
            | Self::InvalidUri { .. }
            | Self::InvalidConfig { .. }
            | Self::InvalidName { .. }
            | Self::Io { .. }
            | Self::Other { .. } => ErrorKind::Unknown,
        }
    }

    /// Whether nothing meaningful can proceed until new credentials are supplied.
    pub fn needs_credentials(&self) -> bool {
        matches!(self, Self::AuthenticationRequired { .. })
    }
}

/// Coarse error classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIter,
)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    AuthenticationRequired,
    HostUnreachable,
    Timeout,
    InsufficientSpace,
    UnsupportedScheme,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// Human-readable message for this kind of failure.
    pub fn message(&self) -> &'static str {
        match self {
            Self::NotFound => "File not found",
            Self::PermissionDenied => "You do not have permission to access this file",
            Self::AuthenticationRequired => "Credentials are required to access this server",
            Self::HostUnreachable => "The server could not be reached",
            Self::Timeout => "The server did not answer in time",
            Self::InsufficientSpace => "Not enough free space on the target",
            Self::UnsupportedScheme => "This kind of location is not supported",
            Self::Cancelled => "The operation was cancelled",
            Self::Unknown => "An error occurred while accessing the file",
        }
    }
}
