//! Scheme-to-backend dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use filecore_core::{FileError, FileHandle, FileResult, FileUri, ProtectedPaths};

use crate::archive::ZipBackend;
use crate::backend::Backend;
use crate::local::LocalBackend;
use crate::media::MediaIndex;

/// Maps URI schemes to the backend that serves them.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry serving `file` and `zip`.
    pub fn with_defaults(media: Arc<dyn MediaIndex>, protected: ProtectedPaths) -> Self {
        let mut registry = Self::new();
        registry.register("file", Arc::new(LocalBackend::new(media, protected)));
        registry.register("zip", Arc::new(ZipBackend::new()));
        registry
    }

    /// Serve `scheme` with `backend`, replacing any previous registration.
    pub fn register(&mut self, scheme: &str, backend: Arc<dyn Backend>) {
        tracing::debug!(scheme, kind = %backend.kind(), "registering backend");
        self.backends.insert(scheme.to_ascii_lowercase(), backend);
    }

    /// The backend for `uri`'s scheme.
    pub fn backend_for(&self, uri: &FileUri) -> FileResult<Arc<dyn Backend>> {
        self.backends
            .get(uri.scheme())
            .cloned()
            .ok_or_else(|| FileError::UnsupportedScheme {
                scheme: uri.scheme().to_string(),
            })
    }

    /// Resolve a handle for `uri`.
    pub fn resolve(&self, uri: &FileUri) -> FileResult<FileHandle> {
        self.backend_for(uri)?.stat(uri)
    }

    /// Whether both URIs are served by the same backend instance.
    pub fn same_backend(&self, a: &FileUri, b: &FileUri) -> bool {
        match (self.backends.get(a.scheme()), self.backends.get(b.scheme())) {
            (Some(x), Some(y)) => Arc::ptr_eq(x, y),
            _ => false,
        }
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::NoopMediaIndex;
    use crate::memory::MemoryBackend;
    use filecore_core::{BackendKind, ErrorKind};

    #[test]
    fn test_unknown_scheme_is_hard_error() {
        let registry = BackendRegistry::with_defaults(Arc::new(NoopMediaIndex), ProtectedPaths::none());
        let uri = FileUri::parse("smb://nas/share/").unwrap();
        let err = registry.resolve(&uri).unwrap_err();
        assert!(matches!(err, FileError::UnsupportedScheme { ref scheme } if scheme == "smb"));
        assert_eq!(err.kind(), ErrorKind::UnsupportedScheme);
    }

    #[test]
    fn test_registration_and_identity() {
        let mut registry = BackendRegistry::new();
        let memory = Arc::new(MemoryBackend::new());
        registry.register("MEM", memory);

        let a = FileUri::parse("mem://vol/a").unwrap();
        let b = FileUri::parse("mem://vol/b").unwrap();
        assert!(registry.same_backend(&a, &b));
        assert_eq!(registry.backend_for(&a).unwrap().kind(), BackendKind::Memory);
        assert_eq!(registry.schemes(), vec!["mem"]);

        let local = FileUri::parse("/tmp").unwrap();
        assert!(!registry.same_backend(&a, &local));
    }
}
