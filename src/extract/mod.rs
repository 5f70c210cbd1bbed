//! Document text extraction
//!
//! Each supported format family has a handler; the registry tries handlers
//! in priority order and the first one that accepts a file wins. Files no
//! handler accepts are skipped by callers, never treated as errors.

mod epub;
mod office;
mod text;

pub use epub::EpubHandler;
pub use office::OfficeHandler;
pub use text::TextHandler;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Extraction failure taxonomy.
///
/// `PasswordProtected` is distinguished so callers can log it differently
/// from ordinary corruption; both still record an `error` status.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("document is password protected: {}", path.display())]
    PasswordProtected { path: PathBuf },

    #[error("invalid document {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    pub fn invalid(path: &Path, reason: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_password_protected(&self) -> bool {
        matches!(self, Self::PasswordProtected { .. })
    }
}

/// Map a format library's error message onto the extraction taxonomy,
/// surfacing encryption as the password-protected variant.
pub(crate) fn classify_error(path: &Path, message: String) -> ExtractError {
    let lower = message.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractError::PasswordProtected {
            path: path.to_path_buf(),
        }
    } else {
        ExtractError::Invalid {
            path: path.to_path_buf(),
            reason: message,
        }
    }
}

/// Metadata extracted alongside document text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,
}

impl DocumentMetadata {
    /// Base metadata from the filesystem; format handlers enrich it.
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let meta = fs::metadata(path).map_err(|e| ExtractError::io(path, e))?;
        Ok(Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_size: meta.len(),
            file_type: file_extension(path).unwrap_or_default(),
            title: None,
            author: None,
            language: None,
        })
    }
}

/// Lowercased extension without the dot, if any.
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// A format-family extractor.
///
/// `can_handle` is the capability test: the file exists, fits under the
/// handler's size limit, and carries a supported extension. `extract_text`
/// may still fail on corrupt or password-protected content.
pub trait DocumentHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Supported extensions, lowercase, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    fn max_file_size(&self) -> u64;

    fn can_handle(&self, path: &Path) -> bool {
        let Ok(meta) = fs::metadata(path) else {
            return false;
        };
        if !meta.is_file() || meta.len() > self.max_file_size() {
            return false;
        }
        match file_extension(path) {
            Some(ext) => self.extensions().contains(&ext.as_str()),
            None => false,
        }
    }

    fn extract_text(&self, path: &Path) -> Result<(String, DocumentMetadata), ExtractError>;
}

/// Ordered set of handlers; first match wins.
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn DocumentHandler>>,
}

impl HandlerRegistry {
    pub fn new(handlers: Vec<Box<dyn DocumentHandler>>) -> Self {
        Self { handlers }
    }

    /// Default priority order: office formats, plain text family, EPUB.
    pub fn with_defaults(max_file_size: u64) -> Self {
        Self::new(vec![
            Box::new(OfficeHandler::new(max_file_size)),
            Box::new(TextHandler::new(max_file_size)),
            Box::new(EpubHandler::new(max_file_size)),
        ])
    }

    /// First handler whose capability test accepts the file.
    pub fn find_handler(&self, path: &Path) -> Option<&dyn DocumentHandler> {
        self.handlers
            .iter()
            .map(|h| h.as_ref())
            .find(|h| h.can_handle(path))
    }

    /// Whether the path's extension belongs to any handler. Used by the
    /// watcher to filter events without touching the filesystem.
    pub fn is_supported(&self, path: &Path) -> bool {
        match file_extension(path) {
            Some(ext) => self
                .handlers
                .iter()
                .any(|h| h.extensions().contains(&ext.as_str())),
            None => false,
        }
    }

    pub fn supported_extensions(&self) -> HashSet<&'static str> {
        self.handlers
            .iter()
            .flat_map(|h| h.extensions().iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "plain text").unwrap();

        let registry = HandlerRegistry::with_defaults(10 * 1024 * 1024);
        let handler = registry.find_handler(&path).unwrap();
        assert_eq!(handler.name(), "text");
    }

    #[test]
    fn test_no_handler_for_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binary.bin");
        std::fs::write(&path, [0u8; 8]).unwrap();

        let registry = HandlerRegistry::with_defaults(10 * 1024 * 1024);
        assert!(registry.find_handler(&path).is_none());
        assert!(!registry.is_supported(&path));
    }

    #[test]
    fn test_size_limit_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "0123456789").unwrap();

        let registry = HandlerRegistry::with_defaults(5);
        assert!(registry.find_handler(&path).is_none());
        // Extension support is independent of size
        assert!(registry.is_supported(&path));
    }

    #[test]
    fn test_missing_file_rejected_by_capability() {
        let registry = HandlerRegistry::with_defaults(10 * 1024 * 1024);
        assert!(registry
            .find_handler(Path::new("/nonexistent/gone.txt"))
            .is_none());
    }

    #[test]
    fn test_supported_extensions_union() {
        let registry = HandlerRegistry::with_defaults(10 * 1024 * 1024);
        let exts = registry.supported_extensions();
        for ext in [
            "pdf", "docx", "xlsx", "pptx", "txt", "md", "markdown", "json", "epub",
        ] {
            assert!(exts.contains(ext), "missing {ext}");
        }
    }
}
