//! External content-index interface.
//!
//! Where the OS provides a content index, searches consult it before the
//! library's own index: it already knows about the bulk of plain image
//! files, which the library deliberately doesn't track. The backend is
//! opaque; unsupported filters may be silently dropped, and failures degrade
//! a search to index-only results.

use std::path::{Path, PathBuf};

use crate::types::{ApiError, MediaType};

/// Filters a backend may apply. Backends are free to ignore any of them;
/// the library re-checks nothing and only deduplicates by path.
#[derive(Clone, Debug, Default)]
pub struct ExternalQuery {
    /// Case-insensitive filename substring.
    pub substr: Option<String>,
    pub media_type: Option<MediaType>,
    /// When false, only direct children of the search root are wanted.
    pub recursive: bool,
}

/// An OS-provided content index, consulted in addition to the FileIndex.
pub trait ExternalSearch: Send + Sync {
    /// Whether the backend can currently answer queries.
    fn available(&self) -> bool;

    /// Paths matching the query, in the backend's native order.
    fn search(
        &self,
        root: &Path,
        query: &ExternalQuery,
    ) -> Result<Box<dyn Iterator<Item = PathBuf> + Send>, ApiError>;
}

/// The no-backend backend: never available, never returns results. Used on
/// platforms without a content index and when external search is disabled.
pub struct DisabledSearch;

impl ExternalSearch for DisabledSearch {
    fn available(&self) -> bool {
        false
    }

    fn search(
        &self,
        _root: &Path,
        _query: &ExternalQuery,
    ) -> Result<Box<dyn Iterator<Item = PathBuf> + Send>, ApiError> {
        Ok(Box::new(std::iter::empty()))
    }
}

/// A backend answering from a fixed path list. Deterministic stand-in for a
/// real OS index, used by tests.
pub struct StaticSearch {
    pub paths: Vec<PathBuf>,
}

impl ExternalSearch for StaticSearch {
    fn available(&self) -> bool {
        true
    }

    fn search(
        &self,
        root: &Path,
        query: &ExternalQuery,
    ) -> Result<Box<dyn Iterator<Item = PathBuf> + Send>, ApiError> {
        let root = root.to_path_buf();
        let substr = query.substr.as_ref().map(|s| s.to_lowercase());
        let recursive = query.recursive;
        let hits: Vec<PathBuf> = self
            .paths
            .iter()
            .filter(|p| {
                if recursive {
                    p.starts_with(&root) && **p != root
                } else {
                    p.parent() == Some(root.as_path())
                }
            })
            .filter(|p| match &substr {
                Some(s) => p
                    .file_name()
                    .map(|n| n.to_string_lossy().to_lowercase().contains(s.as_str()))
                    .unwrap_or(false),
                None => true,
            })
            .cloned()
            .collect();
        Ok(Box::new(hits.into_iter()))
    }
}
