//! The Manager owns the set of libraries and the shared page cache, and is
//! threaded through request handlers as application state — there are no
//! process-wide globals.

use notify::RecommendedWatcher;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::external::ExternalSearch;
use crate::index::Entry;
use crate::library::Library;
use crate::pages::PageCache;
use crate::types::{ApiError, ServerConfig, PAGE_CACHE_SIZE};
use crate::watch;

/// Owns `name → Library` plus the page cache shared by all list requests.
pub struct Manager {
    libraries: BTreeMap<String, Arc<Library>>,
    pages: tokio::sync::Mutex<PageCache>,
    /// Watcher handles; dropping one stops its watcher.
    watchers: Mutex<Vec<RecommendedWatcher>>,
}

impl Manager {
    pub fn new(
        config: &ServerConfig,
        external: Arc<dyn ExternalSearch>,
    ) -> Result<Arc<Manager>, ApiError> {
        std::fs::create_dir_all(&config.data_dir)?;

        let mut libraries = BTreeMap::new();
        for spec in &config.libraries {
            let library = Library::new(spec, &config.data_dir, Arc::clone(&external))?;
            tracing::info!(library = spec.name.as_str(), root = %spec.root.display(), "Mounted library");
            libraries.insert(spec.name.clone(), library);
        }

        Ok(Arc::new(Manager {
            libraries,
            pages: tokio::sync::Mutex::new(PageCache::new(PAGE_CACHE_SIZE)),
            watchers: Mutex::new(Vec::new()),
        }))
    }

    /// Libraries in ascending name order.
    pub fn libraries(&self) -> impl Iterator<Item = &Arc<Library>> {
        self.libraries.values()
    }

    pub fn library_for(&self, name: &str) -> Option<Arc<Library>> {
        self.libraries.get(name).cloned()
    }

    pub fn pages(&self) -> &tokio::sync::Mutex<PageCache> {
        &self.pages
    }

    /// Resolve a public POSIX path `/<library>/<rel>` to the owning library
    /// and the native path.
    pub fn resolve(&self, public: &str) -> Result<(Arc<Library>, PathBuf), ApiError> {
        if !public.starts_with('/') {
            return Err(ApiError::NotFound(format!("Path must begin with a /: {public}")));
        }
        let mut segments = public.split('/').filter(|s| !s.is_empty());
        if segments.clone().any(|s| s == "..") {
            return Err(ApiError::InvalidRequest("Invalid request".to_string()));
        }

        let Some(name) = segments.next() else {
            // The root doesn't correspond to a library.
            return Err(ApiError::InvalidRequest("Invalid request".to_string()));
        };
        let library = self
            .libraries
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("Library {name} doesn't exist")))?;

        let rel: Vec<&str> = segments.collect();
        Ok((library.clone(), library.native_path(&rel.join("/"))))
    }

    /// Synthetic directory entries for the root listing, one per library in
    /// name order.
    pub fn mountpoint_entries(&self) -> Vec<(Arc<Library>, Entry)> {
        self.libraries.values().map(|lib| (Arc::clone(lib), lib.mountpoint_entry())).collect()
    }

    /// Start change monitoring and the background update loop for every
    /// library.
    pub fn start_monitoring(&self) {
        for library in self.libraries.values() {
            if let Some((watcher, rx)) = watch::start_watcher(library.root()) {
                self.watchers.lock().unwrap().push(watcher);
                tokio::spawn(Arc::clone(library).run_change_monitor(rx));
            }
            tokio::spawn(Arc::clone(library).run_update_loop());
        }
    }
}

/// Axum application state.
#[derive(Clone)]
pub struct AppContext {
    pub manager: Arc<Manager>,
    pub start_time: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::DisabledSearch;
    use crate::types::LibrarySpec;

    fn manager(roots: &[(&str, &std::path::Path)], data: &std::path::Path) -> Arc<Manager> {
        let config = ServerConfig {
            libraries: roots
                .iter()
                .map(|(name, root)| LibrarySpec {
                    name: name.to_string(),
                    root: root.to_path_buf(),
                })
                .collect(),
            data_dir: data.to_path_buf(),
        };
        Manager::new(&config, Arc::new(DisabledSearch)).unwrap()
    }

    #[test]
    fn resolve_maps_public_paths_to_native() {
        let root = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let manager = manager(&[("pics", root.path())], data.path());

        let (lib, native) = manager.resolve("/pics/a/b.jpg").unwrap();
        assert_eq!(lib.name(), "pics");
        assert_eq!(native, root.path().join("a").join("b.jpg"));
    }

    #[test]
    fn resolve_rejects_traversal_and_unknown_libraries() {
        let root = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let manager = manager(&[("pics", root.path())], data.path());

        let err = manager.resolve("/pics/../etc/passwd").unwrap_err();
        assert_eq!(err.code(), "invalid-request");

        let err = manager.resolve("/nope/a.jpg").unwrap_err();
        assert_eq!(err.code(), "not-found");

        let err = manager.resolve("/").unwrap_err();
        assert_eq!(err.code(), "invalid-request");
    }

    #[test]
    fn mountpoints_come_in_name_order() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let manager = manager(&[("zoo", a.path()), ("art", b.path())], data.path());

        let names: Vec<String> =
            manager.mountpoint_entries().iter().map(|(_, e)| e.title.clone()).collect();
        assert_eq!(names, vec!["art", "zoo"]);
    }
}
