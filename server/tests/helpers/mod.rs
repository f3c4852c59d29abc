//! Scratch-library scaffolding for integration tests.
//!
//! Each harness owns a temp directory tree and a Manager over it, and calls
//! the API handlers directly with hand-built extractors (no subprocess, no
//! HTTP).

// Shared by every test binary; none of them uses the whole surface.
#![allow(dead_code)]

use axum::extract::{Json, Path as AxumPath, State};
use axum::http::HeaderMap;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

use viewfinder_server::api::{
    api_bookmark_add, api_bookmark_delete, api_bookmark_tags, api_illust, api_list,
    BookmarkAddRequest, ListRequest,
};
use viewfinder_server::external::{DisabledSearch, ExternalSearch, StaticSearch};
use viewfinder_server::manager::{AppContext, Manager};
use viewfinder_server::types::{LibrarySpec, ServerConfig};

pub struct TestHarness {
    pub ctx: AppContext,
    pub root: TempDir,
    data: TempDir,
    pub library: String,
}

impl TestHarness {
    pub fn new(library: &str) -> TestHarness {
        Self::with_backend(library, Arc::new(DisabledSearch))
    }

    /// A harness whose external index answers with the given paths,
    /// relative to the library root.
    pub fn with_static_search(library: &str, rel_paths: &[&str]) -> TestHarness {
        let root = TempDir::new().expect("create temp root");
        let paths: Vec<PathBuf> = rel_paths.iter().map(|p| root.path().join(p)).collect();
        Self::with_root(library, root, Arc::new(StaticSearch { paths }))
    }

    pub fn with_backend(library: &str, external: Arc<dyn ExternalSearch>) -> TestHarness {
        let root = TempDir::new().expect("create temp root");
        Self::with_root(library, root, external)
    }

    fn with_root(library: &str, root: TempDir, external: Arc<dyn ExternalSearch>) -> TestHarness {
        let data = TempDir::new().expect("create temp data dir");
        let config = ServerConfig {
            libraries: vec![LibrarySpec {
                name: library.to_string(),
                root: root.path().to_path_buf(),
            }],
            data_dir: data.path().to_path_buf(),
        };
        let manager = Manager::new(&config, external).expect("build manager");
        TestHarness {
            ctx: AppContext { manager, start_time: Instant::now() },
            root,
            data,
            library: library.to_string(),
        }
    }

    pub fn write(&self, rel: &str, contents: &[u8]) {
        let path = self.root.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(path, contents).expect("write fixture file");
    }

    pub fn mkdir(&self, rel: &str) {
        std::fs::create_dir_all(self.root.path().join(rel)).expect("create fixture dir");
    }

    pub fn lib(&self) -> Arc<viewfinder_server::library::Library> {
        self.ctx.manager.library_for(&self.library).expect("library exists")
    }

    pub async fn refresh(&self) {
        self.lib().refresh(None, true, None).await.expect("refresh");
    }

    fn native(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    pub fn indexed(&self, rel: &str) -> bool {
        self.lib().index().get(&self.native(rel).to_string_lossy()).expect("index read").is_some()
    }

    // -----------------------------------------------------------------------
    // Handler calls
    // -----------------------------------------------------------------------

    pub async fn list(&self, id: &str, req: ListRequest) -> Value {
        api_list(
            State(self.ctx.clone()),
            AxumPath(id.to_string()),
            HeaderMap::new(),
            Some(Json(req)),
        )
        .await
        .expect("list request failed")
        .0
    }

    pub async fn illust(&self, id: &str) -> Result<Value, viewfinder_server::types::ApiError> {
        api_illust(State(self.ctx.clone()), AxumPath(id.to_string()), HeaderMap::new())
            .await
            .map(|json| json.0)
    }

    pub async fn bookmark_add(&self, id: &str, tags: &[&str]) -> Value {
        let req =
            BookmarkAddRequest { tags: Some(tags.iter().map(|t| t.to_string()).collect()) };
        api_bookmark_add(State(self.ctx.clone()), AxumPath(id.to_string()), Some(Json(req)))
            .await
            .expect("bookmark add failed")
            .0
    }

    pub async fn bookmark_delete(&self, id: &str) -> Value {
        api_bookmark_delete(State(self.ctx.clone()), AxumPath(id.to_string()))
            .await
            .expect("bookmark delete failed")
            .0
    }

    pub async fn bookmark_tags(&self) -> Value {
        api_bookmark_tags(State(self.ctx.clone())).await.expect("bookmark tags failed").0
    }

    pub fn sidecar_path(&self, dir_rel: &str) -> PathBuf {
        let dir = if dir_rel.is_empty() {
            self.root.path().to_path_buf()
        } else {
            self.root.path().join(dir_rel)
        };
        dir.join(viewfinder_server::types::SIDECAR_FILENAME)
    }
}

/// Result IDs from a list page, in order.
pub fn result_ids(page: &Value) -> Vec<String> {
    page["results"]
        .as_array()
        .expect("results array")
        .iter()
        .map(|r| r["id"].as_str().expect("id").to_string())
        .collect()
}

pub fn page_uuid(page: &Value, which: &str) -> Option<String> {
    page["pages"][which].as_str().map(|s| s.to_string())
}
