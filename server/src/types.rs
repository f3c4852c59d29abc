//! Shared types: server configuration, the API error taxonomy, and tuning
//! constants used across the index and update loop.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Per-directory metadata sidecar filename. Change events for this file are
/// never indexed.
pub const SIDECAR_FILENAME: &str = ".ppixivbookmark.json.txt";

/// Maximum number of cached list pages before the oldest is evicted.
pub const PAGE_CACHE_SIZE: usize = 10;

/// Default `/list` page size when the client doesn't send `limit`.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// How long a file must be quiet after its last change event before it is
/// re-read.
pub const FILE_UPDATE_DEBOUNCE: Duration = Duration::from_secs(1);

/// Idle interval after which the update loop persists the last-update
/// timestamp.
pub const IDLE_WRITE_INTERVAL: Duration = Duration::from_secs(600);

/// Refresh progress callbacks fire every this many entries.
pub const PROGRESS_INTERVAL: u64 = 25_000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// A named mount: requests under `/<name>/...` resolve into `root`.
#[derive(Clone, Debug)]
pub struct LibrarySpec {
    pub name: String,
    pub root: PathBuf,
}

/// Runtime configuration assembled from CLI flags and the optional TOML
/// config file.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub libraries: Vec<LibrarySpec>,
    /// Directory holding one `<library>.sqlite` per mount.
    pub data_dir: PathBuf,
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    libraries: toml::Table,
    data_dir: Option<PathBuf>,
}

/// Parse a `[libraries]` TOML config file into library specs. Entries whose
/// path doesn't exist are skipped with a warning rather than failing startup.
pub fn parse_libraries_toml(path: &Path) -> (Vec<LibrarySpec>, Option<PathBuf>) {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(config = %path.display(), error = %e, "Could not read config file");
            return (Vec::new(), None);
        }
    };

    let parsed: ConfigFile = match toml::from_str(&content) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(config = %path.display(), error = %e, "Could not parse config file");
            return (Vec::new(), None);
        }
    };

    let mut specs = Vec::new();
    for (name, value) in &parsed.libraries {
        let Some(raw) = value.as_str() else {
            tracing::warn!(library = name.as_str(), "Library path must be a string");
            continue;
        };
        match PathBuf::from(raw).canonicalize() {
            Ok(root) => specs.push(LibrarySpec { name: name.clone(), root }),
            Err(e) => {
                tracing::warn!(library = name.as_str(), path = raw, error = %e, "Library path not found, skipping");
            }
        }
    }
    (specs, parsed.data_dir)
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Errors propagated over HTTP as `{success:false, code, message}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The external content index failed. Soft: searches degrade to
    /// index-only results and this never reaches a client on its own.
    #[error("{0}")]
    BackendUnavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid-request",
            Self::NotFound(_) => "not-found",
            Self::Io(_) => "io",
            Self::BackendUnavailable(_) => "backend-unavailable",
            Self::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Io(_) | Self::BackendUnavailable(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Internal(format!("database error: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "code": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Media types
// ---------------------------------------------------------------------------

/// Coarse media classification used by search filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" | "images" => Some(Self::Image),
            "video" | "videos" => Some(Self::Video),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

/// Seconds since the epoch as a float, matching on-disk stat precision.
pub fn epoch_secs(t: SystemTime) -> f64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}
