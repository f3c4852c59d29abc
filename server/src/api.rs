//! HTTP API handlers for the Viewfinder web client.
//!
//! Routes serve illust info, paginated listings and searches, bookmark
//! edits, and the bookmark-tag summary as JSON. IDs look like
//! `file:/library/path/inside` and arrive through wildcard route params.

use axum::extract::{Json, Path as AxumPath, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::index::Entry;
use crate::library::{default_list_sort, Library, LibrarySearch, SearchParams};
use crate::manager::AppContext;
use crate::media::{is_image_mime, is_video_mime};
use crate::pages::{CacheEntry, ResultStream, StreamPage};
use crate::paths::VPath;
use crate::types::{ApiError, MediaType, DEFAULT_PAGE_LIMIT};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn join_error(e: tokio::task::JoinError) -> ApiError {
    ApiError::Internal(format!("worker task failed: {e}"))
}

/// `http://host` for building absolute media URLs.
fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

/// Split `file:/library/rel` into the scheme and the public path.
fn split_id(id: &str) -> Result<(&str, String), ApiError> {
    let (scheme, path) = id
        .split_once(':')
        .ok_or_else(|| ApiError::InvalidRequest(format!("Invalid id: {id}")))?;
    if scheme != "file" && scheme != "folder" {
        return Err(ApiError::InvalidRequest(format!("Invalid id type: {scheme}")));
    }
    if !path.starts_with('/') {
        return Err(ApiError::NotFound(format!("Path must begin with a /: {path}")));
    }
    Ok((scheme, path.to_string()))
}

/// Percent-encode an ID for use inside a URL, preserving colons and slashes.
fn encode_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for b in id.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' | b':' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// ISO-8601 UTC timestamp from epoch seconds.
fn iso_utc(epoch: f64) -> String {
    chrono::DateTime::from_timestamp(epoch as i64, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
}

// ---------------------------------------------------------------------------
// IllustInfo
// ---------------------------------------------------------------------------

/// Bookmark info in the shape the client shares with its other backends.
fn bookmark_data(entry: &Entry) -> Value {
    if !entry.bookmarked {
        return Value::Null;
    }
    let tags: Vec<&str> = entry.bookmark_tags.split_whitespace().collect();
    json!({ "tags": tags, "private": false })
}

/// Build the client-facing info dictionary for an entry. `None` for files
/// of kinds the client can't display.
pub fn illust_info(library: &Library, entry: &Entry, base_url: &str) -> Option<Value> {
    let public = library.public_path(Path::new(&entry.path))?;
    let scheme = if entry.is_directory { "folder" } else { "file" };
    let illust_id = format!("{scheme}:{public}");
    let encoded = encode_id(&illust_id);

    let image_url = format!("{base_url}/file/{encoded}");
    let thumb_url = format!("{base_url}/thumb/{encoded}");
    let poster_url = format!("{base_url}/poster/{encoded}");
    let mjpeg_url = format!("{base_url}/mjpeg-zip/{encoded}");

    if entry.is_directory {
        // ZIP directories drop their extension in the title.
        let mut title = entry.title.clone();
        if title.to_ascii_lowercase().ends_with(".zip") {
            title.truncate(title.len() - 4);
        }
        return Some(json!({
            "id": illust_id,
            "localPath": entry.path,
            "illustTitle": title,
            "createDate": iso_utc(entry.ctime),
            "bookmarkData": bookmark_data(entry),
            "previewUrls": [thumb_url],
            "userId": -1,
            "tagList": [],
        }));
    }

    // Pixiv uses 0 for images and 2 for its frame-archive animation format.
    // Videos get the string "video": more meaningful, and it can't collide
    // with future numeric types.
    let illust_type: Value = if entry.animation {
        json!(2)
    } else if is_image_mime(&entry.mime_type) {
        json!(0)
    } else if is_video_mime(&entry.mime_type) {
        json!("video")
    } else {
        return None;
    };

    let mut urls = serde_json::Map::new();
    // Animations are fetched as frame archives; their "original" is the
    // poster frame.
    let original = if entry.animation { poster_url.clone() } else { image_url };
    urls.insert("original".to_string(), json!(original));
    urls.insert("small".to_string(), json!(thumb_url));
    if is_video_mime(&entry.mime_type) || entry.animation {
        urls.insert("poster".to_string(), json!(poster_url));
    }
    if entry.animation {
        urls.insert("mjpeg_zip".to_string(), json!(mjpeg_url));
    }

    let tags: Vec<&str> = entry.tags.split_whitespace().collect();
    let mut info = json!({
        "id": illust_id,
        "localPath": entry.path,
        "illustTitle": entry.title,
        "illustType": illust_type,
        // -1 marks "no user"; null would be awkward for a client that
        // treats user IDs as strings or ints interchangeably.
        "userId": -1,
        "userName": entry.author,
        "illustComment": entry.comment,
        "createDate": iso_utc(entry.ctime),
        "width": entry.width,
        "height": entry.height,
        "tagList": tags,
        "bookmarkData": bookmark_data(entry),
        "previewUrls": [thumb_url],
        "urls": urls,
    });
    if let Some(duration) = entry.duration {
        info["duration"] = json!(duration);
    }
    Some(info)
}

// ---------------------------------------------------------------------------
// List request
// ---------------------------------------------------------------------------

/// Scalar-or-pair range parameter: `5` means `[5, 5]`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RangeParam {
    Scalar(f64),
    Range(Vec<f64>),
}

impl RangeParam {
    fn to_range(&self) -> Option<(f64, f64)> {
        match self {
            RangeParam::Scalar(v) => Some((*v, *v)),
            RangeParam::Range(values) => {
                if values.len() == 2 {
                    Some((values[0], values[1]))
                } else {
                    tracing::debug!(?values, "Invalid range parameter, ignoring");
                    None
                }
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListRequest {
    pub search: Option<String>,
    pub bookmarked: Option<bool>,
    pub bookmark_tags: Option<String>,
    pub media_type: Option<String>,
    pub total_pixels: Option<RangeParam>,
    pub aspect_ratio: Option<RangeParam>,
    pub order: Option<String>,
    pub skip: Option<i64>,
    pub page: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub directories_only: bool,
}

impl ListRequest {
    fn params(&self) -> SearchParams {
        let has_filters = self.has_filters();
        let sort = match self.order.as_deref() {
            Some(order) if !order.is_empty() => crate::index::Sort::parse(order),
            // Plain listings read best in name order.
            _ if !has_filters => default_list_sort(),
            _ => crate::index::Sort::default(),
        };
        SearchParams {
            substr: self.search.clone(),
            bookmarked: self.bookmarked,
            bookmark_tags: self.bookmark_tags.clone(),
            media_type: self.media_type.as_deref().and_then(MediaType::parse),
            total_pixels: self.total_pixels.as_ref().and_then(RangeParam::to_range),
            aspect_ratio: self.aspect_ratio.as_ref().and_then(RangeParam::to_range),
            include_files: !self.directories_only,
            include_dirs: true,
            sort,
        }
    }

    fn has_filters(&self) -> bool {
        self.search.is_some()
            || self.bookmarked.is_some()
            || self.bookmark_tags.is_some()
            || self.media_type.is_some()
            || self.total_pixels.is_some()
            || self.aspect_ratio.is_some()
    }
}

// ---------------------------------------------------------------------------
// List stream
// ---------------------------------------------------------------------------

fn page_value(results: Vec<Value>, has_next: bool) -> StreamPage {
    let result_count = results.len();
    StreamPage {
        value: json!({ "success": true, "next": has_next, "results": results }),
        result_count,
        has_next,
    }
}

/// The lazy page producer behind `/list`: one or more per-library searches
/// drained in order, converted to IllustInfo, sliced into `limit`-sized
/// pages. Exhausted streams keep yielding empty last pages.
pub struct ListStream {
    sources: VecDeque<LibrarySearch>,
    base_url: String,
    limit: usize,
    /// Sidebar mode: no files, and everything in one unpaginated page.
    directories_only: bool,
    /// Pre-built single page for the root listing.
    mountpoints: Option<Vec<Value>>,
    finished: bool,
}

impl ResultStream for ListStream {
    fn next_page(&mut self) -> Result<StreamPage, ApiError> {
        if let Some(infos) = self.mountpoints.take() {
            self.finished = true;
            return Ok(page_value(infos, false));
        }
        if self.finished {
            return Ok(page_value(Vec::new(), false));
        }

        let mut infos = Vec::new();
        let mut has_next = false;
        'sources: while let Some(source) = self.sources.front_mut() {
            let want = if self.directories_only { 512 } else { self.limit - infos.len() };
            let batch = source.next_batch(want)?;
            if batch.is_empty() {
                self.sources.pop_front();
                continue;
            }
            let library = Arc::clone(source.library());
            for entry in batch {
                if let Some(info) = illust_info(&library, &entry, &self.base_url) {
                    infos.push(info);
                }
                if !self.directories_only && infos.len() >= self.limit {
                    has_next = true;
                    break 'sources;
                }
            }
        }

        if !has_next {
            self.finished = true;
        }
        Ok(page_value(infos, has_next))
    }
}

// ---------------------------------------------------------------------------
// Page-serving protocol
// ---------------------------------------------------------------------------

/// Serve one page of a cached or fresh result stream.
///
/// A materialized page replays verbatim. A suspended page resumes its
/// stream. Anything else starts fresh and honors `skip` by discarding whole
/// pages. Every page produced along the way is cached under its UUID, with
/// the suspended stream re-cached under the next page's UUID.
pub async fn serve_page(
    ctx: &AppContext,
    page: Option<String>,
    skip: i64,
    build: impl FnOnce() -> Result<Box<dyn ResultStream>, ApiError>,
) -> Result<Value, ApiError> {
    let mut cache = ctx.manager.pages().lock().await;

    if let Some(uuid) = &page {
        if let Some(value) = cache.replay(uuid) {
            return Ok(value);
        }
    }

    let resumed = page.and_then(|uuid| cache.take_suspended(&uuid).map(|entry| (uuid, entry)));
    let (mut this_uuid, mut prev_uuid, mut offset, mut skip, mut stream) = match resumed {
        Some((uuid, (stream, prev, next_offset))) => (uuid, prev, next_offset, 0, stream),
        None => (Uuid::new_v4().to_string(), None, 0, skip, build()?),
    };

    loop {
        let (returned, result) = tokio::task::spawn_blocking(move || {
            let result = stream.next_page();
            (stream, result)
        })
        .await
        .map_err(join_error)?;
        stream = returned;
        let StreamPage { mut value, result_count, has_next } = result?;

        let next_uuid = if has_next { Some(Uuid::new_v4().to_string()) } else { None };
        value["pages"] = json!({ "this": this_uuid, "prev": prev_uuid, "next": next_uuid });
        value["offset"] = json!(offset);
        value["next_offset"] = json!(offset + result_count);
        offset += result_count;

        cache.insert(this_uuid.clone(), CacheEntry::Materialized(value.clone()));
        skip -= result_count as i64;

        match next_uuid {
            // Still skipping whole pages; keep pulling.
            Some(next) if skip >= 0 => {
                prev_uuid = Some(this_uuid);
                this_uuid = next;
            }
            Some(next) => {
                cache.insert(
                    next,
                    CacheEntry::Suspended { stream, prev: Some(this_uuid), next_offset: offset },
                );
                return Ok(value);
            }
            None => return Ok(value),
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Server status, version, library count, and uptime.
pub async fn api_health(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "libraries": ctx.manager.libraries().count(),
        "uptime_seconds": ctx.start_time.elapsed().as_secs(),
    }))
}

/// Info for a single file or directory.
pub async fn api_illust(
    State(ctx): State<AppContext>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let (_, public) = split_id(&id)?;
    let (library, native) = ctx.manager.resolve(&public)?;
    let base = base_url(&headers);

    let lib = Arc::clone(&library);
    let entry = tokio::task::spawn_blocking(move || {
        let vp = VPath::from_native(&native);
        lib.get(&vp, false)
    })
    .await
    .map_err(join_error)??
    .ok_or_else(|| ApiError::NotFound("File not in library".to_string()))?;

    let info = illust_info(&library, &entry, &base)
        .ok_or_else(|| ApiError::NotFound("File not in library".to_string()))?;
    Ok(Json(json!({ "success": true, "illust": info })))
}

/// Files and folders inside a folder, or a recursive filtered search, as
/// resumable pages.
pub async fn api_list(
    State(ctx): State<AppContext>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    body: Option<Json<ListRequest>>,
) -> Result<Json<Value>, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let (_, public) = split_id(&id)?;
    let base = base_url(&headers);

    let params = req.params();
    let has_filters = req.has_filters();
    let limit = req.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, 1000);
    let skip = req.skip.unwrap_or(0).max(0);
    let directories_only = req.directories_only;

    let manager = Arc::clone(&ctx.manager);
    let build = move || -> Result<Box<dyn ResultStream>, ApiError> {
        // The bare root with no filters lists the mounts themselves.
        if public == "/" && !has_filters {
            let infos = manager
                .mountpoint_entries()
                .iter()
                .filter_map(|(lib, entry)| illust_info(lib, entry, &base))
                .collect();
            return Ok(Box::new(ListStream {
                sources: VecDeque::new(),
                base_url: base,
                limit,
                directories_only,
                mountpoints: Some(infos),
                finished: false,
            }));
        }

        let mut scopes: Vec<(Arc<Library>, Option<std::path::PathBuf>)> = Vec::new();
        if public == "/" {
            // A root search fans out across every library.
            for library in manager.libraries() {
                scopes.push((Arc::clone(library), None));
            }
        } else {
            let (library, native) = manager.resolve(&public)?;
            scopes.push((library, Some(native)));
        }

        let sources = scopes
            .into_iter()
            .map(|(library, scope)| {
                if has_filters {
                    library.search(scope, params.clone())
                } else {
                    library.list(scope, params.clone())
                }
            })
            .collect();

        Ok(Box::new(ListStream {
            sources,
            base_url: base,
            limit,
            directories_only,
            mountpoints: None,
            finished: false,
        }))
    };

    let value = serve_page(&ctx, req.page.clone(), skip, build).await?;
    Ok(Json(value))
}

#[derive(Debug, Default, Deserialize)]
pub struct BookmarkAddRequest {
    pub tags: Option<Vec<String>>,
}

/// Add or edit a bookmark.
pub async fn api_bookmark_add(
    State(ctx): State<AppContext>,
    AxumPath(id): AxumPath<String>,
    body: Option<Json<BookmarkAddRequest>>,
) -> Result<Json<Value>, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let (_, public) = split_id(&id)?;
    let (library, native) = ctx.manager.resolve(&public)?;

    let entry = tokio::task::spawn_blocking(move || {
        let vp = VPath::from_native(&native);
        library.bookmark_edit(&vp, true, req.tags.as_deref())
    })
    .await
    .map_err(join_error)??;

    Ok(Json(json!({ "success": true, "bookmark": bookmark_data(&entry) })))
}

/// Remove a bookmark.
pub async fn api_bookmark_delete(
    State(ctx): State<AppContext>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Value>, ApiError> {
    let (_, public) = split_id(&id)?;
    let (library, native) = ctx.manager.resolve(&public)?;

    tokio::task::spawn_blocking(move || {
        let vp = VPath::from_native(&native);
        library.bookmark_edit(&vp, false, None)
    })
    .await
    .map_err(join_error)??;

    Ok(Json(json!({ "success": true })))
}

/// All bookmark tags with their bookmark counts, across every library.
pub async fn api_bookmark_tags(State(ctx): State<AppContext>) -> Result<Json<Value>, ApiError> {
    let manager = Arc::clone(&ctx.manager);
    let tags = tokio::task::spawn_blocking(move || -> Result<BTreeMap<String, usize>, ApiError> {
        let mut all: BTreeMap<String, usize> = BTreeMap::new();
        for library in manager.libraries() {
            for (tag, count) in library.index().get_all_bookmark_tags()? {
                *all.entry(tag).or_insert(0) += count;
            }
        }
        Ok(all)
    })
    .await
    .map_err(join_error)??;

    Ok(Json(json!({ "success": true, "tags": tags })))
}

/// Reveal a path in the OS file manager. Best-effort: a missing file
/// manager is not an error the client can act on.
pub async fn api_view(
    State(ctx): State<AppContext>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Value>, ApiError> {
    let (_, public) = split_id(&id)?;
    let (_, native) = ctx.manager.resolve(&public)?;

    if let Err(e) = reveal_in_file_manager(&native) {
        tracing::warn!(path = %native.display(), error = %e, "Could not open file manager");
    }
    Ok(Json(json!({ "success": true })))
}

#[cfg(target_os = "windows")]
fn reveal_in_file_manager(path: &Path) -> std::io::Result<()> {
    std::process::Command::new("explorer").arg("/select,").arg(path).spawn()?;
    Ok(())
}

#[cfg(target_os = "macos")]
fn reveal_in_file_manager(path: &Path) -> std::io::Result<()> {
    std::process::Command::new("open").arg("-R").arg(path).spawn()?;
    Ok(())
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn reveal_in_file_manager(path: &Path) -> std::io::Result<()> {
    let target = if path.is_dir() { path } else { path.parent().unwrap_or(path) };
    std::process::Command::new("xdg-open").arg(target).spawn()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_id_preserves_colons_and_slashes() {
        assert_eq!(encode_id("file:/pics/a b.jpg"), "file:/pics/a%20b.jpg");
        assert_eq!(encode_id("folder:/pics/ü"), "folder:/pics/%C3%BC");
    }

    #[test]
    fn split_id_validates_scheme_and_path() {
        assert_eq!(split_id("file:/pics/a.jpg").unwrap().1, "/pics/a.jpg");
        assert_eq!(split_id("folder:/pics").unwrap().0, "folder");
        assert!(split_id("pics/a.jpg").is_err());
        assert!(split_id("http:/pics/a.jpg").is_err());
        assert!(split_id("file:pics").is_err());
    }

    #[test]
    fn iso_utc_formats_epoch() {
        assert_eq!(iso_utc(0.0), "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn range_param_broadens_scalars() {
        assert_eq!(RangeParam::Scalar(5.0).to_range(), Some((5.0, 5.0)));
        assert_eq!(RangeParam::Range(vec![1.0, 2.0]).to_range(), Some((1.0, 2.0)));
        assert_eq!(RangeParam::Range(vec![1.0]).to_range(), None);
    }

    #[test]
    fn bookmark_data_shape() {
        let mut entry = Entry { bookmarked: true, ..Entry::default() };
        entry.bookmark_tags = "x y".to_string();
        assert_eq!(bookmark_data(&entry), json!({ "tags": ["x", "y"], "private": false }));

        entry.bookmarked = false;
        assert_eq!(bookmark_data(&entry), Value::Null);
    }
}
