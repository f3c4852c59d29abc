//! A single indexed library: one named root directory, its index database,
//! and the machinery that keeps the two in agreement.
//!
//! The index deliberately doesn't track plain image files with no user
//! metadata — the external content index already knows about those, and they
//! dominate most collections. Everything else (videos, directories,
//! archives, anything bookmarked) is reconciled here, either by an explicit
//! refresh walk or by live change events funneled through a debounced
//! update loop.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::external::{ExternalQuery, ExternalSearch};
use crate::index::{Entry, FileIndex, IndexWriter, SearchMode, SearchOptions, Sort, SortOrder};
use crate::media;
use crate::paths::{VPath, VStat};
use crate::sidecar::{self, FileMeta};
use crate::types::{
    epoch_secs, ApiError, LibrarySpec, FILE_UPDATE_DEBOUNCE, IDLE_WRITE_INTERVAL,
    PROGRESS_INTERVAL, SIDECAR_FILENAME,
};
use crate::watch::{ChangeAction, ChangeEvent};

/// Progress callback for long refreshes; called with the running entry
/// count.
pub type Progress = Arc<dyn Fn(u64) + Send + Sync>;

// ---------------------------------------------------------------------------
// RefreshEvent
// ---------------------------------------------------------------------------

/// Single-producer single-consumer wakeup: `set` wakes the next `wait`,
/// multiple sets before a wait collapse to one wakeup.
pub struct RefreshEvent {
    flag: Mutex<bool>,
    notify: Notify,
}

impl Default for RefreshEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshEvent {
    pub fn new() -> Self {
        Self { flag: Mutex::new(false), notify: Notify::new() }
    }

    pub fn set(&self) {
        *self.flag.lock().unwrap() = true;
        self.notify.notify_one();
    }

    pub fn clear(&self) {
        *self.flag.lock().unwrap() = false;
    }

    /// Wait for a signal or the timeout, whichever comes first. Returns
    /// whether a signal arrived.
    pub async fn wait(&self, timeout: Duration) -> bool {
        {
            let mut flag = self.flag.lock().unwrap();
            if *flag {
                *flag = false;
                return true;
            }
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        let mut flag = self.flag.lock().unwrap();
        std::mem::take(&mut *flag)
    }
}

// ---------------------------------------------------------------------------
// Search parameters
// ---------------------------------------------------------------------------

/// Client-facing search filters, shared by `search` and `list`.
#[derive(Clone, Debug)]
pub struct SearchParams {
    pub substr: Option<String>,
    pub bookmarked: Option<bool>,
    /// Whitespace-separated; every tag must match.
    pub bookmark_tags: Option<String>,
    pub media_type: Option<crate::types::MediaType>,
    pub total_pixels: Option<(f64, f64)>,
    pub aspect_ratio: Option<(f64, f64)>,
    pub include_files: bool,
    pub include_dirs: bool,
    pub sort: Sort,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            substr: None,
            bookmarked: None,
            bookmark_tags: None,
            media_type: None,
            total_pixels: None,
            aspect_ratio: None,
            include_files: true,
            include_dirs: true,
            sort: Sort::default(),
        }
    }
}

impl SearchParams {
    /// Whether any filter is active (as opposed to a plain listing).
    pub fn has_filters(&self) -> bool {
        self.substr.is_some()
            || self.bookmarked.is_some()
            || self.bookmark_tags.is_some()
            || self.media_type.is_some()
            || self.total_pixels.is_some()
            || self.aspect_ratio.is_some()
    }

    fn uses_bookmark_data(&self) -> bool {
        self.bookmarked.is_some() || self.bookmark_tags.is_some()
    }
}

/// How a path came to need reconciling.
#[derive(Clone, Debug)]
pub enum ReconcileAction {
    /// Visited by an explicit refresh walk.
    Refresh,
    Added,
    Modified,
    Removed,
    Renamed { old_path: PathBuf },
    RenamedOldName,
}

// ---------------------------------------------------------------------------
// Library
// ---------------------------------------------------------------------------

struct Pending {
    dirs: BTreeSet<PathBuf>,
    files: HashMap<PathBuf, Instant>,
}

/// A named mount: `(name, root, FileIndex)` plus the pending-work state for
/// its background update loop.
pub struct Library {
    name: String,
    root: PathBuf,
    index: Arc<FileIndex>,
    external: Arc<dyn ExternalSearch>,
    pending: Mutex<Pending>,
    refresh_event: RefreshEvent,
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("name", &self.name)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Library {
    pub fn new(
        spec: &LibrarySpec,
        data_dir: &Path,
        external: Arc<dyn ExternalSearch>,
    ) -> Result<Arc<Library>, ApiError> {
        let db_path = data_dir.join(format!("{}.sqlite", spec.name));
        let index = Arc::new(FileIndex::open(&db_path)?);

        if let Some(last) = index.get_last_update_time()? {
            let offline = epoch_secs(SystemTime::now()) - last;
            info!(
                library = spec.name.as_str(),
                offline_secs = offline as u64,
                "Opened existing index"
            );
        }

        Ok(Arc::new(Library {
            name: spec.name.clone(),
            root: spec.root.clone(),
            index,
            external,
            pending: Mutex::new(Pending { dirs: BTreeSet::new(), files: HashMap::new() }),
            refresh_event: RefreshEvent::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &Arc<FileIndex> {
        &self.index
    }

    // -----------------------------------------------------------------------
    // Path translation
    // -----------------------------------------------------------------------

    /// Map a native path under this library's root to its public POSIX form,
    /// `/<name>/<relative>`. `None` for paths outside the root.
    pub fn public_path(&self, native: &Path) -> Option<String> {
        let rel = native.strip_prefix(&self.root).ok()?;
        let mut out = format!("/{}", self.name);
        for comp in rel.components() {
            out.push('/');
            out.push_str(&comp.as_os_str().to_string_lossy());
        }
        Some(out)
    }

    /// Map a public relative path (POSIX, already stripped of the library
    /// name) back to native form.
    pub fn native_path(&self, rel_posix: &str) -> PathBuf {
        let mut out = self.root.clone();
        for seg in rel_posix.split('/').filter(|s| !s.is_empty()) {
            out.push(seg);
        }
        out
    }

    fn contains(&self, native: &Path) -> bool {
        native.starts_with(&self.root)
    }

    fn native_str(path: &VPath) -> String {
        path.native().to_string_lossy().into_owned()
    }

    /// The synthetic directory entry representing this mount in a root
    /// listing.
    pub fn mountpoint_entry(&self) -> Entry {
        Entry {
            path: self.root.to_string_lossy().into_owned(),
            parent: String::new(),
            is_directory: true,
            ctime: 0.0,
            mtime: 0.0,
            mime_type: "application/folder".to_string(),
            title: self.name.clone(),
            ..Entry::default()
        }
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    fn build_record(&self, path: &VPath, stat: &VStat, meta: &FileMeta) -> Entry {
        let native = Self::native_str(path);
        let parent = path
            .parent()
            .map(|p| Self::native_str(&p))
            .unwrap_or_default();

        if stat.is_dir && !media::is_animation_zip(path) {
            return Entry {
                path: native,
                parent,
                is_directory: true,
                ctime: stat.ctime,
                mtime: stat.mtime,
                mime_type: "application/folder".to_string(),
                title: path.name(),
                bookmarked: meta.bookmarked,
                bookmark_tags: if meta.bookmarked { meta.bookmark_tags.clone() } else { String::new() },
                ..Entry::default()
            };
        }

        let info = media::probe(path);
        Entry {
            path: native,
            parent,
            is_directory: false,
            ctime: stat.ctime,
            mtime: stat.mtime,
            mime_type: info.mime_type,
            title: info.title,
            author: info.author,
            comment: info.comment,
            tags: info.tags,
            width: info.width,
            height: info.height,
            duration: info.duration,
            animation: info.animation,
            bookmarked: meta.bookmarked,
            bookmark_tags: if meta.bookmarked { meta.bookmark_tags.clone() } else { String::new() },
        }
    }

    fn populate(&self, writer: &IndexWriter<'_>, path: &VPath) -> Result<Option<Entry>, ApiError> {
        let native = Self::native_str(path);
        let Ok(stat) = path.stat() else {
            writer.delete_recursively(std::slice::from_ref(&native))?;
            return Ok(None);
        };
        let meta = sidecar::load_file(path);
        let entry = self.build_record(path, &stat, &meta);
        writer.add_record(&entry)?;
        Ok(Some(entry))
    }

    /// Entry for a path, populating the index on miss. `force_refresh`
    /// re-reads unconditionally. `None` for paths outside the root or gone
    /// from disk.
    pub fn get(&self, path: &VPath, force_refresh: bool) -> Result<Option<Entry>, ApiError> {
        let native = path.native();
        if !self.contains(&native) {
            return Ok(None);
        }

        if !force_refresh {
            if let Some(entry) = self.index.get(&native.to_string_lossy())? {
                return Ok(Some(entry));
            }
        }

        let writer = self.index.begin()?;
        let entry = self.populate(&writer, path)?;
        writer.commit()?;
        Ok(entry)
    }

    // -----------------------------------------------------------------------
    // Reconcile
    // -----------------------------------------------------------------------

    /// Bring one path's index row into agreement with its on-disk state.
    /// The single entry point for both refresh walks and live events.
    ///
    /// `sidecar_meta` carries the already-loaded sidecar entry during a
    /// refresh; `None` loads it on demand.
    pub fn reconcile(
        &self,
        path: &VPath,
        action: ReconcileAction,
        sidecar_meta: Option<FileMeta>,
        writer: &IndexWriter<'_>,
    ) -> Result<(), ApiError> {
        if path.name() == SIDECAR_FILENAME {
            return Ok(());
        }
        let native = Self::native_str(path);

        let action = match action {
            ReconcileAction::Renamed { old_path } => {
                let old = old_path.to_string_lossy().into_owned();
                if writer.get(&old)?.is_some() {
                    writer.rename(&old, &native)?;
                    return Ok(());
                }
                // Old path was never indexed; index the new one from scratch.
                ReconcileAction::Added
            }
            other => other,
        };

        if matches!(&action, ReconcileAction::Removed | ReconcileAction::RenamedOldName) {
            writer.delete_recursively(std::slice::from_ref(&native))?;
            return Ok(());
        }

        let Ok(stat) = path.stat() else {
            // Raced with a delete; drop whatever we had.
            writer.delete_recursively(std::slice::from_ref(&native))?;
            return Ok(());
        };
        let is_dir = stat.is_dir && !media::is_animation_zip(path);
        let meta = match sidecar_meta {
            Some(m) => m,
            None => sidecar::load_file(path),
        };

        if is_dir {
            let entry = self.build_record(path, &stat, &meta);
            writer.add_record(&entry)?;
            if matches!(&action, ReconcileAction::Added | ReconcileAction::Modified) {
                // Live event: contents are indexed by a background refresh.
                self.queue_dir_refresh(path.native());
            }
            return Ok(());
        }

        let mime = media::mime_from_name(&path.name());
        if media::is_image_mime(&mime) && meta.is_empty() {
            // Plain images stay out of the index; the external content index
            // handles them.
            writer.delete_recursively(std::slice::from_ref(&native))?;
            return Ok(());
        }

        if let Some(db) = writer.get(&native)? {
            if (db.mtime - stat.mtime).abs() < 1.0 {
                return Ok(());
            }
        }

        let entry = self.build_record(path, &stat, &meta);
        writer.add_record(&entry)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// Walk the tree under `path` (the root when `None`) and reconcile every
    /// entry. One transaction per directory; control returns to the runtime
    /// between directories. Returns the number of entries visited.
    pub async fn refresh(
        self: &Arc<Self>,
        path: Option<PathBuf>,
        recurse: bool,
        progress: Option<Progress>,
    ) -> Result<u64, ApiError> {
        let start = path.unwrap_or_else(|| self.root.clone());
        if !self.contains(&start) {
            return Err(ApiError::InvalidRequest(format!(
                "{} is not inside library {}",
                start.display(),
                self.name
            )));
        }

        let started = Instant::now();
        let mut queue: VecDeque<VPath> = VecDeque::from([VPath::from_native(&start)]);
        let mut count: u64 = 0;
        let mut reported: u64 = 0;

        while let Some(dir) = queue.pop_front() {
            let lib = Arc::clone(self);
            let dir_for_task = dir.clone();
            let result = tokio::task::spawn_blocking(move || lib.refresh_directory(&dir_for_task))
                .await
                .map_err(|e| ApiError::Internal(format!("refresh task failed: {e}")))?;

            match result {
                Ok((subdirs, n)) => {
                    count += n;
                    if recurse {
                        queue.extend(subdirs);
                    }
                }
                Err(e) => {
                    warn!(library = self.name.as_str(), dir = %dir, error = %e, "Could not refresh directory");
                }
            }

            if let Some(progress) = &progress {
                if count / PROGRESS_INTERVAL > reported {
                    reported = count / PROGRESS_INTERVAL;
                    progress(count);
                }
            }
        }

        if let Some(progress) = &progress {
            progress(count);
        }
        debug!(
            library = self.name.as_str(),
            entries = count,
            time_ms = started.elapsed().as_millis() as u64,
            "Refresh complete"
        );
        Ok(count)
    }

    /// Reconcile one directory's direct children in a single transaction,
    /// sweeping entries that no longer exist on disk. Returns the
    /// subdirectories found (for the caller's queue) and the entry count.
    fn refresh_directory(&self, dir: &VPath) -> Result<(Vec<VPath>, u64), ApiError> {
        let writer = self.index.begin()?;
        let sidecar_map = sidecar::load(dir);
        let dir_native = Self::native_str(dir);

        let mut stale: HashSet<String> = writer.child_paths(&dir_native)?.into_iter().collect();
        let mut subdirs = Vec::new();
        let mut count: u64 = 0;

        for child in dir.iterdir()? {
            count += 1;
            stale.remove(&Self::native_str(&child));

            let is_subdir = child.is_dir() && !media::is_animation_zip(&child);
            let meta = if is_subdir {
                None // directory metadata lives in its own sidecar under "."
            } else {
                Some(sidecar_map.get(&child.name()).cloned().unwrap_or_default())
            };

            if let Err(e) = self.reconcile(&child, ReconcileAction::Refresh, meta, &writer) {
                warn!(path = %child, error = %e, "Failed to reconcile entry, leaving index row unchanged");
            }
            if is_subdir {
                subdirs.push(child);
            }
        }

        let stale: Vec<String> = stale.into_iter().collect();
        writer.delete_recursively(&stale)?;
        writer.commit()?;
        Ok((subdirs, count))
    }

    // -----------------------------------------------------------------------
    // Live updates
    // -----------------------------------------------------------------------

    /// Queue a directory for a background recursive refresh.
    pub fn queue_dir_refresh(&self, path: PathBuf) {
        self.pending.lock().unwrap().dirs.insert(path);
        self.refresh_event.set();
    }

    /// Queue a file re-read, debounced: the deadline moves forward on every
    /// new event for the same path.
    pub fn queue_file_update(&self, path: PathBuf) {
        self.pending.lock().unwrap().files.insert(path, Instant::now() + FILE_UPDATE_DEBOUNCE);
        self.refresh_event.set();
    }

    /// Apply one change event. Deletions and renames hit the index
    /// immediately; additions and modifications are deferred through the
    /// debounce queues.
    pub fn apply_change(&self, event: ChangeEvent) -> Result<(), ApiError> {
        let path = VPath::from_native(&event.path);
        if path.name() == SIDECAR_FILENAME {
            return Ok(());
        }

        match event.action {
            ChangeAction::Removed => self.with_writer(|w| {
                self.reconcile(&path, ReconcileAction::Removed, None, w)
            }),
            ChangeAction::RenamedOldName => self.with_writer(|w| {
                self.reconcile(&path, ReconcileAction::RenamedOldName, None, w)
            }),
            ChangeAction::Renamed => {
                let Some(old_path) = event.old_path.clone() else {
                    return self.with_writer(|w| {
                        self.reconcile(&path, ReconcileAction::Added, None, w)
                    });
                };
                self.with_writer(|w| {
                    self.reconcile(&path, ReconcileAction::Renamed { old_path }, None, w)
                })
            }
            ChangeAction::Added | ChangeAction::Modified => {
                if path.is_dir() && !media::is_animation_zip(&path) {
                    let action = match event.action {
                        ChangeAction::Added => ReconcileAction::Added,
                        _ => ReconcileAction::Modified,
                    };
                    self.with_writer(|w| self.reconcile(&path, action, None, w))
                } else {
                    self.queue_file_update(event.path);
                    Ok(())
                }
            }
        }
    }

    fn with_writer(
        &self,
        f: impl FnOnce(&IndexWriter<'_>) -> Result<(), ApiError>,
    ) -> Result<(), ApiError> {
        let writer = self.index.begin()?;
        f(&writer)?;
        writer.commit()
    }

    fn process_file_update(&self, path: &Path) -> Result<(), ApiError> {
        let vp = VPath::from_native(path);
        self.with_writer(|w| self.reconcile(&vp, ReconcileAction::Modified, None, w))
    }

    /// Earliest pending file deadline, if any.
    fn next_deadline(&self) -> Option<Instant> {
        self.pending.lock().unwrap().files.values().min().copied()
    }

    /// Drain all currently due work: queued directory refreshes, then files
    /// whose debounce window has passed. Returns whether anything ran.
    async fn drain_pending(self: &Arc<Self>) -> Result<bool, ApiError> {
        let mut did_work = false;
        loop {
            let dirs: Vec<PathBuf> = {
                let mut pending = self.pending.lock().unwrap();
                std::mem::take(&mut pending.dirs).into_iter().collect()
            };
            let now = Instant::now();
            let ready: Vec<PathBuf> = {
                let mut pending = self.pending.lock().unwrap();
                let due: Vec<PathBuf> = pending
                    .files
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(p, _)| p.clone())
                    .collect();
                for p in &due {
                    pending.files.remove(p);
                }
                due
            };
            if dirs.is_empty() && ready.is_empty() {
                return Ok(did_work);
            }
            did_work = true;

            for dir in dirs {
                debug!(library = self.name.as_str(), dir = %dir.display(), "Background refresh");
                if let Err(e) = self.refresh(Some(dir), true, None).await {
                    warn!(library = self.name.as_str(), error = %e, "Background refresh failed");
                }
            }

            for file in ready {
                debug!(library = self.name.as_str(), file = %file.display(), "Re-reading modified file");
                let lib = Arc::clone(self);
                let file_for_task = file.clone();
                let result =
                    tokio::task::spawn_blocking(move || lib.process_file_update(&file_for_task))
                        .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(file = %file.display(), error = %e, "Failed to update modified file")
                    }
                    Err(e) => warn!(file = %file.display(), error = %e, "Update task failed"),
                }
            }
        }
    }

    /// Background update loop: drains pending work, persists the last-update
    /// timestamp when idle, and otherwise sleeps until the next deadline or
    /// wakeup signal.
    pub async fn run_update_loop(self: Arc<Self>) {
        let mut last_activity = Instant::now();
        loop {
            match self.drain_pending().await {
                Ok(true) => last_activity = Instant::now(),
                Ok(false) => {}
                Err(e) => {
                    warn!(library = self.name.as_str(), error = %e, "Update loop error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }

            if last_activity.elapsed() >= IDLE_WRITE_INTERVAL {
                let index = Arc::clone(&self.index);
                let stamp = epoch_secs(SystemTime::now());
                let result =
                    tokio::task::spawn_blocking(move || index.set_last_update_time(stamp)).await;
                if let Ok(Err(e)) = result {
                    warn!(library = self.name.as_str(), error = %e, "Could not persist update time");
                }
                last_activity = Instant::now();
            }

            let idle_remaining =
                IDLE_WRITE_INTERVAL.saturating_sub(last_activity.elapsed()).max(Duration::from_millis(50));
            let timeout = match self.next_deadline() {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .max(Duration::from_millis(10))
                    .min(idle_remaining),
                None => idle_remaining,
            };
            self.refresh_event.wait(timeout).await;
        }
    }

    /// Drain the change-monitor stream, applying each event in arrival
    /// order. Ends when the watcher side closes.
    pub async fn run_change_monitor(self: Arc<Self>, mut rx: UnboundedReceiver<ChangeEvent>) {
        while let Some(event) = rx.recv().await {
            let lib = Arc::clone(&self);
            let result = tokio::task::spawn_blocking(move || lib.apply_change(event)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(library = self.name.as_str(), error = %e, "Failed to apply change event"),
                Err(e) => warn!(library = self.name.as_str(), error = %e, "Change task failed"),
            }
        }
        debug!(library = self.name.as_str(), "Change monitor stopped");
    }

    // -----------------------------------------------------------------------
    // Search & list
    // -----------------------------------------------------------------------

    /// Recursive filtered search under `path` (the whole library when
    /// `None`), merging external-index results ahead of our own.
    pub fn search(self: &Arc<Self>, path: Option<PathBuf>, params: SearchParams) -> LibrarySearch {
        self.stream(path, SearchMode::Subdir, params)
    }

    /// Non-recursive listing of a directory's children.
    pub fn list(self: &Arc<Self>, path: Option<PathBuf>, params: SearchParams) -> LibrarySearch {
        self.stream(path, SearchMode::DirectChildren, params)
    }

    fn stream(
        self: &Arc<Self>,
        path: Option<PathBuf>,
        mode: SearchMode,
        params: SearchParams,
    ) -> LibrarySearch {
        let scope = path.unwrap_or_else(|| self.root.clone());

        // The external index knows nothing about sidecar data, so bookmark
        // filters must not consult it. It also only yields files.
        let external = if !params.uses_bookmark_data()
            && params.include_files
            && self.external.available()
        {
            let query = ExternalQuery {
                substr: params.substr.clone(),
                media_type: params.media_type,
                recursive: mode == SearchMode::Subdir,
            };
            match self.external.search(&scope, &query) {
                Ok(iter) => Some(iter),
                Err(e) => {
                    let soft = ApiError::BackendUnavailable(e.to_string());
                    warn!(library = self.name.as_str(), error = %soft, "External search failed, continuing with index only");
                    None
                }
            }
        } else {
            None
        };

        let opts = SearchOptions {
            path: Some(scope.to_string_lossy().into_owned()),
            mode,
            substr: params.substr.clone(),
            bookmarked: params.bookmarked,
            bookmark_tags: params.bookmark_tags.clone(),
            media_type: params.media_type,
            total_pixels: params.total_pixels,
            aspect_ratio: params.aspect_ratio,
            include_files: params.include_files,
            include_dirs: params.include_dirs,
        };

        LibrarySearch {
            lib: Arc::clone(self),
            external,
            cursor: self.index.search(opts, params.sort),
            seen: HashSet::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Bookmarks
    // -----------------------------------------------------------------------

    /// Set or clear a bookmark, then re-read the entry so the caller gets
    /// the fresh record.
    pub fn bookmark_edit(
        &self,
        path: &VPath,
        set: bool,
        tags: Option<&[String]>,
    ) -> Result<Entry, ApiError> {
        let meta = if set {
            FileMeta {
                bookmarked: true,
                bookmark_tags: tags.map(|t| t.join(" ")).unwrap_or_default(),
            }
        } else {
            FileMeta::default()
        };
        sidecar::save_file(path, &meta)?;

        self.get(path, true)?
            .ok_or_else(|| ApiError::NotFound(format!("{path} is not in this library")))
    }
}

// ---------------------------------------------------------------------------
// Merged result stream
// ---------------------------------------------------------------------------

/// A lazy merged result sequence: external-index hits first, in their
/// native order, then our own index in sort order, deduplicated by exact
/// path.
pub struct LibrarySearch {
    lib: Arc<Library>,
    external: Option<Box<dyn Iterator<Item = PathBuf> + Send>>,
    cursor: crate::index::SearchCursor,
    seen: HashSet<String>,
}

impl LibrarySearch {
    pub fn library(&self) -> &Arc<Library> {
        &self.lib
    }

    /// Pull up to `limit` more entries. An empty result means the stream is
    /// exhausted.
    pub fn next_batch(&mut self, limit: usize) -> Result<Vec<Entry>, ApiError> {
        let mut out = Vec::new();
        while out.len() < limit {
            if let Some(external) = &mut self.external {
                match external.next() {
                    Some(hit) => {
                        let vp = VPath::from_native(&hit);
                        match self.lib.get(&vp, false) {
                            Ok(Some(entry)) => {
                                if self.seen.insert(entry.path.clone()) {
                                    out.push(entry);
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(path = %hit.display(), error = %e, "Could not materialize external result");
                            }
                        }
                        continue;
                    }
                    None => self.external = None,
                }
            }

            let batch = self.cursor.next_batch(limit - out.len())?;
            if batch.is_empty() {
                break;
            }
            for entry in batch {
                if self.seen.insert(entry.path.clone()) {
                    out.push(entry);
                }
            }
        }
        Ok(out)
    }
}

/// A name-ascending list stream used when no explicit order is requested.
pub fn default_list_sort() -> Sort {
    Sort { order: SortOrder::Name, reverse: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::DisabledSearch;

    fn library(root: &Path, data: &Path) -> Arc<Library> {
        let spec = LibrarySpec { name: "pics".to_string(), root: root.to_path_buf() };
        Library::new(&spec, data, Arc::new(DisabledSearch)).unwrap()
    }

    #[test]
    fn public_path_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let lib = library(dir.path(), data.path());

        let native = dir.path().join("a").join("b.jpg");
        let public = lib.public_path(&native).unwrap();
        assert_eq!(public, "/pics/a/b.jpg");
        assert_eq!(lib.native_path("a/b.jpg"), native);

        assert_eq!(lib.public_path(dir.path()).unwrap(), "/pics");
        assert!(lib.public_path(Path::new("/elsewhere/c.jpg")).is_none());
    }

    #[test]
    fn mountpoint_entry_is_synthetic() {
        let dir = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let lib = library(dir.path(), data.path());

        let entry = lib.mountpoint_entry();
        assert!(entry.is_directory);
        assert_eq!(entry.ctime, 0.0);
        assert_eq!(entry.mime_type, "application/folder");
        assert_eq!(entry.title, "pics");
    }

    #[tokio::test]
    async fn refresh_skips_plain_images_and_sweeps_stale_rows() {
        let dir = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"not really a jpeg").unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"not really a video").unwrap();
        std::fs::create_dir(dir.path().join("c")).unwrap();

        let lib = library(dir.path(), data.path());
        lib.refresh(None, true, None).await.unwrap();

        let video = dir.path().join("b.mp4");
        let subdir = dir.path().join("c");
        assert!(lib.index().get(&video.to_string_lossy()).unwrap().is_some());
        assert!(lib.index().get(&subdir.to_string_lossy()).unwrap().is_some());
        assert!(lib
            .index()
            .get(&dir.path().join("a.jpg").to_string_lossy())
            .unwrap()
            .is_none());

        // Delete the video; the next refresh sweeps its row.
        std::fs::remove_file(&video).unwrap();
        lib.refresh(None, true, None).await.unwrap();
        assert!(lib.index().get(&video.to_string_lossy()).unwrap().is_none());
    }

    #[tokio::test]
    async fn bookmark_edit_round_trip_restores_unbookmarked_state() {
        let dir = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"jpeg").unwrap();

        let lib = library(dir.path(), data.path());
        let vp = VPath::Fs(dir.path().join("a.jpg"));

        let tags = vec!["x".to_string(), "y".to_string()];
        let entry = lib.bookmark_edit(&vp, true, Some(&tags)).unwrap();
        assert!(entry.bookmarked);
        assert_eq!(entry.bookmark_tags, "x y");
        assert!(dir.path().join(SIDECAR_FILENAME).exists());

        let entry = lib.bookmark_edit(&vp, false, None).unwrap();
        assert!(!entry.bookmarked);
        assert_eq!(entry.bookmark_tags, "");
        assert!(!dir.path().join(SIDECAR_FILENAME).exists());
    }

    #[tokio::test]
    async fn rename_event_moves_indexed_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let old = dir.path().join("old");
        std::fs::create_dir(&old).unwrap();
        std::fs::write(old.join("clip.mp4"), b"video").unwrap();

        let lib = library(dir.path(), data.path());
        lib.refresh(None, true, None).await.unwrap();

        let new = dir.path().join("new");
        std::fs::rename(&old, &new).unwrap();
        lib.apply_change(ChangeEvent {
            path: new.clone(),
            old_path: Some(old.clone()),
            action: ChangeAction::Renamed,
        })
        .unwrap();

        assert!(lib.index().get(&old.to_string_lossy()).unwrap().is_none());
        assert!(lib.index().get(&old.join("clip.mp4").to_string_lossy()).unwrap().is_none());
        let moved = lib.index().get(&new.join("clip.mp4").to_string_lossy()).unwrap().unwrap();
        assert_eq!(moved.parent, new.to_string_lossy());
    }

    #[tokio::test]
    async fn modified_events_debounce_to_one_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.mp4"), b"v").unwrap();
        let lib = library(dir.path(), data.path());

        let target = dir.path().join("f.mp4");
        for _ in 0..5 {
            lib.apply_change(ChangeEvent {
                path: target.clone(),
                old_path: None,
                action: ChangeAction::Modified,
            })
            .unwrap();
        }

        let pending = lib.pending.lock().unwrap();
        assert_eq!(pending.files.len(), 1);
        let deadline = pending.files[&target];
        assert!(deadline > Instant::now());
    }

    #[tokio::test]
    async fn refresh_event_collapses_multiple_sets() {
        let event = RefreshEvent::new();
        event.set();
        event.set();
        assert!(event.wait(Duration::from_millis(10)).await);
        assert!(!event.wait(Duration::from_millis(10)).await);
    }
}
