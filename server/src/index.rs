//! Persistent per-library index of file and directory records, backed by
//! SQLite.
//!
//! Paths are stored as native strings so bulk refreshes never pay for
//! per-row path-object construction. Writers go through [`IndexWriter`], a
//! scoped transaction that commits explicitly and rolls back on drop;
//! readers take the connection lock per call. Search results stream through
//! [`SearchCursor`], which carries its own continuation state (filters, sort
//! key, last row seen) so a suspended search can resume without holding any
//! database resources.

use rusqlite::types::ToSql;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::{Path, MAIN_SEPARATOR};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::{ApiError, MediaType};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One indexed file or directory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Entry {
    /// Absolute native path; primary key.
    pub path: String,
    /// Absolute native path of the containing directory.
    pub parent: String,
    pub is_directory: bool,
    pub ctime: f64,
    pub mtime: f64,
    /// `application/folder` for directories.
    pub mime_type: String,
    pub title: String,
    pub author: String,
    pub comment: String,
    /// Space-joined.
    pub tags: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<f64>,
    pub animation: bool,
    pub bookmarked: bool,
    /// Space-joined; empty unless bookmarked.
    pub bookmark_tags: String,
}

impl Entry {
    /// Final path component.
    pub fn name(&self) -> String {
        Path::new(&self.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Search options
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    /// The entry whose path equals the search path.
    Exact,
    /// Entries whose parent equals the search path.
    DirectChildren,
    /// Strict descendants of the search path.
    Subdir,
}

#[derive(Clone, Debug)]
pub struct SearchOptions {
    pub path: Option<String>,
    pub mode: SearchMode,
    /// Case-insensitive substring over the final path component.
    pub substr: Option<String>,
    pub bookmarked: Option<bool>,
    /// Whitespace-separated tags that must all be present.
    pub bookmark_tags: Option<String>,
    pub media_type: Option<MediaType>,
    /// Inclusive range over `width * height`.
    pub total_pixels: Option<(f64, f64)>,
    /// Inclusive range over `width / height`.
    pub aspect_ratio: Option<(f64, f64)>,
    pub include_files: bool,
    pub include_dirs: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            path: None,
            mode: SearchMode::Subdir,
            substr: None,
            bookmarked: None,
            bookmark_tags: None,
            media_type: None,
            total_pixels: None,
            aspect_ratio: None,
            include_files: true,
            include_dirs: true,
        }
    }
}

/// Total, stable orderings: every variant breaks ties on rowid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Insertion order.
    #[default]
    Default,
    Name,
    Ctime,
    Mtime,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sort {
    pub order: SortOrder,
    pub reverse: bool,
}

impl Sort {
    /// Parse `name`, `ctime-reverse`, etc. Unknown orders fall back to
    /// insertion order.
    pub fn parse(s: &str) -> Sort {
        let (base, reverse) = match s.strip_suffix("-reverse") {
            Some(base) => (base, true),
            None => (s, false),
        };
        let order = match base {
            "name" => SortOrder::Name,
            "ctime" => SortOrder::Ctime,
            "mtime" => SortOrder::Mtime,
            _ => SortOrder::Default,
        };
        Sort { order, reverse }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files(
    id INTEGER PRIMARY KEY,
    path TEXT UNIQUE NOT NULL,
    parent TEXT NOT NULL,
    name TEXT NOT NULL,
    is_directory INTEGER NOT NULL DEFAULT 0,
    ctime REAL NOT NULL,
    mtime REAL NOT NULL,
    mime_type TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    author TEXT NOT NULL DEFAULT '',
    comment TEXT NOT NULL DEFAULT '',
    tags TEXT NOT NULL DEFAULT '',
    width INTEGER,
    height INTEGER,
    duration REAL,
    animation INTEGER NOT NULL DEFAULT 0,
    bookmarked INTEGER NOT NULL DEFAULT 0,
    bookmark_tags TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS files_parent ON files(parent);
CREATE INDEX IF NOT EXISTS files_name ON files(name COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS files_bookmarked ON files(bookmarked);
CREATE TABLE IF NOT EXISTS info(
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_updated_at REAL
);
";

const COLUMNS: &str = "path, parent, is_directory, ctime, mtime, mime_type, title, author, \
                       comment, tags, width, height, duration, animation, bookmarked, \
                       bookmark_tags, id";

/// A single library's index database.
pub struct FileIndex {
    conn: Mutex<Connection>,
}

impl FileIndex {
    pub fn open(path: &Path) -> Result<FileIndex, ApiError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(FileIndex { conn: Mutex::new(conn) })
    }

    /// In-memory index, used by tests.
    pub fn open_in_memory() -> Result<FileIndex, ApiError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(FileIndex { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a scoped write transaction. The writer holds the connection
    /// until [`IndexWriter::commit`] or drop (rollback). There is no
    /// nesting: callers already holding a writer keep using it.
    pub fn begin(&self) -> Result<IndexWriter<'_>, ApiError> {
        let conn = self.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(IndexWriter { conn, finished: false })
    }

    /// Upsert a single record in its own transaction.
    pub fn add_record(&self, entry: &Entry) -> Result<(), ApiError> {
        let writer = self.begin()?;
        writer.add_record(entry)?;
        writer.commit()
    }

    pub fn get(&self, path: &str) -> Result<Option<Entry>, ApiError> {
        get_record(&self.lock(), path)
    }

    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<(), ApiError> {
        let writer = self.begin()?;
        writer.rename(old_path, new_path)?;
        writer.commit()
    }

    pub fn delete_recursively(&self, paths: &[String]) -> Result<(), ApiError> {
        let writer = self.begin()?;
        writer.delete_recursively(paths)?;
        writer.commit()
    }

    /// Multiset of bookmark tags across all bookmarked entries.
    pub fn get_all_bookmark_tags(&self) -> Result<BTreeMap<String, usize>, ApiError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT bookmark_tags FROM files WHERE bookmarked = 1")?;
        let mut tags: BTreeMap<String, usize> = BTreeMap::new();
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            for tag in row?.split_whitespace() {
                *tags.entry(tag.to_string()).or_insert(0) += 1;
            }
        }
        Ok(tags)
    }

    pub fn get_last_update_time(&self) -> Result<Option<f64>, ApiError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT last_updated_at FROM info WHERE id = 1")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(None),
        }
    }

    pub fn set_last_update_time(&self, epoch: f64) -> Result<(), ApiError> {
        self.lock().execute(
            "INSERT INTO info(id, last_updated_at) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET last_updated_at = excluded.last_updated_at",
            [epoch],
        )?;
        Ok(())
    }

    /// Start a streaming search. The cursor borrows nothing; each batch
    /// takes the connection lock for one `SELECT`.
    pub fn search(self: &Arc<Self>, opts: SearchOptions, sort: Sort) -> SearchCursor {
        SearchCursor { index: Arc::clone(self), opts, sort, last: None, done: false }
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Scoped write transaction. Dropping without [`commit`](Self::commit)
/// rolls back.
pub struct IndexWriter<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl IndexWriter<'_> {
    pub fn commit(mut self) -> Result<(), ApiError> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    /// Upsert by path.
    pub fn add_record(&self, entry: &Entry) -> Result<(), ApiError> {
        self.conn.execute(
            "INSERT INTO files(path, parent, name, is_directory, ctime, mtime, mime_type,
                               title, author, comment, tags, width, height, duration,
                               animation, bookmarked, bookmark_tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(path) DO UPDATE SET
                 parent = excluded.parent,
                 name = excluded.name,
                 is_directory = excluded.is_directory,
                 ctime = excluded.ctime,
                 mtime = excluded.mtime,
                 mime_type = excluded.mime_type,
                 title = excluded.title,
                 author = excluded.author,
                 comment = excluded.comment,
                 tags = excluded.tags,
                 width = excluded.width,
                 height = excluded.height,
                 duration = excluded.duration,
                 animation = excluded.animation,
                 bookmarked = excluded.bookmarked,
                 bookmark_tags = excluded.bookmark_tags",
            rusqlite::params![
                entry.path,
                entry.parent,
                entry.name(),
                entry.is_directory,
                entry.ctime,
                entry.mtime,
                entry.mime_type,
                entry.title,
                entry.author,
                entry.comment,
                entry.tags,
                entry.width,
                entry.height,
                entry.duration,
                entry.animation,
                entry.bookmarked,
                entry.bookmark_tags,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, path: &str) -> Result<Option<Entry>, ApiError> {
        get_record(&self.conn, path)
    }

    /// Atomically move a node, rewriting `path` and `parent` of the node
    /// and, for a directory, of all its descendants. All other fields are
    /// preserved.
    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<(), ApiError> {
        let sep = MAIN_SEPARATOR.to_string();
        let new_parent = parent_of(new_path);
        let new_name = name_of(new_path);
        self.conn.execute(
            "UPDATE files SET path = ?2, parent = ?3, name = ?4 WHERE path = ?1",
            rusqlite::params![old_path, new_path, new_parent, new_name],
        )?;
        self.conn.execute(
            "UPDATE files
             SET path = ?2 || substr(path, length(?1) + 1),
                 parent = ?2 || substr(parent, length(?1) + 1)
             WHERE substr(path, 1, length(?1) + 1) = ?1 || ?3",
            rusqlite::params![old_path, new_path, sep],
        )?;
        Ok(())
    }

    /// Remove each path and everything below it.
    pub fn delete_recursively(&self, paths: &[String]) -> Result<(), ApiError> {
        let sep = MAIN_SEPARATOR.to_string();
        for path in paths {
            self.conn.execute(
                "DELETE FROM files
                 WHERE path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || ?2",
                rusqlite::params![path, sep],
            )?;
        }
        Ok(())
    }

    /// Paths of the direct children of `parent`, for stale-set sweeps.
    pub fn child_paths(&self, parent: &str) -> Result<Vec<String>, ApiError> {
        let mut stmt = self.conn.prepare("SELECT path FROM files WHERE parent = ?1")?;
        let rows = stmt.query_map([parent], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl Drop for IndexWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

fn parent_of(path: &str) -> String {
    Path::new(path).parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default()
}

fn name_of(path: &str) -> String {
    Path::new(path).file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn get_record(conn: &Connection, path: &str) -> Result<Option<Entry>, ApiError> {
    let sql = format!("SELECT {COLUMNS} FROM files WHERE path = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([path])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_entry(row)?)),
        None => Ok(None),
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<Entry, rusqlite::Error> {
    Ok(Entry {
        path: row.get(0)?,
        parent: row.get(1)?,
        is_directory: row.get(2)?,
        ctime: row.get(3)?,
        mtime: row.get(4)?,
        mime_type: row.get(5)?,
        title: row.get(6)?,
        author: row.get(7)?,
        comment: row.get(8)?,
        tags: row.get(9)?,
        width: row.get(10)?,
        height: row.get(11)?,
        duration: row.get(12)?,
        animation: row.get(13)?,
        bookmarked: row.get(14)?,
        bookmark_tags: row.get(15)?,
    })
}

// ---------------------------------------------------------------------------
// Streaming search
// ---------------------------------------------------------------------------

/// Continuation value for the active sort order.
#[derive(Clone, Debug)]
enum SortValue {
    None,
    Text(String),
    Real(f64),
}

/// A resumable search: filters plus the last `(sort value, rowid)` seen.
/// Each `next_batch` call runs one keyset-paginated `SELECT`.
pub struct SearchCursor {
    index: Arc<FileIndex>,
    opts: SearchOptions,
    sort: Sort,
    last: Option<(SortValue, i64)>,
    done: bool,
}

impl SearchCursor {
    pub fn next_batch(&mut self, limit: usize) -> Result<Vec<Entry>, ApiError> {
        if self.done || limit == 0 {
            return Ok(Vec::new());
        }

        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();
        let sep = MAIN_SEPARATOR.to_string();

        if let Some(path) = &self.opts.path {
            match self.opts.mode {
                SearchMode::Exact => {
                    clauses.push(format!("path = ?{}", args.len() + 1));
                    args.push(Box::new(path.clone()));
                }
                SearchMode::DirectChildren => {
                    clauses.push(format!("parent = ?{}", args.len() + 1));
                    args.push(Box::new(path.clone()));
                }
                SearchMode::Subdir => {
                    let p = args.len() + 1;
                    clauses.push(format!("substr(path, 1, length(?{p}) + 1) = ?{p} || ?{}", p + 1));
                    args.push(Box::new(path.clone()));
                    args.push(Box::new(sep.clone()));
                }
            }
        }

        if let Some(substr) = &self.opts.substr {
            clauses.push(format!("instr(lower(name), lower(?{})) > 0", args.len() + 1));
            args.push(Box::new(substr.clone()));
        }

        if let Some(bookmarked) = self.opts.bookmarked {
            clauses.push(format!("bookmarked = ?{}", args.len() + 1));
            args.push(Box::new(bookmarked));
        }

        if let Some(tags) = &self.opts.bookmark_tags {
            for tag in tags.split_whitespace() {
                clauses.push(format!(
                    "instr(' ' || bookmark_tags || ' ', ' ' || ?{} || ' ') > 0",
                    args.len() + 1
                ));
                args.push(Box::new(tag.to_string()));
            }
        }

        match self.opts.media_type {
            Some(MediaType::Image) => {
                clauses.push("mime_type LIKE 'image/%' AND animation = 0".to_string());
            }
            Some(MediaType::Video) => {
                clauses.push("(mime_type LIKE 'video/%' OR animation = 1)".to_string());
            }
            None => {}
        }

        if let Some((lo, hi)) = self.opts.total_pixels {
            let p = args.len() + 1;
            clauses.push(format!(
                "width IS NOT NULL AND height IS NOT NULL \
                 AND (width * height) BETWEEN ?{p} AND ?{}",
                p + 1
            ));
            args.push(Box::new(lo));
            args.push(Box::new(hi));
        }

        if let Some((lo, hi)) = self.opts.aspect_ratio {
            let p = args.len() + 1;
            clauses.push(format!(
                "width IS NOT NULL AND height > 0 \
                 AND (CAST(width AS REAL) / height) BETWEEN ?{p} AND ?{}",
                p + 1
            ));
            args.push(Box::new(lo));
            args.push(Box::new(hi));
        }

        match (self.opts.include_files, self.opts.include_dirs) {
            (true, true) => {}
            (true, false) => clauses.push("is_directory = 0".to_string()),
            (false, true) => clauses.push("is_directory = 1".to_string()),
            (false, false) => clauses.push("0 = 1".to_string()),
        }

        // Keyset continuation: strictly after the last row in sort order.
        let (cmp, dir) = if self.sort.reverse { ("<", "DESC") } else { (">", "ASC") };
        let order_by = match self.sort.order {
            SortOrder::Default => format!("id {dir}"),
            SortOrder::Name => format!("name COLLATE NOCASE {dir}, id {dir}"),
            SortOrder::Ctime => format!("ctime {dir}, id {dir}"),
            SortOrder::Mtime => format!("mtime {dir}, id {dir}"),
        };

        if let Some((value, id)) = &self.last {
            match (self.sort.order, value) {
                (SortOrder::Default, _) => {
                    clauses.push(format!("id {cmp} ?{}", args.len() + 1));
                    args.push(Box::new(*id));
                }
                (SortOrder::Name, SortValue::Text(name)) => {
                    let p = args.len() + 1;
                    clauses.push(format!(
                        "(name COLLATE NOCASE {cmp} ?{p} \
                         OR (name COLLATE NOCASE = ?{p} AND id {cmp} ?{}))",
                        p + 1
                    ));
                    args.push(Box::new(name.clone()));
                    args.push(Box::new(*id));
                }
                (SortOrder::Ctime | SortOrder::Mtime, SortValue::Real(v)) => {
                    let col = if self.sort.order == SortOrder::Ctime { "ctime" } else { "mtime" };
                    let p = args.len() + 1;
                    clauses.push(format!(
                        "({col} {cmp} ?{p} OR ({col} = ?{p} AND id {cmp} ?{}))",
                        p + 1
                    ));
                    args.push(Box::new(*v));
                    args.push(Box::new(*id));
                }
                _ => {
                    clauses.push(format!("id {cmp} ?{}", args.len() + 1));
                    args.push(Box::new(*id));
                }
            }
        }

        let where_clause =
            if clauses.is_empty() { String::new() } else { format!("WHERE {}", clauses.join(" AND ")) };
        let sql = format!(
            "SELECT {COLUMNS} FROM files {where_clause} ORDER BY {order_by} LIMIT {limit}"
        );

        let conn = self.index.lock();
        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let mut rows = stmt.query(&refs[..])?;

        let mut batch = Vec::with_capacity(limit);
        while let Some(row) = rows.next()? {
            let entry = row_to_entry(row)?;
            let id: i64 = row.get(16)?;
            let value = match self.sort.order {
                SortOrder::Default => SortValue::None,
                SortOrder::Name => SortValue::Text(entry.name()),
                SortOrder::Ctime => SortValue::Real(entry.ctime),
                SortOrder::Mtime => SortValue::Real(entry.mtime),
            };
            self.last = Some((value, id));
            batch.push(entry);
        }

        if batch.len() < limit {
            self.done = true;
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sep() -> String {
        MAIN_SEPARATOR.to_string()
    }

    fn file(path: &str, mime: &str) -> Entry {
        let path = path.replace('/', &sep());
        Entry {
            parent: parent_of(&path),
            path,
            mime_type: mime.to_string(),
            ctime: 10.0,
            mtime: 20.0,
            ..Entry::default()
        }
    }

    fn dir(path: &str) -> Entry {
        let mut e = file(path, "application/folder");
        e.is_directory = true;
        e
    }

    fn all(cursor: &mut SearchCursor) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            let batch = cursor.next_batch(3).unwrap();
            if batch.is_empty() {
                break;
            }
            out.extend(batch.into_iter().map(|e| e.path));
        }
        out
    }

    fn seeded() -> Arc<FileIndex> {
        let index = Arc::new(FileIndex::open_in_memory().unwrap());
        let writer = index.begin().unwrap();
        writer.add_record(&dir("/lib")).unwrap();
        writer.add_record(&dir("/lib/sub")).unwrap();
        writer.add_record(&file("/lib/b.mp4", "video/mp4")).unwrap();
        writer.add_record(&file("/lib/sub/a.jpg", "image/jpeg")).unwrap();
        writer.add_record(&file("/lib/sub/c.png", "image/png")).unwrap();
        writer.commit().unwrap();
        index
    }

    #[test]
    fn upsert_replaces_by_path() {
        let index = Arc::new(FileIndex::open_in_memory().unwrap());
        let mut e = file("/lib/a.jpg", "image/jpeg");
        index.add_record(&e).unwrap();
        e.title = "renamed".to_string();
        index.add_record(&e).unwrap();

        let got = index.get(&e.path).unwrap().unwrap();
        assert_eq!(got.title, "renamed");

        // Still exactly one row.
        let mut cursor = index.search(SearchOptions::default(), Sort::default());
        assert_eq!(all(&mut cursor).len(), 1);
    }

    #[test]
    fn search_modes() {
        let index = seeded();
        let root = format!("{0}lib", sep());

        let mut exact = index.search(
            SearchOptions { path: Some(root.clone()), mode: SearchMode::Exact, ..Default::default() },
            Sort::default(),
        );
        assert_eq!(all(&mut exact), vec![root.clone()]);

        let mut children = index.search(
            SearchOptions {
                path: Some(root.clone()),
                mode: SearchMode::DirectChildren,
                ..Default::default()
            },
            Sort::default(),
        );
        assert_eq!(all(&mut children).len(), 2);

        let mut subtree = index.search(
            SearchOptions { path: Some(root), mode: SearchMode::Subdir, ..Default::default() },
            Sort::default(),
        );
        assert_eq!(all(&mut subtree).len(), 4);
    }

    #[test]
    fn substr_matches_final_component_only() {
        let index = seeded();
        let mut cursor = index.search(
            SearchOptions { substr: Some("SUB".to_string()), ..Default::default() },
            Sort::default(),
        );
        // "sub" the directory matches by name; files under it don't match by
        // their own names.
        let paths = all(&mut cursor);
        assert_eq!(paths, vec![format!("{0}lib{0}sub", sep())]);
    }

    #[test]
    fn name_sort_is_stable_across_batches() {
        let index = seeded();
        let mut cursor = index.search(
            SearchOptions { include_dirs: false, ..Default::default() },
            Sort { order: SortOrder::Name, reverse: false },
        );
        let first = cursor.next_batch(2).unwrap();
        let second = cursor.next_batch(2).unwrap();
        let names: Vec<String> =
            first.iter().chain(second.iter()).map(|e| e.name()).collect();
        assert_eq!(names, vec!["a.jpg", "b.mp4", "c.png"]);

        let mut reversed = index.search(
            SearchOptions { include_dirs: false, ..Default::default() },
            Sort { order: SortOrder::Name, reverse: true },
        );
        let names: Vec<String> =
            all(&mut reversed).iter().map(|p| name_of(p)).collect();
        assert_eq!(names, vec!["c.png", "b.mp4", "a.jpg"]);
    }

    #[test]
    fn rename_directory_rewrites_descendants() {
        let index = seeded();
        let old = format!("{0}lib{0}sub", sep());
        let new = format!("{0}lib{0}moved", sep());
        let before = index.get(&format!("{old}{0}a.jpg", sep())).unwrap().unwrap();

        index.rename(&old, &new).unwrap();

        assert!(index.get(&old).unwrap().is_none());
        assert!(index.get(&format!("{old}{0}a.jpg", sep())).unwrap().is_none());

        let moved = index.get(&format!("{new}{0}a.jpg", sep())).unwrap().unwrap();
        assert_eq!(moved.parent, new);
        assert_eq!(moved.mime_type, before.mime_type);
        assert_eq!(moved.ctime, before.ctime);
        assert_eq!(index.get(&new).unwrap().unwrap().name(), "moved");
    }

    #[test]
    fn delete_recursively_covers_subtrees() {
        let index = seeded();
        index.delete_recursively(&[format!("{0}lib{0}sub", sep())]).unwrap();

        let mut cursor = index.search(SearchOptions::default(), Sort::default());
        let remaining = all(&mut cursor);
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|p| !p.contains("sub")));
    }

    #[test]
    fn dropped_writer_rolls_back() {
        let index = Arc::new(FileIndex::open_in_memory().unwrap());
        {
            let writer = index.begin().unwrap();
            writer.add_record(&file("/lib/a.jpg", "image/jpeg")).unwrap();
            // No commit.
        }
        assert!(index.get(&file("/lib/a.jpg", "image/jpeg").path).unwrap().is_none());
    }

    #[test]
    fn bookmark_tag_multiset() {
        let index = Arc::new(FileIndex::open_in_memory().unwrap());
        let mut a = file("/lib/a.jpg", "image/jpeg");
        a.bookmarked = true;
        a.bookmark_tags = "cats art".to_string();
        let mut b = file("/lib/b.jpg", "image/jpeg");
        b.bookmarked = true;
        b.bookmark_tags = "cats".to_string();
        index.add_record(&a).unwrap();
        index.add_record(&b).unwrap();

        let tags = index.get_all_bookmark_tags().unwrap();
        assert_eq!(tags["cats"], 2);
        assert_eq!(tags["art"], 1);
    }

    #[test]
    fn bookmark_tag_filter_requires_every_tag() {
        let index = Arc::new(FileIndex::open_in_memory().unwrap());
        let mut a = file("/lib/a.jpg", "image/jpeg");
        a.bookmarked = true;
        a.bookmark_tags = "cats art".to_string();
        let mut b = file("/lib/b.jpg", "image/jpeg");
        b.bookmarked = true;
        b.bookmark_tags = "cats".to_string();
        index.add_record(&a).unwrap();
        index.add_record(&b).unwrap();

        let mut cursor = index.search(
            SearchOptions {
                bookmarked: Some(true),
                bookmark_tags: Some("cats art".to_string()),
                ..Default::default()
            },
            Sort::default(),
        );
        assert_eq!(all(&mut cursor), vec![a.path]);
    }

    #[test]
    fn pixel_and_aspect_ranges_are_inclusive() {
        let index = Arc::new(FileIndex::open_in_memory().unwrap());
        let mut small = file("/lib/small.jpg", "image/jpeg");
        small.width = Some(100);
        small.height = Some(100);
        let mut wide = file("/lib/wide.jpg", "image/jpeg");
        wide.width = Some(200);
        wide.height = Some(100);
        index.add_record(&small).unwrap();
        index.add_record(&wide).unwrap();

        let mut pixels = index.search(
            SearchOptions { total_pixels: Some((10_000.0, 10_000.0)), ..Default::default() },
            Sort::default(),
        );
        assert_eq!(all(&mut pixels), vec![small.path.clone()]);

        let mut aspect = index.search(
            SearchOptions { aspect_ratio: Some((1.5, 2.5)), ..Default::default() },
            Sort::default(),
        );
        assert_eq!(all(&mut aspect), vec![wide.path]);
    }

    #[test]
    fn last_update_time_round_trips() {
        let index = FileIndex::open_in_memory().unwrap();
        assert_eq!(index.get_last_update_time().unwrap(), None);
        index.set_last_update_time(1234.5).unwrap();
        assert_eq!(index.get_last_update_time().unwrap(), Some(1234.5));
        index.set_last_update_time(2000.0).unwrap();
        assert_eq!(index.get_last_update_time().unwrap(), Some(2000.0));
    }
}
