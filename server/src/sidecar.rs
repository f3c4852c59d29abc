//! Per-directory JSON sidecar files holding user metadata the filesystem
//! can't: bookmarks and bookmark tags.
//!
//! One sidecar per directory, keyed by filename (`.` for the directory
//! itself). Loads are tolerant — a missing, unreadable, or corrupt sidecar is
//! an empty one. Writes go through read-modify-write, and a sidecar whose
//! last entry is removed is deleted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::paths::VPath;
use crate::types::{ApiError, SIDECAR_FILENAME};

const IDENTIFIER: &str = "ppixivmetadatafile";
const VERSION: u32 = 1;

/// User metadata for a single file or directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bookmarked: bool,
    /// Space-joined tag list; empty when not bookmarked.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bookmark_tags: String,
}

impl FileMeta {
    pub fn is_empty(&self) -> bool {
        !self.bookmarked && self.bookmark_tags.is_empty()
    }
}

#[derive(Serialize, Deserialize)]
struct SidecarFile {
    identifier: String,
    version: u32,
    data: BTreeMap<String, FileMeta>,
}

/// Where the sidecar for `dir` lives. `None` for archive views: there is no
/// real directory to write next to, and we never write inside a ZIP.
pub fn sidecar_path(dir: &VPath) -> Option<PathBuf> {
    dir.real_file().map(|real| real.join(SIDECAR_FILENAME))
}

/// The sidecar key for a path: its filename, or `.` when the path is the
/// directory the sidecar belongs to.
fn sidecar_location(path: &VPath) -> Option<(VPath, String)> {
    if path.is_dir() {
        Some((path.clone(), ".".to_string()))
    } else {
        Some((path.parent()?, path.name()))
    }
}

/// Load a directory's sidecar. Missing or corrupt files load as empty.
pub fn load(dir: &VPath) -> BTreeMap<String, FileMeta> {
    let Some(path) = sidecar_path(dir) else { return BTreeMap::new() };
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                tracing::debug!(sidecar = %path.display(), error = %e, "Could not read sidecar");
            }
            return BTreeMap::new();
        }
    };

    match serde_json::from_str::<SidecarFile>(&content) {
        Ok(file) if file.identifier == IDENTIFIER && file.version == VERSION => file.data,
        Ok(_) => {
            tracing::warn!(sidecar = %path.display(), "Unrecognized sidecar identifier or version");
            BTreeMap::new()
        }
        Err(e) => {
            tracing::warn!(sidecar = %path.display(), error = %e, "Corrupt sidecar, treating as empty");
            BTreeMap::new()
        }
    }
}

/// Metadata for a single path, from the sidecar of its containing directory
/// (or its own sidecar under `.` for a directory).
pub fn load_file(path: &VPath) -> FileMeta {
    let Some((dir, key)) = sidecar_location(path) else { return FileMeta::default() };
    load(&dir).remove(&key).unwrap_or_default()
}

/// Read-modify-write the sidecar entry for `path`. Empty metadata removes
/// the entry; an empty sidecar is deleted from disk.
pub fn save_file(path: &VPath, meta: &FileMeta) -> Result<(), ApiError> {
    let Some((dir, key)) = sidecar_location(path) else {
        return Err(ApiError::InvalidRequest(format!("cannot store metadata for {path}")));
    };
    let Some(sidecar) = sidecar_path(&dir) else {
        return Err(ApiError::InvalidRequest(format!("cannot store metadata inside an archive: {path}")));
    };

    let mut data = load(&dir);
    if meta.is_empty() {
        data.remove(&key);
    } else {
        data.insert(key, meta.clone());
    }

    if data.is_empty() {
        match std::fs::remove_file(&sidecar) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(());
    }

    let file = SidecarFile { identifier: IDENTIFIER.to_string(), version: VERSION, data };
    let serialized =
        serde_json::to_string_pretty(&file).map_err(|e| ApiError::Internal(e.to_string()))?;

    match std::fs::write(&sidecar, &serialized) {
        Ok(()) => Ok(()),
        // Platforms that mark the sidecar hidden can refuse to overwrite it
        // in place. Removing first clears the attribute; it is restored by
        // the dot-prefixed filename on the rewrite.
        Err(e) if e.kind() == ErrorKind::PermissionDenied && sidecar.exists() => {
            std::fs::remove_file(&sidecar)?;
            std::fs::write(&sidecar, &serialized)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(tags: &str) -> FileMeta {
        FileMeta { bookmarked: true, bookmark_tags: tags.to_string() }
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), "x").unwrap();
        let file = VPath::Fs(dir.path().join("a.jpg"));

        save_file(&file, &meta("x y")).unwrap();

        let loaded = load(&VPath::Fs(dir.path().to_path_buf()));
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["a.jpg"], meta("x y"));
        assert_eq!(load_file(&file), meta("x y"));
    }

    #[test]
    fn removing_last_entry_deletes_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), "x").unwrap();
        let file = VPath::Fs(dir.path().join("a.jpg"));

        save_file(&file, &meta("x")).unwrap();
        let sidecar = dir.path().join(SIDECAR_FILENAME);
        assert!(sidecar.exists());

        save_file(&file, &FileMeta::default()).unwrap();
        assert!(!sidecar.exists());
    }

    #[test]
    fn directory_metadata_stores_under_dot() {
        let dir = tempfile::tempdir().unwrap();
        let vdir = VPath::Fs(dir.path().to_path_buf());

        save_file(&vdir, &meta("fav")).unwrap();

        let loaded = load(&vdir);
        assert_eq!(loaded["."], meta("fav"));
        assert_eq!(load_file(&vdir), meta("fav"));
    }

    #[test]
    fn corrupt_sidecar_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SIDECAR_FILENAME), "{not json").unwrap();
        assert!(load(&VPath::Fs(dir.path().to_path_buf())).is_empty());
    }

    #[test]
    fn foreign_identifier_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let content = r#"{"identifier": "something-else", "version": 1, "data": {"a": {"bookmarked": true}}}"#;
        std::fs::write(dir.path().join(SIDECAR_FILENAME), content).unwrap();
        assert!(load(&VPath::Fs(dir.path().to_path_buf())).is_empty());
    }
}
