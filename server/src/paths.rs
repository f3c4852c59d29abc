//! Uniform path abstraction over native files, directories, and paths inside
//! ZIP archives.
//!
//! A `.zip` file is promoted to a directory: `is_dir()` reports true and
//! `iterdir()` enumerates the archive members. Members are addressed as
//! `Zip` variants carrying the container path plus the member path inside
//! it, so a native path like `/lib/set.zip/0001.jpg` round-trips through the
//! index like any other path.

use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use crate::types::epoch_secs;

/// Stat snapshot shared by both path variants.
#[derive(Clone, Copy, Debug)]
pub struct VStat {
    pub is_dir: bool,
    pub size: u64,
    pub ctime: f64,
    pub mtime: f64,
}

/// A path inside a ZIP archive: the on-disk container plus the member path,
/// always forward-slashed and non-empty. The archive root itself stays an
/// `Fs` path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZipRef {
    pub container: PathBuf,
    pub inner: String,
}

/// A polymorphic path: a native filesystem path or a ZIP member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VPath {
    Fs(PathBuf),
    Zip(ZipRef),
}

fn has_zip_suffix(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".zip")
}

fn is_zip_file(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()).is_some_and(has_zip_suffix) && path.is_file()
}

/// List all member names of an archive.
fn zip_names(container: &Path) -> io::Result<Vec<String>> {
    let file = fs::File::open(container)?;
    let mut archive = zip::ZipArchive::new(file).map_err(io::Error::other)?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(io::Error::other)?;
        names.push(entry.name().trim_end_matches('/').to_string());
    }
    Ok(names)
}

impl VPath {
    /// Interpret a native path, detecting ZIP containers along the way:
    /// `/a/b.zip/c.jpg` becomes a `Zip` member of `/a/b.zip`.
    pub fn from_native(path: &Path) -> VPath {
        let mut container = PathBuf::new();
        let mut components = path.components().peekable();
        while let Some(comp) = components.next() {
            container.push(comp);
            let is_last = components.peek().is_none();
            if !is_last && is_zip_file(&container) {
                let inner: PathBuf = components.collect();
                let inner = inner.to_string_lossy().replace('\\', "/");
                return VPath::Zip(ZipRef { container, inner });
            }
        }
        VPath::Fs(path.to_path_buf())
    }

    /// The native form of this path. ZIP members extend their container's
    /// path, which is how they are stored in the index.
    pub fn native(&self) -> PathBuf {
        match self {
            VPath::Fs(p) => p.clone(),
            VPath::Zip(z) => z.container.join(&z.inner),
        }
    }

    /// Final path component.
    pub fn name(&self) -> String {
        match self {
            VPath::Fs(p) => {
                p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
            }
            VPath::Zip(z) => z.inner.rsplit('/').next().unwrap_or(&z.inner).to_string(),
        }
    }

    /// Lowercased extension without the dot.
    pub fn suffix(&self) -> Option<String> {
        let name = self.name();
        name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
    }

    /// All path components, container and member components flattened.
    pub fn parts(&self) -> Vec<String> {
        self.native().components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect()
    }

    pub fn parent(&self) -> Option<VPath> {
        match self {
            VPath::Fs(p) => p.parent().map(|p| VPath::Fs(p.to_path_buf())),
            VPath::Zip(z) => match z.inner.rsplit_once('/') {
                Some((rest, _)) => Some(VPath::Zip(ZipRef {
                    container: z.container.clone(),
                    inner: rest.to_string(),
                })),
                None => Some(VPath::Fs(z.container.clone())),
            },
        }
    }

    /// Child composition.
    pub fn join(&self, name: &str) -> VPath {
        match self {
            VPath::Fs(p) => {
                if is_zip_file(p) {
                    VPath::Zip(ZipRef { container: p.clone(), inner: name.to_string() })
                } else {
                    VPath::Fs(p.join(name))
                }
            }
            VPath::Zip(z) => VPath::Zip(ZipRef {
                container: z.container.clone(),
                inner: format!("{}/{}", z.inner, name),
            }),
        }
    }

    /// Sibling with a different final component.
    pub fn with_name(&self, name: &str) -> VPath {
        match self.parent() {
            Some(parent) => parent.join(name),
            None => self.join(name),
        }
    }

    pub fn exists(&self) -> bool {
        match self {
            VPath::Fs(p) => p.exists(),
            VPath::Zip(z) => {
                let Ok(names) = zip_names(&z.container) else { return false };
                let prefix = format!("{}/", z.inner);
                names.iter().any(|n| n == &z.inner || n.starts_with(&prefix))
            }
        }
    }

    /// True for plain files and ZIP members. A `.zip` container counts as a
    /// directory, not a file.
    pub fn is_file(&self) -> bool {
        match self {
            VPath::Fs(p) => p.is_file() && !is_zip_file(p),
            VPath::Zip(z) => {
                zip_names(&z.container).map(|names| names.iter().any(|n| n == &z.inner)).unwrap_or(false)
            }
        }
    }

    /// True for directories, `.zip` containers (archive promotion), and ZIP
    /// member directories.
    pub fn is_dir(&self) -> bool {
        match self {
            VPath::Fs(p) => p.is_dir() || is_zip_file(p),
            VPath::Zip(z) => {
                let Ok(names) = zip_names(&z.container) else { return false };
                let prefix = format!("{}/", z.inner);
                names.iter().any(|n| n.starts_with(&prefix))
            }
        }
    }

    /// The on-disk file behind this path, when there is one that can be
    /// written next to. `None` for archive containers and members, so sidecar
    /// writes never target the inside of a ZIP.
    pub fn real_file(&self) -> Option<&Path> {
        match self {
            VPath::Fs(p) if !is_zip_file(p) => Some(p.as_path()),
            _ => None,
        }
    }

    pub fn stat(&self) -> io::Result<VStat> {
        match self {
            VPath::Fs(p) => {
                let meta = fs::metadata(p)?;
                let mtime = meta.modified().map(epoch_secs).unwrap_or(0.0);
                let ctime = meta.created().map(epoch_secs).unwrap_or(mtime);
                Ok(VStat {
                    is_dir: meta.is_dir() || is_zip_file(p),
                    size: meta.len(),
                    ctime,
                    mtime,
                })
            }
            VPath::Zip(z) => {
                // Archives rarely carry useful per-member timestamps; use the
                // container's so members sort with their archive.
                let container = VPath::Fs(z.container.clone()).stat()?;
                let file = fs::File::open(&z.container)?;
                let mut archive = zip::ZipArchive::new(file).map_err(io::Error::other)?;
                let size = match archive.by_name(&z.inner) {
                    Ok(entry) => entry.size(),
                    Err(_) => 0,
                };
                Ok(VStat { is_dir: self.is_dir(), size, ctime: container.ctime, mtime: container.mtime })
            }
        }
    }

    /// Children of this path, sorted by name. For archives this yields the
    /// immediate members; nested member directories are synthesized from the
    /// member names.
    pub fn iterdir(&self) -> io::Result<Vec<VPath>> {
        match self {
            VPath::Fs(p) if is_zip_file(p) => zip_children(p, ""),
            VPath::Fs(p) => {
                let mut out = Vec::new();
                for entry in fs::read_dir(p)? {
                    out.push(VPath::Fs(entry?.path()));
                }
                out.sort_by(|a, b| a.name().cmp(&b.name()));
                Ok(out)
            }
            VPath::Zip(z) => zip_children(&z.container, &z.inner),
        }
    }

    /// Byte stream over the file contents. ZIP members are decompressed into
    /// memory; callers only probe headers and sidecar-sized files.
    ///
    /// Plain files are opened read-only without any exclusive lock, so user
    /// edits to an open file are never blocked.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match self {
            VPath::Fs(p) => Ok(Box::new(fs::File::open(p)?)),
            VPath::Zip(z) => {
                let file = fs::File::open(&z.container)?;
                let mut archive = zip::ZipArchive::new(file).map_err(io::Error::other)?;
                let mut entry = archive.by_name(&z.inner).map_err(io::Error::other)?;
                let mut buf = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut buf)?;
                Ok(Box::new(Cursor::new(buf)))
            }
        }
    }
}

impl std::fmt::Display for VPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.native().display())
    }
}

/// Immediate children under `prefix` inside an archive ("" for the root).
fn zip_children(container: &Path, prefix: &str) -> io::Result<Vec<VPath>> {
    let names = zip_names(container)?;
    let want = if prefix.is_empty() { String::new() } else { format!("{prefix}/") };

    let mut seen = std::collections::BTreeSet::new();
    for name in &names {
        let Some(rest) = name.strip_prefix(&want) else { continue };
        if rest.is_empty() {
            continue;
        }
        let first = rest.split('/').next().unwrap_or(rest);
        seen.insert(first.to_string());
    }

    Ok(seen
        .into_iter()
        .map(|child| {
            let inner = if want.is_empty() { child } else { format!("{want}{child}") };
            VPath::Zip(ZipRef { container: container.to_path_buf(), inner })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn zip_container_promotes_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("frames.zip");
        write_zip(&zip_path, &[("a.jpg", b"x"), ("sub/b.jpg", b"y")]);

        let vp = VPath::Fs(zip_path.clone());
        assert!(vp.is_dir());
        assert!(!vp.is_file());
        assert!(vp.real_file().is_none());

        let children: Vec<String> = vp.iterdir().unwrap().iter().map(|c| c.name()).collect();
        assert_eq!(children, vec!["a.jpg", "sub"]);
    }

    #[test]
    fn zip_member_round_trips_through_native_path() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("frames.zip");
        write_zip(&zip_path, &[("sub/b.jpg", b"data")]);

        let native = zip_path.join("sub").join("b.jpg");
        let vp = VPath::from_native(&native);
        match &vp {
            VPath::Zip(z) => assert_eq!(z.inner, "sub/b.jpg"),
            other => panic!("expected zip member, got {other:?}"),
        }
        assert_eq!(vp.native(), native);
        assert!(vp.is_file());
        assert!(vp.exists());

        let mut content = String::new();
        vp.open().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "data");
    }

    #[test]
    fn member_directory_lists_its_children() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("frames.zip");
        write_zip(&zip_path, &[("sub/a.jpg", b"1"), ("sub/b.jpg", b"2"), ("top.jpg", b"3")]);

        let sub = VPath::Fs(zip_path.clone()).join("sub");
        assert!(sub.is_dir());
        assert!(!sub.is_file());
        let names: Vec<String> = sub.iterdir().unwrap().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg"]);
        assert_eq!(sub.parent().unwrap(), VPath::Fs(zip_path));
    }

    #[test]
    fn plain_directory_iterates_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir(dir.path().join("c")).unwrap();

        let names: Vec<String> =
            VPath::Fs(dir.path().to_path_buf()).iterdir().unwrap().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c"]);
    }

    #[test]
    fn with_name_replaces_final_component() {
        let p = VPath::Fs(PathBuf::from("/x/y/a.jpg"));
        assert_eq!(p.with_name("b.jpg").native(), PathBuf::from("/x/y/b.jpg"));
        assert_eq!(p.suffix().as_deref(), Some("jpg"));
    }
}
