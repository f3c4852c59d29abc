//! Filesystem change monitoring.
//!
//! One watcher per library root. Raw notify events are mapped into the
//! change vocabulary the library consumes and forwarded into a tokio
//! channel; coalescing of rapid repeats happens downstream in the library's
//! debounced update loop.

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// What happened to a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeAction {
    Added,
    Removed,
    Modified,
    /// A rename whose old name is known; `old_path` carries it.
    Renamed,
    /// The old-name half of a rename whose new name never arrived.
    RenamedOldName,
}

/// One filesystem change, in arrival order.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub old_path: Option<PathBuf>,
    pub action: ChangeAction,
}

/// Map a notify event to our change vocabulary. Access/other events map to
/// nothing.
fn translate(event: notify::Event) -> Vec<ChangeEvent> {
    let one = |action: ChangeAction, paths: Vec<PathBuf>| -> Vec<ChangeEvent> {
        paths.into_iter().map(|path| ChangeEvent { path, old_path: None, action }).collect()
    };

    match event.kind {
        EventKind::Create(_) => one(ChangeAction::Added, event.paths),
        EventKind::Remove(_) => one(ChangeAction::Removed, event.paths),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths;
            if paths.len() == 2 {
                let new = paths.pop().unwrap();
                let old = paths.pop().unwrap();
                vec![ChangeEvent { path: new, old_path: Some(old), action: ChangeAction::Renamed }]
            } else {
                one(ChangeAction::Modified, paths)
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            one(ChangeAction::RenamedOldName, event.paths)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => one(ChangeAction::Added, event.paths),
        EventKind::Modify(_) => one(ChangeAction::Modified, event.paths),
        _ => Vec::new(),
    }
}

/// Start watching a library root. Returns the watcher handle (must be kept
/// alive — dropping it stops the watcher) and the event stream.
pub fn start_watcher(
    root: &Path,
) -> Option<(RecommendedWatcher, mpsc::UnboundedReceiver<ChangeEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();

    let mut watcher = match RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| {
            if let Ok(event) = res {
                for change in translate(event) {
                    let _ = tx.send(change);
                }
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create file watcher");
            return None;
        }
    };

    if let Err(e) = watcher.watch(root, RecursiveMode::Recursive) {
        tracing::error!(root = %root.display(), error = %e, "Failed to watch library root");
        return None;
    }
    tracing::info!(root = %root.display(), "Watching for changes");

    Some((watcher, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RenameMode};

    fn event(kind: EventKind, paths: Vec<&str>) -> notify::Event {
        let mut e = notify::Event::new(kind);
        e.paths = paths.into_iter().map(PathBuf::from).collect();
        e
    }

    #[test]
    fn create_maps_to_added() {
        let changes = translate(event(EventKind::Create(CreateKind::File), vec!["/l/a.jpg"]));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Added);
        assert_eq!(changes[0].path, PathBuf::from("/l/a.jpg"));
    }

    #[test]
    fn paired_rename_carries_old_path() {
        let changes = translate(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            vec!["/l/old.jpg", "/l/new.jpg"],
        ));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Renamed);
        assert_eq!(changes[0].path, PathBuf::from("/l/new.jpg"));
        assert_eq!(changes[0].old_path.as_deref(), Some(Path::new("/l/old.jpg")));
    }

    #[test]
    fn lone_rename_halves_map_to_old_name_and_added() {
        let from = translate(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            vec!["/l/old.jpg"],
        ));
        assert_eq!(from[0].action, ChangeAction::RenamedOldName);

        let to =
            translate(event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), vec!["/l/new.jpg"]));
        assert_eq!(to[0].action, ChangeAction::Added);
    }
}
