//! Filesystem event source for watch mode.
//!
//! Watches the project root recursively and forwards relevant changes as
//! [`FsEvent`]s. Batching is left to the watch controller's debounce.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use pundle_core::FsEvent;
use tokio::sync::mpsc;

use crate::error::{CliError, Result};

const ALWAYS_IGNORED: &[&str] = &["node_modules"];

/// Paths that never produce events.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    root: PathBuf,
    /// Absolute directories, e.g. the output and cache directories.
    dirs: Vec<PathBuf>,
    /// `*.ext` suffixes or root-relative prefixes.
    patterns: Vec<String>,
}

impl IgnoreRules {
    pub fn new(root: impl Into<PathBuf>, dirs: Vec<PathBuf>, patterns: Vec<String>) -> Self {
        Self {
            root: root.into(),
            dirs,
            patterns,
        }
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return true;
        };
        if self.dirs.iter().any(|dir| path.starts_with(dir)) {
            return true;
        }

        for component in relative.components() {
            let Some(name) = component.as_os_str().to_str() else {
                continue;
            };
            if name.starts_with('.') && name != "." && name != ".." {
                return true;
            }
            if ALWAYS_IGNORED.contains(&name) {
                return true;
            }
        }

        let relative = relative.to_string_lossy();
        self.patterns.iter().any(|pattern| match pattern.strip_prefix('*') {
            Some(suffix) => relative.ends_with(suffix),
            None => relative.starts_with(pattern.as_str()),
        })
    }
}

/// Map a notify event onto controller events.
pub fn translate(event: &Event) -> Vec<FsEvent> {
    let paths = &event.paths;
    match event.kind {
        EventKind::Create(_) => paths.iter().map(FsEvent::add).collect(),
        EventKind::Remove(_) => paths.iter().map(FsEvent::delete).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.iter().map(FsEvent::delete).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.iter().map(FsEvent::add).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match paths.as_slice() {
            [from, to] => vec![FsEvent::delete(from), FsEvent::add(to)],
            _ => paths.iter().map(FsEvent::modify).collect(),
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => paths.iter().map(FsEvent::modify).collect(),
        _ => Vec::new(),
    }
}

/// Recursive watcher feeding a channel. Dropping it stops the events and
/// closes the channel.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    pub fn new(rules: IgnoreRules) -> Result<(Self, mpsc::Receiver<FsEvent>)> {
        let root = rules.root.clone();
        if !root.is_dir() {
            return Err(CliError::InvalidArgument(format!(
                "cannot watch '{}': not a directory",
                root.display()
            )));
        }

        let (tx, rx) = mpsc::channel(256);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(error = %err, "File watcher error");
                    return;
                }
            };
            for change in translate(&event) {
                if rules.is_ignored(&change.path) {
                    continue;
                }
                tracing::trace!(path = %change.path.display(), kind = ?change.kind, "File event");
                // the receiver is gone once the session stops
                if tx.blocking_send(change).is_err() {
                    return;
                }
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok((
            Self {
                _watcher: watcher,
                root,
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use pundle_core::FsEventKind;

    fn rules(patterns: &[&str]) -> IgnoreRules {
        IgnoreRules::new(
            "/project",
            vec![PathBuf::from("/project/dist")],
            patterns.iter().map(|p| p.to_string()).collect(),
        )
    }

    #[test]
    fn test_ignores_node_modules_hidden_and_outputs() {
        let rules = rules(&[]);
        assert!(rules.is_ignored(Path::new("/project/node_modules/pkg/index.js")));
        assert!(rules.is_ignored(Path::new("/project/.pundle/cache/transform.redb")));
        assert!(rules.is_ignored(Path::new("/project/src/.hidden/a.js")));
        assert!(rules.is_ignored(Path::new("/project/dist/index.js")));
        assert!(rules.is_ignored(Path::new("/elsewhere/a.js")));
        assert!(!rules.is_ignored(Path::new("/project/src/index.js")));
    }

    #[test]
    fn test_ignore_patterns() {
        let rules = rules(&["*.log", "tmp/"]);
        assert!(rules.is_ignored(Path::new("/project/debug.log")));
        assert!(rules.is_ignored(Path::new("/project/tmp/a.js")));
        assert!(!rules.is_ignored(Path::new("/project/src/tmp.js")));
    }

    #[test]
    fn test_translate() {
        let path = PathBuf::from("/project/a.js");
        let event = |kind| Event::new(kind).add_path(path.clone());

        let created = translate(&event(EventKind::Create(CreateKind::File)));
        assert_eq!(created[0].kind, FsEventKind::Add);

        let modified = translate(&event(EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert_eq!(modified[0].kind, FsEventKind::Modify);

        let removed = translate(&event(EventKind::Remove(RemoveKind::File)));
        assert_eq!(removed[0].kind, FsEventKind::Delete);

        let renamed = translate(
            &Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(PathBuf::from("/project/old.js"))
                .add_path(PathBuf::from("/project/new.js")),
        );
        assert_eq!(
            renamed,
            vec![FsEvent::delete("/project/old.js"), FsEvent::add("/project/new.js")]
        );

        assert!(translate(&event(EventKind::Access(notify::event::AccessKind::Any))).is_empty());
    }
}
