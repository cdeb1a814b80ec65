//! Per-session state shared with every collaborator call.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

use crate::fs::{FileSystem, NativeFileSystem};

/// Default manifest file name looked up by resolvers.
pub const DEFAULT_MANIFEST: &str = "package.json";

/// Build-session context.
///
/// Created when a build or watch session starts and dropped with it. Holds
/// the caches that collaborators would otherwise keep in globals: the
/// numeric path id table and parsed manifests.
#[derive(Debug)]
pub struct Context {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    manifest_name: String,
    path_ids: DashMap<PathBuf, u32>,
    next_path_id: AtomicU32,
    manifests: DashMap<PathBuf, Option<Arc<serde_json::Value>>>,
}

impl Context {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            fs,
            manifest_name: DEFAULT_MANIFEST.to_string(),
            path_ids: DashMap::new(),
            next_path_id: AtomicU32::new(0),
            manifests: DashMap::new(),
        }
    }

    /// Context over the real filesystem.
    pub fn native(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Arc::new(NativeFileSystem))
    }

    pub fn with_manifest_name(mut self, name: impl Into<String>) -> Self {
        self.manifest_name = name.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn manifest_name(&self) -> &str {
        &self.manifest_name
    }

    /// The root-level manifest path, e.g. `<root>/package.json`.
    pub fn root_manifest(&self) -> PathBuf {
        self.root.join(&self.manifest_name)
    }

    /// Stable small integer for a path, assigned on first use.
    pub fn path_id(&self, path: &Path) -> u32 {
        if let Some(id) = self.path_ids.get(path) {
            return *id;
        }
        *self
            .path_ids
            .entry(path.to_path_buf())
            .or_insert_with(|| self.next_path_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Assign ids to every path not seen yet, in sorted order.
    pub fn assign_path_ids(&self, paths: impl IntoIterator<Item = PathBuf>) {
        let mut fresh: Vec<PathBuf> = paths
            .into_iter()
            .filter(|path| !self.path_ids.contains_key(path))
            .collect();
        fresh.sort();
        fresh.dedup();
        for path in fresh {
            self.path_id(&path);
        }
    }

    /// Parsed manifest in `dir`, or `None` when absent or unparsable.
    pub async fn manifest(&self, dir: &Path) -> Option<Arc<serde_json::Value>> {
        let path = dir.join(&self.manifest_name);
        if let Some(cached) = self.manifests.get(&path) {
            return cached.clone();
        }

        let parsed = match self.fs.read_file(&path).await {
            Ok(bytes) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(value) => Some(Arc::new(value)),
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "Ignoring unparsable manifest");
                    None
                }
            },
            Err(_) => None,
        };
        self.manifests.insert(path, parsed.clone());
        parsed
    }

    /// Forget a cached manifest after it changed on disk.
    pub fn invalidate_manifest(&self, path: &Path) -> bool {
        self.manifests.remove(path).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;

    #[test]
    fn test_path_ids_are_stable() {
        let ctx = Context::new("/root", Arc::new(MemoryFileSystem::new()));
        let a = ctx.path_id(Path::new("/root/a.js"));
        let b = ctx.path_id(Path::new("/root/b.js"));
        assert_ne!(a, b);
        assert_eq!(ctx.path_id(Path::new("/root/a.js")), a);
    }

    #[test]
    fn test_assigned_ids_follow_path_order() {
        let ctx = Context::new("/root", Arc::new(MemoryFileSystem::new()));
        let seen = ctx.path_id(Path::new("/root/z.js"));
        ctx.assign_path_ids(
            ["/root/c.js", "/root/a.js", "/root/z.js", "/root/b.js"].map(PathBuf::from),
        );

        assert_eq!(ctx.path_id(Path::new("/root/z.js")), seen);
        assert_eq!(ctx.path_id(Path::new("/root/a.js")), seen + 1);
        assert_eq!(ctx.path_id(Path::new("/root/b.js")), seen + 2);
        assert_eq!(ctx.path_id(Path::new("/root/c.js")), seen + 3);
    }

    #[tokio::test]
    async fn test_manifest_is_cached_until_invalidated() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.write("/root/package.json", r#"{"main": "a.js"}"#);
        let ctx = Context::new("/root", fs.clone());

        let manifest = ctx.manifest(Path::new("/root")).await.unwrap();
        assert_eq!(manifest["main"], "a.js");

        fs.write("/root/package.json", r#"{"main": "b.js"}"#);
        assert_eq!(ctx.manifest(Path::new("/root")).await.unwrap()["main"], "a.js");

        assert!(ctx.invalidate_manifest(&ctx.root_manifest()));
        assert_eq!(ctx.manifest(Path::new("/root")).await.unwrap()["main"], "b.js");
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let ctx = Context::new("/root", Arc::new(MemoryFileSystem::new()));
        assert!(ctx.manifest(Path::new("/root")).await.is_none());
    }
}
