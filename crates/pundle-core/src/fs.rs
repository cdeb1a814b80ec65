//! Filesystem abstraction used by the build core.
//!
//! The transform facade reads contents and the transform cache validates
//! entries through [`FileSystem`]. [`NativeFileSystem`] talks to the real disk;
//! [`MemoryFileSystem`] backs tests and virtual projects.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use parking_lot::RwLock;
use path_clean::PathClean;
use rustc_hash::FxHashMap;

/// Result type for filesystem operations
pub type FsResult<T> = Result<T, FsError>;

/// Errors that can occur during filesystem operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum FsError {
    /// File not found
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),
}

/// The parts of a file's metadata that decide cache validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub modified_nanos: u128,
    pub is_dir: bool,
}

impl FileStat {
    /// Validity string stored next to cached transforms.
    ///
    /// Uses full nanosecond precision so edits within the same second are
    /// still detected.
    pub fn stat_key(&self) -> String {
        format!("{}-{}", self.modified_nanos, self.size)
    }
}

#[async_trait]
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    async fn read_file(&self, path: &Path) -> FsResult<Vec<u8>>;

    async fn stat(&self, path: &Path) -> FsResult<FileStat>;

    async fn is_file(&self, path: &Path) -> bool {
        matches!(self.stat(path).await, Ok(stat) if !stat.is_dir)
    }

    async fn is_dir(&self, path: &Path) -> bool {
        matches!(self.stat(path).await, Ok(stat) if stat.is_dir)
    }
}

/// Disk-backed filesystem. Blocking calls run on the blocking thread pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFileSystem;

fn io_error(path: &Path, err: std::io::Error) -> FsError {
    if err.kind() == std::io::ErrorKind::NotFound {
        FsError::NotFound(path.to_path_buf())
    } else {
        FsError::Io(format!("{}: {}", path.display(), err))
    }
}

#[async_trait]
impl FileSystem for NativeFileSystem {
    async fn read_file(&self, path: &Path) -> FsResult<Vec<u8>> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || std::fs::read(&path).map_err(|e| io_error(&path, e)))
            .await
            .map_err(|e| FsError::Io(format!("Task join error: {}", e)))?
    }

    async fn stat(&self, path: &Path) -> FsResult<FileStat> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let meta = std::fs::metadata(&path).map_err(|e| io_error(&path, e))?;
            let modified_nanos = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            Ok(FileStat {
                size: meta.len(),
                modified_nanos,
                is_dir: meta.is_dir(),
            })
        })
        .await
        .map_err(|e| FsError::Io(format!("Task join error: {}", e)))?
    }
}

#[derive(Debug, Clone)]
struct MemoryFile {
    contents: Vec<u8>,
    modified: u64,
}

/// In-memory filesystem.
///
/// Every write bumps a logical clock that stands in for the modification
/// time, so rewriting a file with same-sized contents still invalidates its
/// cache entry. Directories are implied by the files below them.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: RwLock<FxHashMap<PathBuf, MemoryFile>>,
    clock: AtomicU64,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        let modified = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.files.write().insert(
            path.as_ref().clean(),
            MemoryFile {
                contents: contents.into(),
                modified,
            },
        );
    }

    pub fn remove(&self, path: impl AsRef<Path>) -> bool {
        self.files.write().remove(&path.as_ref().clean()).is_some()
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.files.read().contains_key(&path.as_ref().clean())
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn read_file(&self, path: &Path) -> FsResult<Vec<u8>> {
        self.files
            .read()
            .get(&path.clean())
            .map(|f| f.contents.clone())
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))
    }

    async fn stat(&self, path: &Path) -> FsResult<FileStat> {
        let path = path.clean();
        let files = self.files.read();
        if let Some(file) = files.get(&path) {
            return Ok(FileStat {
                size: file.contents.len() as u64,
                modified_nanos: u128::from(file.modified),
                is_dir: false,
            });
        }
        if files.keys().any(|p| p.starts_with(&path)) {
            return Ok(FileStat {
                size: 0,
                modified_nanos: 0,
                is_dir: true,
            });
        }
        Err(FsError::NotFound(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_write_bumps_stat() {
        let fs = MemoryFileSystem::new();
        fs.write("/root/a.js", "one");
        let first = fs.stat(Path::new("/root/a.js")).await.unwrap();
        fs.write("/root/a.js", "two");
        let second = fs.stat(Path::new("/root/a.js")).await.unwrap();

        assert_eq!(first.size, second.size);
        assert_ne!(first.stat_key(), second.stat_key());
    }

    #[tokio::test]
    async fn test_memory_directories_are_implied() {
        let fs = MemoryFileSystem::new();
        fs.write("/root/src/a.js", "");
        assert!(fs.is_dir(Path::new("/root/src")).await);
        assert!(fs.is_file(Path::new("/root/src/a.js")).await);
        assert!(!fs.is_file(Path::new("/root/src/b.js")).await);
    }

    #[tokio::test]
    async fn test_memory_remove() {
        let fs = MemoryFileSystem::new();
        fs.write("/root/a.js", "x");
        assert!(fs.remove("/root/./a.js"));
        assert!(matches!(
            fs.read_file(Path::new("/root/a.js")).await,
            Err(FsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_native_read_and_stat() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.js");
        std::fs::write(&path, "export {}").unwrap();

        let fs = NativeFileSystem;
        assert_eq!(fs.read_file(&path).await.unwrap(), b"export {}");
        let stat = fs.stat(&path).await.unwrap();
        assert_eq!(stat.size, 9);
        assert!(!stat.is_dir);
        assert!(fs.is_dir(dir.path()).await);
        assert!(matches!(
            fs.read_file(&dir.path().join("missing.js")).await,
            Err(FsError::NotFound(_))
        ));
    }
}
