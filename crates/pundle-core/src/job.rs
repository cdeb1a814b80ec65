//! The mutable build graph.
//!
//! A [`Job`] holds every transformed file and every chunk reached so far,
//! plus the lock table that guarantees at most one in-flight computation per
//! key. The lock table is a single mutex: checking a key, checking whether
//! its value is already present and taking the lock happen in one critical
//! section.
//!
//! Lock order is `locks` before `files`/`chunks`. No lock is held across an
//! await.
//!
//! In-flight keys publish a shared outcome so a second caller can await the
//! first caller's result instead of returning empty-handed. The table also
//! tracks who waits on whom; a wait that would close a cycle (cyclic
//! imports) is refused and the caller returns immediately.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{PundleError, Result};
use crate::keys::{ChunkKey, FileKey, NodeKey};
use crate::types::{Chunk, ImportTransformed};

/// Outcome of an in-flight computation, shareable between waiters.
pub type SharedOutcome = Shared<BoxFuture<'static, Result<()>>>;

struct InFlight {
    /// `None` for keys taken through [`Job::try_lock`].
    outcome: Option<SharedOutcome>,
    parent: Option<NodeKey>,
}

#[derive(Default)]
struct LockTable {
    inflight: FxHashMap<NodeKey, InFlight>,
    /// Wait-for graph: key -> keys it is currently waiting on (with counts).
    waits: FxHashMap<NodeKey, FxHashMap<NodeKey, usize>>,
}

impl LockTable {
    fn add_edge(&mut self, from: &NodeKey, to: &NodeKey) {
        *self
            .waits
            .entry(from.clone())
            .or_default()
            .entry(to.clone())
            .or_insert(0) += 1;
    }

    fn remove_edge(&mut self, from: &NodeKey, to: &NodeKey) {
        let Some(targets) = self.waits.get_mut(from) else {
            return;
        };
        if let Some(count) = targets.get_mut(to) {
            *count -= 1;
            if *count == 0 {
                targets.remove(to);
            }
        }
        if targets.is_empty() {
            self.waits.remove(from);
        }
    }

    fn reaches(&self, from: &NodeKey, target: &NodeKey) -> bool {
        let mut seen: FxHashSet<&NodeKey> = FxHashSet::default();
        let mut queue: VecDeque<&NodeKey> = VecDeque::from([from]);
        while let Some(node) = queue.pop_front() {
            if node == target {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(next) = self.waits.get(node) {
                queue.extend(next.keys());
            }
        }
        false
    }

    fn release(&mut self, key: &NodeKey) {
        if let Some(parent) = self.inflight.remove(key).and_then(|entry| entry.parent) {
            self.remove_edge(&parent, key);
        }
        self.waits.remove(key);
    }
}

/// Result of [`Job::claim`].
pub enum Claim {
    /// The caller owns the key and must finish the guard.
    Owner(ClaimGuard),
    /// Another task owns the key; await its outcome.
    Wait(Waiter),
    /// Locked without a shared outcome (plain `try_lock`).
    Busy,
    /// Waiting would close a cycle in the wait-for graph.
    Cycle,
    /// Already present and the caller chose to reuse it.
    Done,
}

/// Ownership of an in-flight key.
///
/// [`ClaimGuard::finish`] releases the key and publishes the outcome to
/// waiters. Dropping the guard without finishing releases the key and the
/// waiters observe `WORKER_CRASHED`.
pub struct ClaimGuard {
    job: Arc<Job>,
    key: NodeKey,
    tx: Option<oneshot::Sender<Result<()>>>,
    released: bool,
}

impl ClaimGuard {
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn finish(mut self, result: Result<()>) -> Result<()> {
        self.release();
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result.clone());
        }
        result
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.job.locks.lock().release(&self.key);
        }
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.release();
    }
}

struct WaitEdge {
    job: Arc<Job>,
    from: NodeKey,
    to: NodeKey,
}

impl Drop for WaitEdge {
    fn drop(&mut self) {
        self.job.locks.lock().remove_edge(&self.from, &self.to);
    }
}

/// Handle on another task's in-flight computation.
pub struct Waiter {
    outcome: SharedOutcome,
    edge: Option<WaitEdge>,
}

impl Waiter {
    pub async fn wait(self) -> Result<()> {
        let Waiter { outcome, edge } = self;
        let result = outcome.await;
        drop(edge);
        result
    }
}

/// The build graph: files, chunks and the in-flight lock table.
#[derive(Default)]
pub struct Job {
    files: RwLock<IndexMap<FileKey, Arc<ImportTransformed>>>,
    chunks: RwLock<IndexMap<ChunkKey, Chunk>>,
    locks: Mutex<LockTable>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("files", &self.file_count())
            .field("chunks", &self.chunk_count())
            .field("locked", &self.locked_count())
            .finish()
    }
}

impl Clone for Job {
    /// Copy of the graph maps sharing no mutable state with the original.
    /// The copy starts with no locks held.
    fn clone(&self) -> Self {
        Self {
            files: RwLock::new(self.files.read().clone()),
            chunks: RwLock::new(self.chunks.read().clone()),
            locks: Mutex::new(LockTable::default()),
        }
    }
}

impl Job {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_file(&self, key: &FileKey) -> Option<Arc<ImportTransformed>> {
        self.files.read().get(key).cloned()
    }

    /// Insert or replace a file, returning the previous value.
    pub fn set_file(
        &self,
        key: FileKey,
        file: Arc<ImportTransformed>,
    ) -> Option<Arc<ImportTransformed>> {
        self.files.write().insert(key, file)
    }

    pub fn remove_file(&self, key: &FileKey) -> Option<Arc<ImportTransformed>> {
        self.files.write().shift_remove(key)
    }

    pub fn has_file(&self, key: &FileKey) -> bool {
        self.files.read().contains_key(key)
    }

    pub fn get_chunk(&self, key: &ChunkKey) -> Option<Chunk> {
        self.chunks.read().get(key).cloned()
    }

    pub fn set_chunk(&self, key: ChunkKey, chunk: Chunk) -> Option<Chunk> {
        self.chunks.write().insert(key, chunk)
    }

    pub fn remove_chunk(&self, key: &ChunkKey) -> Option<Chunk> {
        self.chunks.write().shift_remove(key)
    }

    pub fn has_chunk(&self, key: &ChunkKey) -> bool {
        self.chunks.read().contains_key(key)
    }

    /// Snapshot of all files in insertion order.
    pub fn files(&self) -> Vec<(FileKey, Arc<ImportTransformed>)> {
        self.files
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Snapshot of all chunks in insertion order.
    pub fn chunks(&self) -> Vec<(ChunkKey, Chunk)> {
        self.chunks
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().len()
    }

    /// Keys of every file entry for `path`, in any format.
    pub fn file_keys_at(&self, path: &Path) -> Vec<FileKey> {
        self.files
            .read()
            .iter()
            .filter(|(_, f)| f.file_path == path)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Transitive files of a chunk, dependencies before dependents.
    ///
    /// Follows `imports` edges only; chunks discovered inside files are
    /// separate outputs. Files missing from the job are skipped.
    pub fn chunk_closure(&self, chunk: &Chunk) -> Vec<Arc<ImportTransformed>> {
        let files = self.files.read();
        let mut visited: FxHashSet<FileKey> = FxHashSet::default();
        let mut order = Vec::new();

        // Iterative post-order DFS: (key, children expanded)
        let mut stack: Vec<(FileKey, bool)> = chunk
            .files()
            .iter()
            .rev()
            .map(|import| (FileKey::of(import), false))
            .collect();

        while let Some((key, expanded)) = stack.pop() {
            let Some(file) = files.get(&key) else {
                continue;
            };
            if expanded {
                order.push(file.clone());
                continue;
            }
            if !visited.insert(key.clone()) {
                continue;
            }
            stack.push((key, true));
            for import in file.imports.iter().rev() {
                let child = FileKey::of(import);
                if !visited.contains(&child) {
                    stack.push((child, false));
                }
            }
        }

        order
    }

    /// Replace this job's graph with `other`'s. Locks are untouched.
    pub fn replace_with(&self, other: Job) {
        let Job { files, chunks, .. } = other;
        *self.files.write() = files.into_inner();
        *self.chunks.write() = chunks.into_inner();
    }

    /// Take a plain lock on `key`. Returns `false` if it is already locked.
    pub fn try_lock(&self, key: &NodeKey) -> bool {
        let mut table = self.locks.lock();
        if table.inflight.contains_key(key) {
            return false;
        }
        table.inflight.insert(
            key.clone(),
            InFlight {
                outcome: None,
                parent: None,
            },
        );
        true
    }

    /// Release a lock taken with [`Job::try_lock`].
    pub fn unlock(&self, key: &NodeKey) -> bool {
        let mut table = self.locks.lock();
        match table.inflight.get(key) {
            Some(entry) if entry.outcome.is_none() => {
                table.release(key);
                true
            }
            _ => false,
        }
    }

    pub fn is_locked(&self, key: &NodeKey) -> bool {
        self.locks.lock().inflight.contains_key(key)
    }

    pub fn locked_count(&self) -> usize {
        self.locks.lock().inflight.len()
    }

    fn contains(&self, key: &NodeKey) -> bool {
        match key {
            NodeKey::File(key) => self.has_file(key),
            NodeKey::Chunk(key) => self.has_chunk(key),
        }
    }

    /// Claim `key` for computation on behalf of `parent`.
    ///
    /// `reuse` receives whether a value for `key` is already present and
    /// returns whether that value should be kept ([`Claim::Done`]). It runs
    /// inside the lock table's critical section.
    pub fn claim(
        self: &Arc<Self>,
        key: &NodeKey,
        parent: Option<&NodeKey>,
        reuse: impl FnOnce(bool) -> bool,
    ) -> Claim {
        let mut table = self.locks.lock();

        if let Some(entry) = table.inflight.get(key) {
            let Some(outcome) = entry.outcome.clone() else {
                return Claim::Busy;
            };
            let edge = match parent {
                Some(parent) if parent == key || table.reaches(key, parent) => {
                    return Claim::Cycle;
                }
                Some(parent) => {
                    table.add_edge(parent, key);
                    Some(WaitEdge {
                        job: self.clone(),
                        from: parent.clone(),
                        to: key.clone(),
                    })
                }
                None => None,
            };
            return Claim::Wait(Waiter { outcome, edge });
        }

        if reuse(self.contains(key)) {
            return Claim::Done;
        }

        let (tx, rx) = oneshot::channel::<Result<()>>();
        let label = key.to_string();
        let outcome = rx
            .map(move |received| {
                received.unwrap_or_else(|_| {
                    Err(PundleError::worker_crashed(format!(
                        "task computing {label} ended without a result"
                    )))
                })
            })
            .boxed()
            .shared();

        table.inflight.insert(
            key.clone(),
            InFlight {
                outcome: Some(outcome),
                parent: parent.cloned(),
            },
        );
        if let Some(parent) = parent {
            table.add_edge(parent, key);
        }

        Claim::Owner(ClaimGuard {
            job: self.clone(),
            key: key.clone(),
            tx: Some(tx),
            released: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::types::ImportResolved;

    fn file(path: &str, imports: &[&str]) -> (FileKey, Arc<ImportTransformed>) {
        let import = ImportResolved::new("js", path);
        let value = ImportTransformed {
            format: "js".into(),
            file_path: path.into(),
            contents: path.as_bytes().to_vec(),
            source_map: None,
            chunks: vec![],
            imports: imports
                .iter()
                .map(|p| ImportResolved::new("js", *p))
                .collect(),
        };
        (FileKey::of(&import), Arc::new(value))
    }

    fn file_node(path: &str) -> NodeKey {
        NodeKey::File(FileKey::new("js", Path::new(path)))
    }

    #[test]
    fn test_file_roundtrip_and_rollback_shape() {
        let job = Job::new();
        let (key, a1) = file("/root/a.js", &[]);
        assert!(job.set_file(key.clone(), a1.clone()).is_none());

        let (_, a2) = file("/root/a.js", &["/root/b.js"]);
        let old = job.set_file(key.clone(), a2);
        assert_eq!(old.as_deref(), Some(a1.as_ref()));

        job.set_file(key.clone(), old.unwrap());
        assert_eq!(job.get_file(&key).unwrap(), a1);
        assert_eq!(job.file_keys_at(Path::new("/root/a.js")), vec![key.clone()]);

        assert!(job.remove_file(&key).is_some());
        assert_eq!(job.file_count(), 0);
    }

    #[test]
    fn test_clone_shares_no_state() {
        let job = Job::new();
        let (key, a) = file("/root/a.js", &[]);
        job.set_file(key.clone(), a);
        assert!(job.try_lock(&NodeKey::File(key.clone())));

        let copy = job.clone();
        copy.remove_file(&key);
        assert!(job.has_file(&key));
        assert!(!copy.is_locked(&NodeKey::File(key.clone())));

        let chunk = Chunk::entry("js", "/root/a.js");
        copy.set_chunk(ChunkKey::of(&chunk), chunk);
        assert_eq!(job.chunk_count(), 0);

        job.replace_with(copy);
        assert_eq!(job.chunk_count(), 1);
        assert_eq!(job.file_count(), 0);
        assert!(job.is_locked(&NodeKey::File(key)));
    }

    #[test]
    fn test_try_lock_is_exclusive() {
        let job = Job::new();
        let key = file_node("/root/a.js");
        assert!(job.try_lock(&key));
        assert!(!job.try_lock(&key));
        assert!(job.unlock(&key));
        assert!(!job.unlock(&key));
        assert!(job.try_lock(&key));
    }

    #[test]
    fn test_claim_reuses_present_value() {
        let job = Arc::new(Job::new());
        let (key, a) = file("/root/a.js", &[]);
        job.set_file(key.clone(), a);

        assert!(matches!(
            job.claim(&NodeKey::File(key.clone()), None, |present| present),
            Claim::Done
        ));
        assert!(matches!(
            job.claim(&NodeKey::File(key), None, |_| false),
            Claim::Owner(_)
        ));
        // guard dropped: released
        assert_eq!(job.locked_count(), 0);
    }

    #[test]
    fn test_plain_lock_makes_claim_busy() {
        let job = Arc::new(Job::new());
        let key = file_node("/root/a.js");
        assert!(job.try_lock(&key));
        assert!(matches!(job.claim(&key, None, |_| false), Claim::Busy));
        // owner claims cannot be released through unlock
        job.unlock(&key);
        let Claim::Owner(guard) = job.claim(&key, None, |_| false) else {
            panic!("expected owner");
        };
        assert!(!job.unlock(&key));
        guard.finish(Ok(())).unwrap();
    }

    #[tokio::test]
    async fn test_waiters_receive_owner_result() {
        let job = Arc::new(Job::new());
        let key = file_node("/root/a.js");

        let Claim::Owner(guard) = job.claim(&key, None, |_| false) else {
            panic!("expected owner");
        };
        let Claim::Wait(first) = job.claim(&key, None, |_| false) else {
            panic!("expected waiter");
        };
        let Claim::Wait(second) = job.claim(&key, None, |_| false) else {
            panic!("expected waiter");
        };

        let failure = PundleError::transform_failed("boom");
        assert_eq!(guard.finish(Err(failure.clone())), Err(failure.clone()));
        assert_eq!(first.wait().await, Err(failure.clone()));
        assert_eq!(second.wait().await, Err(failure));
        assert!(!job.is_locked(&key));
    }

    #[tokio::test]
    async fn test_dropped_owner_is_worker_crash() {
        let job = Arc::new(Job::new());
        let key = file_node("/root/a.js");

        let Claim::Owner(guard) = job.claim(&key, None, |_| false) else {
            panic!("expected owner");
        };
        let Claim::Wait(waiter) = job.claim(&key, None, |_| false) else {
            panic!("expected waiter");
        };
        drop(guard);

        let err = waiter.wait().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::WorkerCrashed);
        assert!(!job.is_locked(&key));
    }

    #[test]
    fn test_cycles_are_refused() {
        let job = Arc::new(Job::new());
        let a = file_node("/root/a.js");
        let b = file_node("/root/b.js");

        // a owns, then a's walk owns b
        let Claim::Owner(guard_a) = job.claim(&a, None, |_| false) else {
            panic!("expected owner");
        };
        let Claim::Owner(guard_b) = job.claim(&b, Some(&a), |_| false) else {
            panic!("expected owner");
        };

        // b imports a: waiting would deadlock
        assert!(matches!(job.claim(&a, Some(&b), |_| false), Claim::Cycle));
        // a imports itself
        assert!(matches!(job.claim(&a, Some(&a), |_| false), Claim::Cycle));

        // an unrelated walk may still wait on b
        let c = NodeKey::Chunk(ChunkKey::of(&Chunk::entry("js", "/root/c.js")));
        let Claim::Owner(guard_c) = job.claim(&c, None, |_| false) else {
            panic!("expected owner");
        };
        assert!(matches!(job.claim(&b, Some(&c), |_| false), Claim::Wait(_)));

        drop(guard_c);
        guard_b.finish(Ok(())).unwrap();
        guard_a.finish(Ok(())).unwrap();
        assert_eq!(job.locked_count(), 0);
        assert!(job.locks.lock().waits.is_empty());
    }

    #[test]
    fn test_chunk_closure_is_dependency_first() {
        let job = Job::new();
        for (path, imports) in [
            ("/root/a.js", &["/root/b.js", "/root/d.js"][..]),
            ("/root/b.js", &["/root/c.js"][..]),
            ("/root/c.js", &["/root/a.js"][..]),
            ("/root/d.js", &[][..]),
        ] {
            let (key, value) = file(path, imports);
            job.set_file(key, value);
        }

        let chunk = Chunk::entry("js", "/root/a.js");
        let order: Vec<_> = job
            .chunk_closure(&chunk)
            .iter()
            .map(|f| f.file_path.display().to_string())
            .collect();
        assert_eq!(order, ["/root/c.js", "/root/b.js", "/root/d.js", "/root/a.js"]);
    }
}
