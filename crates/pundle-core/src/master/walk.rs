//! The mutually recursive graph walk.
//!
//! `transform_chunk` ensures a chunk and everything it reaches is current in
//! the job; `transform_file_tree` does the same for one file. Both claim
//! their key in the job's lock table first, so each key has at most one
//! in-flight computation. Later callers await that computation or, when
//! waiting would close a cycle, return immediately.
//!
//! Failures roll the failed key back to its previous value (or remove it)
//! before the key is released.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, join_all};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use super::{Master, first_error};
use crate::error::Result;
use crate::job::{Claim, ClaimGuard, Job, Waiter};
use crate::keys::{ChunkKey, FileKey, NodeKey};
use crate::types::{Chunk, ImportResolved, validate_chunk};

/// Per-pass walk settings.
///
/// `forced` paths are retransformed even when already present, at most once
/// per pass. When anything is forced, or `recheck` is set, present chunks
/// are re-walked once as well so newly reachable files are picked up.
#[derive(Debug, Default)]
pub struct WalkScope {
    forced: FxHashSet<PathBuf>,
    recheck: bool,
    rebuilt: Mutex<FxHashSet<NodeKey>>,
}

impl WalkScope {
    /// A batch pass: everything already present is reused.
    pub fn full() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An incremental pass.
    pub fn incremental(forced: impl IntoIterator<Item = PathBuf>, recheck: bool) -> Arc<Self> {
        Arc::new(Self {
            forced: forced.into_iter().collect(),
            recheck,
            rebuilt: Mutex::new(FxHashSet::default()),
        })
    }

    pub fn forces(&self, path: &Path) -> bool {
        self.forced.contains(path)
    }

    fn forces_chunks(&self) -> bool {
        self.recheck || !self.forced.is_empty()
    }

    /// Decide whether a present value is reused. Runs inside the job's lock
    /// table critical section.
    fn reuse(&self, key: &NodeKey, present: bool, forced: bool) -> bool {
        let mut rebuilt = self.rebuilt.lock();
        if !present {
            rebuilt.insert(key.clone());
            return false;
        }
        if !forced {
            return true;
        }
        !rebuilt.insert(key.clone())
    }
}

/// `Ok` when this caller owns the key. Otherwise the waiter to await, if any.
fn owner_or_return(claim: Claim, node: &NodeKey) -> std::result::Result<ClaimGuard, Option<Waiter>> {
    match claim {
        Claim::Owner(guard) => Ok(guard),
        Claim::Wait(waiter) => {
            tracing::trace!(key = %node, "Awaiting in-flight node");
            Err(Some(waiter))
        }
        Claim::Busy | Claim::Cycle => {
            tracing::trace!(key = %node, "Node is locked upstream, skipping");
            Err(None)
        }
        Claim::Done => Err(None),
    }
}

impl Master {
    /// Ensure `chunk` and everything it transitively imports is present and
    /// current in `job`.
    pub fn transform_chunk(
        self: &Arc<Self>,
        chunk: Chunk,
        job: Arc<Job>,
        parent: Option<NodeKey>,
        scope: Arc<WalkScope>,
    ) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        async move {
            validate_chunk(&chunk)?;
            let key = ChunkKey::of(&chunk);
            let node = NodeKey::Chunk(key.clone());
            let forced = scope.forces_chunks();

            let claim = job.claim(&node, parent.as_ref(), |present| {
                scope.reuse(&node, present, forced)
            });
            let guard = match owner_or_return(claim, &node) {
                Ok(guard) => guard,
                Err(Some(waiter)) => return waiter.wait().await,
                Err(None) => return Ok(()),
            };

            let previous = job.set_chunk(key.clone(), chunk.clone());
            let walks = chunk.files().into_iter().map(|file| {
                this.transform_file_tree(file, job.clone(), Some(node.clone()), scope.clone())
            });
            let result = first_error(join_all(walks).await);

            if let Err(err) = &result {
                tracing::debug!(chunk = %chunk.display_name(), error = %err, "Rolling back chunk");
                match previous {
                    Some(previous) => {
                        job.set_chunk(key, previous);
                    }
                    None => {
                        job.remove_chunk(&key);
                    }
                }
            }
            guard.finish(result)
        }
        .boxed()
    }

    /// Ensure one file and everything it imports or spawns is present and
    /// current in `job`.
    pub fn transform_file_tree(
        self: &Arc<Self>,
        import: ImportResolved,
        job: Arc<Job>,
        parent: Option<NodeKey>,
        scope: Arc<WalkScope>,
    ) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        async move {
            let key = FileKey::of(&import);
            let node = NodeKey::File(key.clone());
            let forced = scope.forces(&import.file_path);

            let claim = job.claim(&node, parent.as_ref(), |present| {
                scope.reuse(&node, present, forced)
            });
            let guard = match owner_or_return(claim, &node) {
                Ok(guard) => guard,
                Err(Some(waiter)) => return waiter.wait().await,
                Err(None) => return Ok(()),
            };

            let previous = job.get_file(&key);
            let result = this.build_file_tree(&import, &key, &node, &job, &scope).await;

            if let Err(err) = &result {
                tracing::debug!(
                    path = %import.file_path.display(),
                    error = %err,
                    restored = previous.is_some(),
                    "Rolling back file"
                );
                match previous {
                    Some(previous) => {
                        job.set_file(key, previous);
                    }
                    None => {
                        job.remove_file(&key);
                    }
                }
            }
            guard.finish(result)
        }
        .boxed()
    }

    async fn build_file_tree(
        self: &Arc<Self>,
        import: &ImportResolved,
        key: &FileKey,
        node: &NodeKey,
        job: &Arc<Job>,
        scope: &Arc<WalkScope>,
    ) -> Result<()> {
        let transformed = Arc::new(self.transform(import).await?);
        job.set_file(key.clone(), transformed.clone());

        let imports = transformed.imports.iter().map(|child| {
            self.transform_file_tree(child.clone(), job.clone(), Some(node.clone()), scope.clone())
        });
        let chunks = transformed.chunks.iter().map(|chunk| {
            self.transform_chunk(chunk.clone(), job.clone(), Some(node.clone()), scope.clone())
        });
        first_error(join_all(imports.chain(chunks)).await)
    }
}
