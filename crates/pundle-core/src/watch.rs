//! Incremental watch controller.
//!
//! The controller owns the live [`Job`] of a watch session. It performs the
//! initial compile, then turns batches of file-system events into a
//! [`ChangeSet`], re-walks only the affected part of the graph and notifies a
//! [`GenerateHook`] with the files that were actually retransformed.
//!
//! Batches are strictly serialized: events that arrive while a batch runs
//! queue up in the channel and form the next batch once the stream has been
//! quiet for the debounce interval. A failed batch is reported and
//! remembered; the loop itself keeps running.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{ErrorCode, PundleError, Result};
use crate::job::Job;
use crate::keys::{ChunkKey, FileKey};
use crate::master::{Master, WalkScope};
use crate::types::{Chunk, ImportResolved};

/// Default quiet period before a batch is applied.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(75);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Add,
    Modify,
    Delete,
}

/// One raw change reported by the file-system watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn add(path: impl Into<PathBuf>) -> Self {
        Self::new(FsEventKind::Add, path)
    }

    pub fn modify(path: impl Into<PathBuf>) -> Self {
        Self::new(FsEventKind::Modify, path)
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self::new(FsEventKind::Delete, path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Compiling,
}

/// Called after the initial compile and after every successful batch.
#[async_trait]
pub trait GenerateHook: Send + Sync {
    /// `changed` is empty after the initial compile.
    async fn on_generate(&self, job: &Arc<Job>, changed: &[PathBuf]) -> Result<()>;
}

/// What one batch of events invalidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// File entries to drop before re-walking (deleted paths).
    pub removed: IndexSet<FileKey>,
    /// Deleted paths.
    pub deleted: IndexSet<PathBuf>,
    /// Paths retransformed even though they are present in the job.
    pub forced: IndexSet<PathBuf>,
    /// Chunks to re-walk: every chunk whose entry or imports reference an
    /// affected path.
    pub chunks: IndexMap<ChunkKey, Chunk>,
    /// Files to re-walk: every file whose transitive imports reach a changed
    /// path.
    pub files: IndexMap<FileKey, ImportResolved>,
    /// Re-walk every configured chunk (a missing dependency may now exist).
    pub recheck: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
            && self.deleted.is_empty()
            && self.forced.is_empty()
            && self.chunks.is_empty()
            && self.files.is_empty()
            && !self.recheck
    }

    /// Changed paths handed to the generate hook, sorted.
    pub fn changed_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .forced
            .iter()
            .chain(self.deleted.iter())
            .cloned()
            .collect::<FxHashSet<_>>()
            .into_iter()
            .collect();
        paths.sort();
        paths
    }

    pub fn merge(&mut self, other: ChangeSet) {
        self.removed.extend(other.removed);
        self.deleted.extend(other.deleted);
        self.forced.extend(other.forced);
        for (key, chunk) in other.chunks {
            self.chunks.entry(key).or_insert(chunk);
        }
        for (key, file) in other.files {
            self.files.entry(key).or_insert(file);
        }
        self.recheck |= other.recheck;
    }

    fn add_chunk(&mut self, chunk: &Chunk) {
        self.chunks
            .entry(ChunkKey::of(chunk))
            .or_insert_with(|| chunk.clone());
    }
}

/// Compute the change set of one batch.
///
/// Pure over its inputs: the job is only read. The last event per path wins.
/// `manifest` is the absolute path of the root manifest; `last_failure` is
/// the error of the previous failed pass, if any.
pub fn compute_changes(
    job: &Job,
    config_chunks: &[Chunk],
    events: &[FsEvent],
    manifest: &Path,
    last_failure: Option<&PundleError>,
) -> ChangeSet {
    let mut latest: IndexMap<&Path, FsEventKind> = IndexMap::new();
    for event in events {
        latest.insert(event.path.as_path(), event.kind);
    }

    let files = job.files();
    let mut chunks: Vec<Chunk> = job.chunks().into_iter().map(|(_, chunk)| chunk).collect();
    chunks.extend(config_chunks.iter().cloned());

    // path -> paths of the files importing it
    let mut importers: FxHashMap<&Path, Vec<&Path>> = FxHashMap::default();
    // path -> every resolved form it appears under
    let mut known: FxHashMap<PathBuf, IndexSet<ImportResolved>> = FxHashMap::default();
    for (_, file) in &files {
        known
            .entry(file.file_path.clone())
            .or_default()
            .insert(file.resolved());
        for import in &file.imports {
            importers
                .entry(import.file_path.as_path())
                .or_default()
                .push(file.file_path.as_path());
            known
                .entry(import.file_path.clone())
                .or_default()
                .insert(import.clone());
        }
    }
    for chunk in &chunks {
        for import in chunk.files() {
            let path = import.file_path.clone();
            known.entry(path).or_default().insert(import);
        }
    }

    let failed_path = last_failure.and_then(|err| err.path.as_deref());
    let resolve_failed = last_failure.is_some_and(|err| err.is(ErrorCode::ResolveFailed));

    let mut changes = ChangeSet::default();
    let mut seeds: Vec<&Path> = Vec::new();
    for (&path, &kind) in &latest {
        match kind {
            FsEventKind::Delete => {
                let removed = job.file_keys_at(path);
                let referenced = importers.contains_key(path);
                if removed.is_empty() && !referenced {
                    continue;
                }
                changes.removed.extend(removed);
                changes.deleted.insert(path.to_path_buf());
                for importer in importers.get(path).into_iter().flatten() {
                    changes.forced.insert(importer.to_path_buf());
                }
                seeds.push(path);
            }
            FsEventKind::Add | FsEventKind::Modify => {
                if known.contains_key(path) || failed_path == Some(path) {
                    changes.forced.insert(path.to_path_buf());
                    seeds.push(path);
                }
                if resolve_failed && (kind == FsEventKind::Add || path == manifest) {
                    changes.recheck = true;
                }
            }
        }
    }

    // close over reverse import edges
    let mut affected: FxHashSet<&Path> = FxHashSet::default();
    let mut queue: VecDeque<&Path> = seeds.into_iter().collect();
    while let Some(path) = queue.pop_front() {
        if !affected.insert(path) {
            continue;
        }
        for importer in importers.get(path).into_iter().flatten() {
            queue.push_back(*importer);
        }
    }

    for &path in &affected {
        if changes.deleted.contains(path) {
            continue;
        }
        for import in known.get(path).into_iter().flatten() {
            changes.files.insert(FileKey::of(import), import.clone());
        }
    }
    for chunk in &chunks {
        if affected.iter().any(|path| chunk.references(path)) {
            changes.add_chunk(chunk);
        }
    }
    if changes.recheck {
        for chunk in config_chunks {
            changes.add_chunk(chunk);
        }
    }
    changes
}

/// The previous failed pass: its error and everything it tried to rebuild.
struct Failure {
    error: PundleError,
    pending: ChangeSet,
}

pub struct WatchController {
    master: Arc<Master>,
    job: Arc<Job>,
    hook: Arc<dyn GenerateHook>,
    debounce: Duration,
    manifest: PathBuf,
    config_chunks: Vec<Chunk>,
    failure: Option<Failure>,
    state: watch::Sender<WatchState>,
}

impl WatchController {
    pub fn new(master: Arc<Master>, hook: Arc<dyn GenerateHook>) -> Self {
        let manifest = master.ctx().root_manifest();
        let (state, _) = watch::channel(WatchState::Idle);
        Self {
            master,
            job: Arc::new(Job::new()),
            hook,
            debounce: DEFAULT_DEBOUNCE,
            manifest,
            config_chunks: Vec::new(),
            failure: None,
            state,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub fn config_chunks(&self) -> &[Chunk] {
        &self.config_chunks
    }

    /// Error of the last failed pass, cleared by the next successful one.
    pub fn last_failure(&self) -> Option<&PundleError> {
        self.failure.as_ref().map(|failure| &failure.error)
    }

    pub fn subscribe(&self) -> watch::Receiver<WatchState> {
        self.state.subscribe()
    }

    /// Build the graph from the configured entries.
    ///
    /// Only `WORKER_CRASHED` is returned as an error. Any other failure is
    /// reported and remembered so the next relevant event retries it.
    pub async fn initial_compile(&mut self) -> Result<()> {
        self.state.send_replace(WatchState::Compiling);
        let start = Instant::now();
        let result = self.compile_entries().await;
        self.state.send_replace(WatchState::Idle);

        match result {
            Ok(()) => {
                tracing::info!(
                    files = self.job.file_count(),
                    chunks = self.job.chunk_count(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Initial build complete"
                );
                self.failure = None;
                self.hook.on_generate(&self.job, &[]).await
            }
            Err(err) if err.is(ErrorCode::WorkerCrashed) => Err(err),
            Err(err) => {
                self.master.reporter().report(&err);
                let pending = ChangeSet {
                    chunks: self
                        .config_chunks
                        .iter()
                        .map(|chunk| (ChunkKey::of(chunk), chunk.clone()))
                        .collect(),
                    recheck: true,
                    ..ChangeSet::default()
                };
                self.failure = Some(Failure {
                    error: err,
                    pending,
                });
                Ok(())
            }
        }
    }

    async fn compile_entries(&mut self) -> Result<()> {
        self.config_chunks = self.master.entry_chunks().await?;
        self.master
            .walk(&self.job, &self.config_chunks, &[], WalkScope::full())
            .await
    }

    /// Apply one batch of events.
    ///
    /// Returns the changed paths handed to the hook (empty when the batch
    /// touched nothing in the graph). A failed batch is reported before its
    /// error is returned.
    pub async fn apply(&mut self, events: &[FsEvent]) -> Result<Vec<PathBuf>> {
        for event in events {
            self.master.ctx().invalidate_manifest(&event.path);
        }

        let fresh = compute_changes(
            &self.job,
            &self.config_chunks,
            events,
            &self.manifest,
            self.last_failure(),
        );
        if fresh.is_empty() {
            tracing::debug!(events = events.len(), "Batch does not touch the graph");
            return Ok(Vec::new());
        }

        self.state.send_replace(WatchState::Compiling);
        let start = Instant::now();
        let mut changes = fresh;
        if let Some(previous) = self.failure.take() {
            changes.merge(previous.pending);
        }
        let result = self.rebuild(&changes).await;
        self.state.send_replace(WatchState::Idle);

        match result {
            Ok(()) => {
                let changed = changes.changed_paths();
                tracing::info!(
                    changed = changed.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Rebuild complete"
                );
                if let Err(err) = self.hook.on_generate(&self.job, &changed).await {
                    self.master.reporter().report(&err);
                    return Err(err);
                }
                Ok(changed)
            }
            Err(err) => {
                self.master.reporter().report(&err);
                self.failure = Some(Failure {
                    error: err.clone(),
                    pending: changes,
                });
                Err(err)
            }
        }
    }

    async fn rebuild(&mut self, changes: &ChangeSet) -> Result<()> {
        if changes.recheck && self.config_chunks.is_empty() {
            self.config_chunks = self.master.entry_chunks().await?;
        }
        for key in &changes.removed {
            self.job.remove_file(key);
            self.master.evict(key);
        }

        let mut chunks: Vec<Chunk> = changes.chunks.values().cloned().collect();
        if changes.recheck {
            for chunk in &self.config_chunks {
                let key = ChunkKey::of(chunk);
                if !changes.chunks.contains_key(&key) {
                    chunks.push(chunk.clone());
                }
            }
        }
        let files: Vec<ImportResolved> = changes.files.values().cloned().collect();

        tracing::debug!(
            chunks = chunks.len(),
            files = files.len(),
            forced = changes.forced.len(),
            recheck = changes.recheck,
            "Re-walking changed graph"
        );
        let scope = WalkScope::incremental(changes.forced.iter().cloned(), changes.recheck);
        self.master.walk(&self.job, &chunks, &files, scope).await
    }

    /// Initial compile, then batches until the event channel closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<FsEvent>) -> Result<()> {
        self.initial_compile().await?;

        loop {
            let Some(first) = events.recv().await else {
                return Ok(());
            };
            let mut batch = vec![first];
            let mut closed = false;
            loop {
                match tokio::time::timeout(self.debounce, events.recv()).await {
                    Ok(Some(event)) => batch.push(event),
                    Ok(None) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }

            // errors were reported by apply
            let _ = self.apply(&batch).await;
            if closed {
                return Ok(());
            }
        }
    }

    /// Run the controller on its own task.
    pub fn spawn(self, events: mpsc::Receiver<FsEvent>) -> WatchHandle {
        let state = self.subscribe();
        let job = self.job.clone();
        let task = tokio::spawn(self.run(events));
        WatchHandle { state, job, task }
    }
}

/// Handle on a spawned [`WatchController`].
pub struct WatchHandle {
    state: watch::Receiver<WatchState>,
    job: Arc<Job>,
    task: JoinHandle<Result<()>>,
}

impl WatchHandle {
    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub fn subscribe(&self) -> watch::Receiver<WatchState> {
        self.state.clone()
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the controller to stop.
    pub async fn join(self) -> Result<()> {
        self.task.await.map_err(|err| {
            if err.is_panic() {
                PundleError::worker_crashed("watch controller panicked")
            } else {
                PundleError::worker_crashed("watch controller was cancelled")
            }
        })?
    }
}
