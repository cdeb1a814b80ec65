//! Build orchestrator.
//!
//! [`Master`] owns the facades, the worker lanes and the transform cache for
//! one build or watch session. It seeds chunks from the configured entries,
//! walks their file trees into a [`Job`] (see `walk.rs`), runs job
//! transformers and generates outputs.

mod walk;

pub use walk::WalkScope;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;

use crate::cache::{CacheEntry, TransformCache};
use crate::context::Context;
use crate::error::{PundleError, Result};
use crate::generator::{Generator, GeneratorFacade, OutputTemplates, ensure_distinct_paths};
use crate::job::Job;
use crate::keys::{ChunkKey, FileKey};
use crate::pool::{WorkerPool, default_lanes};
use crate::registry::{Component, Registry};
use crate::reporter::{Reporter, TracingReporter};
use crate::resolver::{ResolveHandle, ResolveOutcome, Resolver, ResolverFacade};
use crate::transformer::{TransformFacade, Transformer};
use crate::types::{Chunk, ChunkGenerated, ChunksGenerated, ImportResolved, ImportTransformed};

/// Rewrites a finished graph before generation, e.g. common-chunk
/// extraction.
///
/// Job transformers work on a copy of the job. The copy replaces the
/// canonical job only when every job transformer succeeds; a failure aborts
/// the build.
#[async_trait]
pub trait JobTransformer: Component {
    async fn transform(&self, job: &Job, ctx: &Context) -> Result<()>;
}

/// Routes resolution through the dedicated resolution lane.
struct LaneResolver {
    resolvers: Arc<ResolverFacade>,
    ctx: Arc<Context>,
    pool: WorkerPool,
}

#[async_trait]
impl ResolveHandle for LaneResolver {
    async fn resolve(
        &self,
        request: &str,
        request_file: Option<&Path>,
        ignored: &[String],
    ) -> Result<ResolveOutcome> {
        let resolvers = self.resolvers.clone();
        let ctx = self.ctx.clone();
        let owned_request = request.to_string();
        let request_file = request_file.map(Path::to_path_buf);
        let ignored = ignored.to_vec();

        self.pool
            .run_resolve(format!("resolving '{request}'"), async move {
                resolvers
                    .resolve(&owned_request, request_file.as_deref(), &ignored, &ctx)
                    .await
            })
            .await
    }
}

pub struct Master {
    ctx: Arc<Context>,
    entries: Vec<String>,
    transformers: Arc<TransformFacade>,
    generators: Arc<GeneratorFacade>,
    job_transformers: Vec<Arc<dyn JobTransformer>>,
    cache: Option<Arc<dyn TransformCache>>,
    pool: WorkerPool,
    reporter: Arc<dyn Reporter>,
    resolve_handle: Arc<dyn ResolveHandle>,
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master")
            .field("root", &self.ctx.root())
            .field("entries", &self.entries)
            .field("lanes", &self.pool.lanes())
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl Master {
    pub fn builder(ctx: Arc<Context>) -> MasterBuilder {
        MasterBuilder::new(ctx)
    }

    pub fn ctx(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    /// Resolve a request on the resolution lane.
    pub async fn resolve(
        &self,
        request: &str,
        request_file: Option<&Path>,
        ignored: &[String],
    ) -> Result<ResolveOutcome> {
        self.resolve_handle
            .resolve(request, request_file, ignored)
            .await
    }

    /// Transform one file on a work lane, cache first.
    ///
    /// A cached value is reused only when the file's current stat key
    /// matches the one recorded with it.
    pub async fn transform(&self, import: &ImportResolved) -> Result<ImportTransformed> {
        let key = FileKey::of(import);
        let stat = self.ctx.fs().stat(&import.file_path).await.ok();

        if let (Some(cache), Some(stat)) = (&self.cache, &stat) {
            if let Some(entry) = cache.get(&key) {
                if entry.stat_key == stat.stat_key() {
                    tracing::debug!(path = %import.file_path.display(), "Transform cache hit");
                    return Ok(entry.value);
                }
                tracing::debug!(path = %import.file_path.display(), "Transform cache entry is stale");
            }
        }

        let transformers = self.transformers.clone();
        let ctx = self.ctx.clone();
        let resolver = self.resolve_handle.clone();
        let owned = import.clone();
        let transformed = self
            .pool
            .run_work(
                format!("transforming {}", import.file_path.display()),
                async move { transformers.transform(&owned, &ctx, resolver).await },
            )
            .await?;

        if let (Some(cache), Some(stat)) = (&self.cache, &stat) {
            cache.set(
                &key,
                CacheEntry {
                    stat_key: stat.stat_key(),
                    value: transformed.clone(),
                },
            );
        }
        Ok(transformed)
    }

    /// Resolve every configured entry into a root chunk.
    pub async fn entry_chunks(&self) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let import = match self.resolve(entry, None, &[]).await? {
                ResolveOutcome::Resolved(import) => import,
                ResolveOutcome::External => {
                    return Err(PundleError::resolve_failed(format!(
                        "entry '{entry}' resolved to an external module"
                    )));
                }
            };
            let label = import
                .file_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
            let mut chunk = Chunk::entry(import.format, import.file_path);
            chunk.label = label;

            let key = ChunkKey::of(&chunk);
            if !chunks.iter().any(|c| ChunkKey::of(c) == key) {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    /// Build the whole graph reachable from the entries into `job`.
    ///
    /// Returns the root chunks.
    pub async fn compile_into(self: &Arc<Self>, job: &Arc<Job>) -> Result<Vec<Chunk>> {
        let start = Instant::now();
        let chunks = self.entry_chunks().await?;
        self.walk(job, &chunks, &[], WalkScope::full()).await?;

        tracing::info!(
            files = job.file_count(),
            chunks = job.chunk_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Build graph complete"
        );
        Ok(chunks)
    }

    /// Walk `chunks` and `files` concurrently within one scope, then run the
    /// job transformers. The cache is flushed whatever the outcome.
    #[tracing::instrument(level = "debug", skip_all, fields(chunks = chunks.len(), files = files.len()))]
    pub async fn walk(
        self: &Arc<Self>,
        job: &Arc<Job>,
        chunks: &[Chunk],
        files: &[ImportResolved],
        scope: Arc<WalkScope>,
    ) -> Result<()> {
        let chunk_walks = chunks
            .iter()
            .map(|chunk| self.transform_chunk(chunk.clone(), job.clone(), None, scope.clone()));
        let file_walks = files
            .iter()
            .map(|file| self.transform_file_tree(file.clone(), job.clone(), None, scope.clone()));
        let walked = first_error(join_all(chunk_walks.chain(file_walks)).await);

        let result = match walked {
            Ok(()) => self.run_job_transformers(job).await,
            Err(err) => Err(err),
        };
        self.flush_cache();
        result
    }

    /// Build a fresh job from the entries.
    pub async fn compile(self: &Arc<Self>) -> Result<Arc<Job>> {
        let job = Arc::new(Job::new());
        self.compile_into(&job).await?;
        Ok(job)
    }

    /// Batch build: compile, then generate every chunk in the job.
    pub async fn execute(self: &Arc<Self>) -> Result<ChunksGenerated> {
        let job = self.compile().await?;
        self.generate(&job).await
    }

    /// Generate every chunk in `job`, in job order.
    pub async fn generate(&self, job: &Arc<Job>) -> Result<ChunksGenerated> {
        let chunks: Vec<Chunk> = job.chunks().into_iter().map(|(_, chunk)| chunk).collect();
        self.generate_chunks(job, &chunks).await
    }

    /// Generate `chunks` concurrently on the work lanes.
    ///
    /// Path ids are handed out in sorted path order first, so generated
    /// module ids do not depend on which lane finishes first. Two chunks
    /// rendering to the same output path fail with `GENERATE_FAILED`.
    pub async fn generate_chunks(&self, job: &Arc<Job>, chunks: &[Chunk]) -> Result<ChunksGenerated> {
        let start = Instant::now();
        self.ctx
            .assign_path_ids(job.files().into_iter().map(|(_, file)| file.file_path.clone()));

        let runs = chunks.iter().map(|chunk| {
            let generators = self.generators.clone();
            let ctx = self.ctx.clone();
            let job = job.clone();
            let chunk = chunk.clone();
            self.pool.run_work(
                format!("generating {}", chunk.display_name()),
                async move { generators.generate_chunk(&chunk, &job, &ctx).await },
            )
        });
        let generated = join_all(runs)
            .await
            .into_iter()
            .collect::<Result<Vec<ChunkGenerated>>>()?;
        ensure_distinct_paths(chunks, &generated)?;

        tracing::debug!(
            chunks = generated.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Generated chunks"
        );
        Ok(ChunksGenerated { chunks: generated })
    }

    /// Run job transformers against a copy of `job`, swapping it in on
    /// success.
    pub async fn run_job_transformers(&self, job: &Job) -> Result<()> {
        if self.job_transformers.is_empty() {
            return Ok(());
        }

        let draft = job.clone();
        for transformer in &self.job_transformers {
            transformer.transform(&draft, &self.ctx).await.map_err(|err| {
                tracing::debug!(transformer = transformer.name(), error = %err, "Job transformer failed");
                err
            })?;
        }
        job.replace_with(draft);
        Ok(())
    }

    /// Drop the cached transform of a file that no longer exists.
    pub fn evict(&self, key: &FileKey) {
        if let Some(cache) = &self.cache {
            cache.remove(key);
            tracing::debug!(key = %key, "Evicted cached transform");
        }
    }

    /// Commit buffered cache writes. Failures are logged, never fatal.
    pub fn flush_cache(&self) {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.flush() {
                tracing::warn!(error = %err, "Failed to persist transform cache");
            }
        }
    }
}

pub(crate) fn first_error(results: Vec<Result<()>>) -> Result<()> {
    results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
}

/// Assembles a [`Master`].
pub struct MasterBuilder {
    ctx: Arc<Context>,
    entries: Vec<String>,
    resolvers: Registry<dyn Resolver>,
    transformers: Registry<dyn Transformer>,
    generators: Registry<dyn Generator>,
    job_transformers: Registry<dyn JobTransformer>,
    templates: OutputTemplates,
    cache: Option<Arc<dyn TransformCache>>,
    workers: usize,
    timeout: Option<Duration>,
    reporter: Arc<dyn Reporter>,
}

impl MasterBuilder {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            entries: Vec::new(),
            resolvers: Registry::new(),
            transformers: Registry::new(),
            generators: Registry::new(),
            job_transformers: Registry::new(),
            templates: OutputTemplates::default(),
            cache: None,
            workers: default_lanes(),
            timeout: None,
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn entry(mut self, entry: impl Into<String>) -> Self {
        self.entries.push(entry.into());
        self
    }

    pub fn entries<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries.extend(entries.into_iter().map(Into::into));
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolvers.add(resolver);
        self
    }

    pub fn transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformers.add(transformer);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generators.add(generator);
        self
    }

    pub fn job_transformer(mut self, transformer: Arc<dyn JobTransformer>) -> Self {
        self.job_transformers.add(transformer);
        self
    }

    pub fn templates(mut self, templates: OutputTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn TransformCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn build(self) -> Result<Arc<Master>> {
        if self.workers == 0 {
            return Err(PundleError::invalid_config(
                "workers.count must be at least 1",
            ));
        }
        if let Some(entry) = self.entries.iter().find(|e| e.trim().is_empty()) {
            return Err(PundleError::invalid_config(format!(
                "entry '{entry}' is empty"
            )));
        }

        let pool = WorkerPool::new(self.workers).with_timeout(self.timeout);
        let resolve_handle: Arc<dyn ResolveHandle> = Arc::new(LaneResolver {
            resolvers: Arc::new(ResolverFacade::new(self.resolvers)),
            ctx: self.ctx.clone(),
            pool: pool.clone(),
        });

        Ok(Arc::new(Master {
            ctx: self.ctx,
            entries: self.entries,
            transformers: Arc::new(TransformFacade::new(self.transformers)),
            generators: Arc::new(GeneratorFacade::new(self.generators, self.templates)),
            job_transformers: self.job_transformers.into_ordered(),
            cache: self.cache,
            pool,
            reporter: self.reporter,
            resolve_handle,
        }))
    }
}
