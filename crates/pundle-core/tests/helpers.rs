//! Shared fake collaborators for pundle-core integration tests.
//!
//! Source files use a tiny line language understood by [`ScanTransformer`]:
//! `import <request>` adds an import, `lazy <request>` adds a chunk, and
//! `fail`, `hang`, `panic` or `invalid` make the transform misbehave.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use path_clean::PathClean;
use pundle_core::{
    Chunk, Component, Context, GenerateHook, Generator, GeneratorOutput, ImportResolved, Job,
    Master, MasterBuilder, MemoryFileSystem, PundleError, Resolution, ResolveOutcome,
    ResolveState, Resolver, Result, TransformApi, TransformInput, TransformOutput, Transformer,
};
use rustc_hash::FxHashMap;

pub const ROOT: &str = "/root";

pub fn path(relative: &str) -> PathBuf {
    Path::new(ROOT).join(relative)
}

pub fn js(relative: &str) -> ImportResolved {
    ImportResolved::new("js", path(relative))
}

/// In-memory project seeded with `(relative path, contents)` pairs.
pub fn project(files: &[(&str, &str)]) -> Arc<MemoryFileSystem> {
    let fs = Arc::new(MemoryFileSystem::new());
    for (relative, contents) in files {
        fs.write(path(relative), *contents);
    }
    fs
}

pub fn context(fs: &Arc<MemoryFileSystem>) -> Arc<Context> {
    Arc::new(Context::new(ROOT, fs.clone()))
}

/// Builder with the path resolver, the scanning transformer and the
/// concatenating generator registered.
pub fn builder(fs: &Arc<MemoryFileSystem>, scanner: &Arc<ScanTransformer>) -> MasterBuilder {
    Master::builder(context(fs))
        .resolver(Arc::new(PathResolver))
        .transformer(scanner.clone())
        .generator(Arc::new(JoinGenerator))
        .workers(4)
}

/// Resolves `./x` and `/x` requests to existing files; the format is the
/// extension.
pub struct PathResolver;

impl Component for PathResolver {
    fn name(&self) -> &str {
        "path"
    }
}

#[async_trait]
impl Resolver for PathResolver {
    async fn resolve(&self, state: &mut ResolveState, ctx: &Context) -> Result<Resolution> {
        let base = state
            .request_file
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or(ctx.root());
        let candidate = if state.request.starts_with("./") || state.request.starts_with("../") {
            base.join(&state.request).clean()
        } else if state.request.starts_with('/') {
            PathBuf::from(&state.request)
        } else if state.request == "fs" {
            return Ok(Resolution::External);
        } else {
            return Ok(Resolution::Declined);
        };

        if !ctx.fs().is_file(&candidate).await {
            return Ok(Resolution::Declined);
        }
        let format = candidate
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_else(|| "js".to_string());
        Ok(Resolution::Resolved(ImportResolved::new(format, candidate)))
    }
}

/// Passes contents through unchanged while recording edges, and counts its
/// invocations per path.
#[derive(Default)]
pub struct ScanTransformer {
    calls: Mutex<FxHashMap<PathBuf, usize>>,
    delay: Option<Duration>,
}

impl ScanTransformer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::default(),
            delay: Some(delay),
        })
    }

    pub fn calls(&self, relative: &str) -> usize {
        self.calls.lock().get(&path(relative)).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

impl Component for ScanTransformer {
    fn name(&self) -> &str {
        "scan"
    }
}

#[async_trait]
impl Transformer for ScanTransformer {
    async fn transform(
        &self,
        input: &TransformInput,
        _ctx: &Context,
        api: &mut TransformApi,
    ) -> Result<Option<TransformOutput>> {
        *self.calls.lock().entry(input.file_path.clone()).or_insert(0) += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let source = String::from_utf8_lossy(&input.contents).into_owned();
        for line in source.lines().map(str::trim) {
            match line.split_once(' ') {
                Some(("import", request)) => {
                    if let ResolveOutcome::Resolved(import) = api.resolve(request).await? {
                        api.add_import(import);
                    }
                }
                Some(("lazy", request)) => {
                    if let ResolveOutcome::Resolved(import) = api.resolve(request).await? {
                        api.add_chunk(Chunk::entry(import.format, import.file_path));
                    }
                }
                _ => match line {
                    "fail" => return Err(PundleError::transform_failed("requested failure")),
                    "hang" => tokio::time::sleep(Duration::from_secs(60)).await,
                    "panic" => panic!("transformer exploded"),
                    "invalid" => api.add_import(ImportResolved::new("", "relative.js")),
                    _ => {}
                },
            }
        }
        Ok(Some(TransformOutput::new(input.contents.clone())))
    }
}

/// Concatenates the chunk's files in closure order.
pub struct JoinGenerator;

impl Component for JoinGenerator {
    fn name(&self) -> &str {
        "join"
    }
}

#[async_trait]
impl Generator for JoinGenerator {
    async fn generate(
        &self,
        chunk: &Chunk,
        job: &Job,
        _ctx: &Context,
    ) -> Result<Option<GeneratorOutput>> {
        if chunk.format != "js" {
            return Ok(None);
        }
        let mut contents = Vec::new();
        for file in job.chunk_closure(chunk) {
            contents.extend_from_slice(&file.contents);
            contents.push(b'\n');
        }
        Ok(Some(GeneratorOutput {
            format: "js".to_string(),
            contents,
            source_map: None,
        }))
    }
}

/// Records every generate signal.
#[derive(Default)]
pub struct RecordingHook {
    calls: Mutex<Vec<Vec<PathBuf>>>,
    notify: Option<tokio::sync::mpsc::UnboundedSender<Vec<PathBuf>>>,
}

impl RecordingHook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_channel() -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<Vec<PathBuf>>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let hook = Self {
            calls: Mutex::default(),
            notify: Some(tx),
        };
        (Arc::new(hook), rx)
    }

    pub fn calls(&self) -> Vec<Vec<PathBuf>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl GenerateHook for RecordingHook {
    async fn on_generate(&self, _job: &Arc<Job>, changed: &[PathBuf]) -> Result<()> {
        self.calls.lock().push(changed.to_vec());
        if let Some(tx) = &self.notify {
            let _ = tx.send(changed.to_vec());
        }
        Ok(())
    }
}
