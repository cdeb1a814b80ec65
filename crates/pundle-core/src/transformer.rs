//! Transformer collaborators and the facade that folds them over a file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::context::Context;
use crate::error::{PundleError, Result};
use crate::keys::{ChunkKey, FileKey};
use crate::registry::{Component, Registry};
use crate::resolver::{ResolveHandle, ResolveOutcome};
use crate::source_map::{self, SourceMapValue};
use crate::types::{Chunk, ImportResolved, ImportTransformed};

/// The file as seen by the next transformer in the chain.
#[derive(Debug, Clone)]
pub struct TransformInput {
    pub format: String,
    pub file_path: PathBuf,
    pub contents: Vec<u8>,
    pub source_map: Option<SourceMapValue>,
}

impl TransformInput {
    pub fn contents_str(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.contents)
    }
}

/// What a transformer produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub contents: Vec<u8>,
    pub source_map: Option<SourceMapValue>,
}

impl TransformOutput {
    pub fn new(contents: impl Into<Vec<u8>>) -> Self {
        Self {
            contents: contents.into(),
            source_map: None,
        }
    }

    pub fn with_source_map(mut self, map: SourceMapValue) -> Self {
        self.source_map = Some(map);
        self
    }
}

#[async_trait]
pub trait Transformer: Component {
    /// Returns `None` when the transformer does not handle this file; the
    /// running contents and source map are then left untouched.
    async fn transform(
        &self,
        input: &TransformInput,
        ctx: &Context,
        api: &mut TransformApi,
    ) -> Result<Option<TransformOutput>>;
}

/// Callbacks available to a transformer while it runs.
///
/// Imports and chunks are collected across the whole chain in registration
/// order; duplicates (by key) are kept once.
pub struct TransformApi {
    file_path: PathBuf,
    resolver: Arc<dyn ResolveHandle>,
    imports: IndexMap<FileKey, ImportResolved>,
    chunks: IndexMap<ChunkKey, Chunk>,
    rejected: Vec<String>,
}

impl TransformApi {
    fn new(file_path: PathBuf, resolver: Arc<dyn ResolveHandle>) -> Self {
        Self {
            file_path,
            resolver,
            imports: IndexMap::new(),
            chunks: IndexMap::new(),
            rejected: Vec::new(),
        }
    }

    /// Resolve a request relative to the file being transformed.
    pub async fn resolve(&self, request: &str) -> Result<ResolveOutcome> {
        self.resolver
            .resolve(request, Some(&self.file_path), &[])
            .await
    }

    /// Resolve while skipping the named resolvers.
    pub async fn resolve_ignoring(&self, request: &str, ignored: &[String]) -> Result<ResolveOutcome> {
        self.resolver
            .resolve(request, Some(&self.file_path), ignored)
            .await
    }

    /// Record an outgoing import edge.
    pub fn add_import(&mut self, import: ImportResolved) {
        if let Err(reason) = import.validate() {
            self.rejected.push(reason);
            return;
        }
        self.imports.entry(FileKey::of(&import)).or_insert(import);
    }

    /// Record a chunk discovered inside this file.
    pub fn add_chunk(&mut self, chunk: Chunk) {
        if let Err(reason) = chunk.validate() {
            self.rejected.push(reason);
            return;
        }
        self.chunks.entry(ChunkKey::of(&chunk)).or_insert(chunk);
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn take_rejected(&mut self) -> Vec<String> {
        std::mem::take(&mut self.rejected)
    }
}

/// Folds every registered transformer, highest priority first, over a file.
pub struct TransformFacade {
    transformers: Vec<Arc<dyn Transformer>>,
}

impl TransformFacade {
    pub fn new(transformers: Registry<dyn Transformer>) -> Self {
        Self {
            transformers: transformers.into_ordered(),
        }
    }

    pub async fn transform(
        &self,
        import: &ImportResolved,
        ctx: &Context,
        resolver: Arc<dyn ResolveHandle>,
    ) -> Result<ImportTransformed> {
        let path = &import.file_path;
        let contents = ctx.fs().read_file(path).await.map_err(|e| {
            PundleError::transform_failed(format!("failed to read file: {e}")).with_path(path)
        })?;

        let mut input = TransformInput {
            format: import.format.clone(),
            file_path: path.clone(),
            contents,
            source_map: None,
        };
        let mut api = TransformApi::new(path.clone(), resolver);

        for transformer in &self.transformers {
            let output = transformer
                .transform(&input, ctx, &mut api)
                .await
                .map_err(|e| e.or_path(path))?;

            let rejected = api.take_rejected();
            if !rejected.is_empty() {
                return Err(PundleError::transform_failed(format!(
                    "transformer '{}' registered invalid data: {}",
                    transformer.name(),
                    rejected.join("; ")
                ))
                .with_path(path));
            }

            let Some(output) = output else {
                continue;
            };
            input.source_map = source_map::fold(input.source_map.take(), output.source_map)
                .map_err(|reason| {
                    PundleError::transform_failed(format!(
                        "transformer '{}' returned an unusable source map: {}",
                        transformer.name(),
                        reason
                    ))
                    .with_path(path)
                })?;
            input.contents = output.contents;
        }

        Ok(ImportTransformed {
            format: input.format,
            file_path: input.file_path,
            contents: input.contents,
            source_map: input.source_map,
            chunks: api.chunks.into_values().collect(),
            imports: api.imports.into_values().collect(),
        })
    }
}
