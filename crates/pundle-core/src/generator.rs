//! Generator collaborators and the facade that turns chunks into outputs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::context::Context;
use crate::error::{PundleError, Result};
use crate::job::Job;
use crate::keys::ChunkKey;
use crate::registry::{Component, Registry};
use crate::source_map::SourceMapValue;
use crate::types::{Chunk, ChunkGenerated};

/// Template used for formats missing from the table.
pub const DEFAULT_TEMPLATE: &str = "[name].[ext]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorOutput {
    pub format: String,
    pub contents: Vec<u8>,
    pub source_map: Option<SourceMapValue>,
}

#[async_trait]
pub trait Generator: Component {
    /// Returns `None` when this generator does not handle the chunk.
    async fn generate(
        &self,
        chunk: &Chunk,
        job: &Job,
        ctx: &Context,
    ) -> Result<Option<GeneratorOutput>>;
}

/// Per-format output path templates.
///
/// Placeholders: `[name]`, `[id]`, `[format]`, `[ext]`. A format mapped to
/// `None` is generated but gets no output path.
#[derive(Debug, Clone)]
pub struct OutputTemplates {
    templates: FxHashMap<String, Option<String>>,
    fallback: Option<String>,
}

impl Default for OutputTemplates {
    fn default() -> Self {
        Self {
            templates: FxHashMap::default(),
            fallback: Some(DEFAULT_TEMPLATE.to_string()),
        }
    }
}

impl OutputTemplates {
    pub fn new(templates: impl IntoIterator<Item = (String, Option<String>)>) -> Self {
        Self {
            templates: templates.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn set(&mut self, format: impl Into<String>, template: Option<String>) {
        self.templates.insert(format.into(), template);
    }

    /// Template for formats not listed explicitly.
    pub fn with_fallback(mut self, fallback: Option<String>) -> Self {
        self.fallback = fallback;
        self
    }

    fn template(&self, format: &str) -> Option<&str> {
        match self.templates.get(format) {
            Some(template) => template.as_deref(),
            None => self.fallback.as_deref(),
        }
    }

    /// Output path of a chunk generated in `format`.
    pub fn render(&self, chunk: &Chunk, key: &ChunkKey, format: &str) -> Option<PathBuf> {
        let template = self.template(format)?;
        let id = key.as_str().trim_start_matches("chunk_");
        let name = chunk
            .label
            .clone()
            .or_else(|| {
                chunk
                    .entry
                    .as_deref()
                    .and_then(Path::file_stem)
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| id.to_string());

        let rendered = template
            .replace("[name]", &name)
            .replace("[id]", id)
            .replace("[format]", &chunk.format)
            .replace("[ext]", format);
        Some(PathBuf::from(rendered))
    }
}

/// Runs generators in priority order until one produces output.
pub struct GeneratorFacade {
    generators: Vec<Arc<dyn Generator>>,
    templates: OutputTemplates,
}

impl GeneratorFacade {
    pub fn new(generators: Registry<dyn Generator>, templates: OutputTemplates) -> Self {
        Self {
            generators: generators.into_ordered(),
            templates,
        }
    }

    pub fn templates(&self) -> &OutputTemplates {
        &self.templates
    }

    pub async fn generate_chunk(
        &self,
        chunk: &Chunk,
        job: &Job,
        ctx: &Context,
    ) -> Result<ChunkGenerated> {
        let key = ChunkKey::of(chunk);
        for generator in &self.generators {
            let Some(output) = generator.generate(chunk, job, ctx).await? else {
                continue;
            };
            tracing::debug!(
                chunk = %chunk.display_name(),
                generator = generator.name(),
                bytes = output.contents.len(),
                "Generated chunk"
            );
            let files = job
                .chunk_closure(chunk)
                .iter()
                .map(|f| f.file_path.clone())
                .collect();
            return Ok(ChunkGenerated {
                file_path: self.templates.render(chunk, &key, &output.format),
                format: output.format,
                label: chunk.label.clone(),
                entry: chunk.entry.clone(),
                contents: output.contents,
                source_map: output.source_map,
                files,
            });
        }

        let err = PundleError::generate_failed(format!(
            "no generator produced output for chunk '{}' (format '{}')",
            chunk.display_name(),
            chunk.format
        ));
        Err(match &chunk.entry {
            Some(entry) => err.with_path(entry),
            None => err,
        })
    }
}

/// Fail when two chunks render to the same output path. `generated[i]` is
/// the output of `chunks[i]`.
pub fn ensure_distinct_paths(chunks: &[Chunk], generated: &[ChunkGenerated]) -> Result<()> {
    let mut seen: FxHashMap<&Path, usize> = FxHashMap::default();
    for (index, output) in generated.iter().enumerate() {
        let Some(path) = output.file_path.as_deref() else {
            continue;
        };
        if let Some(&first) = seen.get(path) {
            let name = |i: usize| {
                chunks
                    .get(i)
                    .map(Chunk::display_name)
                    .unwrap_or_else(|| format!("#{i}"))
            };
            let err = PundleError::generate_failed(format!(
                "chunks '{}' and '{}' both write to '{}'",
                name(first),
                name(index),
                path.display()
            ));
            return Err(match chunks.get(index).and_then(|c| c.entry.as_ref()) {
                Some(entry) => err.with_path(entry),
                None => err,
            });
        }
        seen.insert(path, index);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::fs::MemoryFileSystem;

    struct Echo {
        format: &'static str,
    }

    impl Component for Echo {
        fn name(&self) -> &str {
            "echo"
        }
    }

    #[async_trait]
    impl Generator for Echo {
        async fn generate(
            &self,
            chunk: &Chunk,
            _job: &Job,
            _ctx: &Context,
        ) -> Result<Option<GeneratorOutput>> {
            if chunk.format != self.format {
                return Ok(None);
            }
            Ok(Some(GeneratorOutput {
                format: self.format.to_string(),
                contents: chunk.display_name().into_bytes(),
                source_map: None,
            }))
        }
    }

    fn ctx() -> Context {
        Context::new("/root", Arc::new(MemoryFileSystem::new()))
    }

    #[test]
    fn test_render_placeholders() {
        let templates = OutputTemplates::new([
            ("js".to_string(), Some("js/[name]-[id].[ext]".to_string())),
            ("css".to_string(), None),
        ]);
        let chunk = Chunk::entry("js", "/root/src/index.js");
        let key = ChunkKey::of(&chunk);
        let id = key.as_str().trim_start_matches("chunk_").to_string();

        assert_eq!(
            templates.render(&chunk, &key, "js"),
            Some(PathBuf::from(format!("js/index-{id}.js")))
        );
        assert_eq!(templates.render(&chunk, &key, "css"), None);
        assert_eq!(
            templates.render(&chunk.clone().with_label("main"), &key, "json"),
            Some(PathBuf::from("main.json"))
        );
    }

    #[test]
    fn test_render_name_falls_back_to_id() {
        let templates = OutputTemplates::default();
        let chunk = Chunk::empty("css").with_import(crate::types::ImportResolved::new("css", "/root/a.css"));
        let key = ChunkKey::of(&chunk);
        let id = key.as_str().trim_start_matches("chunk_");
        assert_eq!(
            templates.render(&chunk, &key, "css"),
            Some(PathBuf::from(format!("{id}.css")))
        );
    }

    #[tokio::test]
    async fn test_generate_chunk_fails_unhandled() {
        let js: Arc<dyn Generator> = Arc::new(Echo { format: "js" });
        let facade = GeneratorFacade::new([js].into_iter().collect(), OutputTemplates::default());
        let job = Job::new();
        let ctx = ctx();

        let labelled = Chunk::entry("js", "/root/b.js").with_label("bee");
        let generated = facade.generate_chunk(&labelled, &job, &ctx).await.unwrap();
        assert_eq!(generated.contents, b"/root/b.js");
        assert_eq!(generated.file_path, Some(PathBuf::from("bee.js")));

        let err = facade
            .generate_chunk(&Chunk::entry("css", "/root/a.css"), &job, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::GenerateFailed);
        assert!(err.message.contains("/root/a.css"));
    }

    #[tokio::test]
    async fn test_colliding_output_paths_are_rejected() {
        let js: Arc<dyn Generator> = Arc::new(Echo { format: "js" });
        let facade = GeneratorFacade::new([js].into_iter().collect(), OutputTemplates::default());
        let job = Job::new();
        let ctx = ctx();

        let chunks = vec![
            Chunk::entry("js", "/root/a/index.js"),
            Chunk::entry("js", "/root/b/index.js"),
        ];
        let mut generated = Vec::new();
        for chunk in &chunks {
            generated.push(facade.generate_chunk(chunk, &job, &ctx).await.unwrap());
        }

        let err = ensure_distinct_paths(&chunks, &generated).unwrap_err();
        assert_eq!(err.code, ErrorCode::GenerateFailed);
        assert!(err.message.contains("/root/a/index.js"));
        assert!(err.message.contains("/root/b/index.js"));

        assert!(ensure_distinct_paths(&chunks[..1], &generated[..1]).is_ok());
    }
}
