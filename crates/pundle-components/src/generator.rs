//! Concatenating generator.

use std::path::Path;

use async_trait::async_trait;
use pundle_core::{Chunk, Component, Context, Generator, GeneratorOutput, Job, Result};

/// Comment syntax used for module headers, per output format.
fn header(format: &str, id: u32, path: &str) -> Option<String> {
    match format {
        "js" => Some(format!("// [{id}] {path}\n")),
        "css" => Some(format!("/* [{id}] {path} */\n")),
        _ => None,
    }
}

/// Emits a chunk as its files concatenated in dependency order, each one
/// prefixed with a header carrying its session path id. No source maps.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcatGenerator;

impl ConcatGenerator {
    pub const NAME: &'static str = "concat";

    pub fn new() -> Self {
        Self
    }
}

impl Component for ConcatGenerator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        -10
    }
}

#[async_trait]
impl Generator for ConcatGenerator {
    async fn generate(
        &self,
        chunk: &Chunk,
        job: &Job,
        ctx: &Context,
    ) -> Result<Option<GeneratorOutput>> {
        if header(&chunk.format, 0, "").is_none() {
            return Ok(None);
        }

        let mut contents = Vec::new();
        for file in job.chunk_closure(chunk) {
            // Files of other formats (e.g. json pulled into a js chunk) are
            // emitted under the chunk's comment syntax.
            let display = file
                .file_path
                .strip_prefix(ctx.root())
                .unwrap_or(&file.file_path);
            let id = ctx.path_id(&file.file_path);
            if let Some(line) = header(&chunk.format, id, &display_path(display)) {
                contents.extend_from_slice(line.as_bytes());
            }
            contents.extend_from_slice(&file.contents);
            if !file.contents.ends_with(b"\n") {
                contents.push(b'\n');
            }
        }

        Ok(Some(GeneratorOutput {
            format: chunk.format.clone(),
            contents,
            source_map: None,
        }))
    }
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
