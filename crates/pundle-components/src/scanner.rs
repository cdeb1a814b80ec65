//! Import scanning transformer.
//!
//! Finds module requests with regular expressions rather than a parser:
//! static `import`/`export … from`, `require()` and CSS `@import` become
//! import edges; dynamic `import()` becomes a chunk boundary. Contents are
//! left untouched.

use std::sync::LazyLock;

use async_trait::async_trait;
use pundle_core::{
    Chunk, Component, Context, PundleError, ResolveOutcome, Result, TransformApi, TransformInput,
    TransformOutput, Transformer,
};
use regex::Regex;

static STATIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s+(?:[\w$*{},\s]+?\s+from\s+)?['"]([^'"\n]+)['"]"#)
        .unwrap_or_else(|e| panic!("invalid static import pattern: {e}"))
});

static EXPORT_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*export\s+[\w$*{},\s]+?\s+from\s+['"]([^'"\n]+)['"]"#)
        .unwrap_or_else(|e| panic!("invalid export pattern: {e}"))
});

static REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\brequire\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#)
        .unwrap_or_else(|e| panic!("invalid require pattern: {e}"))
});

static DYNAMIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#)
        .unwrap_or_else(|e| panic!("invalid dynamic import pattern: {e}"))
});

static CSS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import\s+(?:url\(\s*)?['"]([^'"\n]+)['"]"#)
        .unwrap_or_else(|e| panic!("invalid @import pattern: {e}"))
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Import,
    Dynamic,
}

/// A request found in source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRequest {
    pub offset: usize,
    pub request: String,
    pub kind: RequestKind,
}

fn collect(source: &str, pattern: &Regex, kind: RequestKind, out: &mut Vec<ScannedRequest>) {
    for captures in pattern.captures_iter(source) {
        if let Some(request) = captures.get(1) {
            out.push(ScannedRequest {
                offset: request.start(),
                request: request.as_str().to_string(),
                kind,
            });
        }
    }
}

/// Requests in a JavaScript source, in source order.
pub fn scan_js(source: &str) -> Vec<ScannedRequest> {
    let mut found = Vec::new();
    collect(source, &STATIC_IMPORT, RequestKind::Import, &mut found);
    collect(source, &EXPORT_FROM, RequestKind::Import, &mut found);
    collect(source, &REQUIRE, RequestKind::Import, &mut found);
    collect(source, &DYNAMIC_IMPORT, RequestKind::Dynamic, &mut found);
    found.sort_by_key(|r| r.offset);
    found.dedup_by_key(|r| r.offset);
    found
}

/// `@import` requests in a stylesheet, in source order.
pub fn scan_css(source: &str) -> Vec<ScannedRequest> {
    let mut found = Vec::new();
    collect(source, &CSS_IMPORT, RequestKind::Import, &mut found);
    found
}

/// Registers the imports and dynamic chunks of `js` and `css` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImportScanner;

impl ImportScanner {
    pub const NAME: &'static str = "import-scanner";

    pub fn new() -> Self {
        Self
    }
}

impl Component for ImportScanner {
    fn name(&self) -> &str {
        Self::NAME
    }
}

#[async_trait]
impl Transformer for ImportScanner {
    async fn transform(
        &self,
        input: &TransformInput,
        _ctx: &Context,
        api: &mut TransformApi,
    ) -> Result<Option<TransformOutput>> {
        let scan = match input.format.as_str() {
            "js" => scan_js,
            "css" => scan_css,
            _ => return Ok(None),
        };
        let source = input.contents_str().map_err(|e| {
            PundleError::transform_failed(format!("source is not valid UTF-8: {e}"))
                .with_path(&input.file_path)
        })?;

        let requests = scan(source);
        tracing::trace!(
            path = %input.file_path.display(),
            requests = requests.len(),
            "Scanned module requests"
        );

        for found in requests {
            let import = match api.resolve(&found.request).await? {
                ResolveOutcome::Resolved(import) => import,
                ResolveOutcome::External => continue,
            };
            match found.kind {
                RequestKind::Import => api.add_import(import),
                RequestKind::Dynamic => {
                    api.add_chunk(Chunk::entry(import.format, import.file_path))
                }
            }
        }
        Ok(None)
    }
}
