//! Filesystem resolver.
//!
//! Resolution order:
//!
//! 1. Node built-ins (`fs`, `node:path`, `fs/promises`) are external.
//! 2. Relative requests (`./`, `../`) join the requesting file's directory,
//!    or the project root for entries.
//! 3. Absolute requests are used as is.
//! 4. Bare specifiers walk up from the requesting directory looking for
//!    `node_modules/<name>`, then follow the package manifest's `main`.
//!
//! Each candidate is probed as a file, then with every configured extension
//! appended, then as a directory holding `index.<ext>`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use indexmap::IndexMap;
use path_clean::PathClean;
use pundle_core::{
    Component, Context, ImportResolved, Resolution, ResolveState, Resolver, Result,
};

const NODE_BUILTINS: &[&str] = &[
    "assert",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "events",
    "fs",
    "http",
    "http2",
    "https",
    "inspector",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "timers",
    "tls",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "worker_threads",
    "zlib",
];

/// Whether `request` names a Node runtime module.
pub fn is_builtin(request: &str) -> bool {
    if request.starts_with("node:") {
        return true;
    }
    let base = request.split('/').next().unwrap_or(request);
    NODE_BUILTINS.contains(&base)
}

/// Splits `@scope/pkg/sub/path` into (`@scope/pkg`, `sub/path`).
fn split_package(request: &str) -> (&str, Option<&str>) {
    let mut slashes = request.match_indices('/');
    let boundary = if request.starts_with('@') {
        slashes.nth(1)
    } else {
        slashes.next()
    };
    match boundary {
        Some((index, _)) => (&request[..index], Some(&request[index + 1..])),
        None => (request, None),
    }
}

fn with_appended_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Resolves requests against the session filesystem.
#[derive(Debug, Clone)]
pub struct FsResolver {
    /// Extension to format table; its order is the probing order.
    extensions: IndexMap<String, String>,
}

impl FsResolver {
    pub const NAME: &'static str = "fs";

    pub fn new(extensions: IndexMap<String, String>) -> Self {
        Self { extensions }
    }

    fn format_of(&self, path: &Path) -> Option<&str> {
        let ext = path.extension()?.to_str()?;
        self.extensions.get(ext).map(String::as_str)
    }

    async fn probe_file(&self, path: &Path, ctx: &Context) -> Option<ImportResolved> {
        let format = self.format_of(path)?;
        if ctx.fs().is_file(path).await {
            Some(ImportResolved::new(format, path))
        } else {
            None
        }
    }

    /// File, file plus extension, then directory index.
    async fn probe(&self, path: &Path, ctx: &Context) -> Option<ImportResolved> {
        if let Some(found) = self.probe_file(path, ctx).await {
            return Some(found);
        }
        for ext in self.extensions.keys() {
            let candidate = with_appended_extension(path, ext);
            if let Some(found) = self.probe_file(&candidate, ctx).await {
                return Some(found);
            }
        }
        if ctx.fs().is_dir(path).await {
            for ext in self.extensions.keys() {
                let candidate = path.join(format!("index.{ext}"));
                if let Some(found) = self.probe_file(&candidate, ctx).await {
                    return Some(found);
                }
            }
        }
        None
    }

    async fn resolve_package(
        &self,
        request: &str,
        from_dir: &Path,
        ctx: &Context,
    ) -> Option<ImportResolved> {
        let (name, subpath) = split_package(request);
        let mut current = Some(from_dir);
        while let Some(dir) = current {
            let package_dir = dir.join("node_modules").join(name);
            if ctx.fs().is_dir(&package_dir).await {
                if let Some(subpath) = subpath {
                    return self.probe(&package_dir.join(subpath), ctx).await;
                }
                let main = ctx
                    .manifest(&package_dir)
                    .await
                    .and_then(|m| m.get("main").and_then(|v| v.as_str()).map(str::to_string));
                if let Some(main) = main {
                    if let Some(found) = self.probe(&package_dir.join(main).clean(), ctx).await {
                        return Some(found);
                    }
                }
                return self.probe(&package_dir, ctx).await;
            }
            current = dir.parent();
        }
        None
    }
}

impl Component for FsResolver {
    fn name(&self) -> &str {
        Self::NAME
    }
}

#[async_trait]
impl Resolver for FsResolver {
    async fn resolve(&self, state: &mut ResolveState, ctx: &Context) -> Result<Resolution> {
        let request = state.request.as_str();
        if is_builtin(request) {
            return Ok(Resolution::External);
        }

        let from_dir = state
            .request_file
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or(ctx.root());

        let found = if request.starts_with("./")
            || request.starts_with("../")
            || request == "."
            || request == ".."
        {
            self.probe(&from_dir.join(request).clean(), ctx).await
        } else if Path::new(request).is_absolute() {
            self.probe(&Path::new(request).clean(), ctx).await
        } else {
            self.resolve_package(request, from_dir, ctx).await
        };

        Ok(match found {
            Some(import) => Resolution::Resolved(import),
            None => {
                tracing::trace!(request, from = %from_dir.display(), "No file matched");
                Resolution::Declined
            }
        })
    }
}
