//! Resolver collaborators and the facade that drives them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{PundleError, Result};
use crate::registry::{Component, Registry};
use crate::types::ImportResolved;

/// Request state handed to each resolver in turn.
///
/// Resolvers may rewrite `request` (aliasing) before declining; later
/// resolvers see the rewritten value.
#[derive(Debug, Clone)]
pub struct ResolveState {
    pub request: String,
    pub request_file: Option<PathBuf>,
    pub ignored: Vec<String>,
}

/// What a single resolver decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Not handled here; ask the next resolver.
    Declined,
    Resolved(ImportResolved),
    /// Explicitly external, e.g. a runtime built-in. Stops the chain.
    External,
}

/// What the facade decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved(ImportResolved),
    External,
}

impl ResolveOutcome {
    pub fn into_resolved(self) -> Option<ImportResolved> {
        match self {
            ResolveOutcome::Resolved(import) => Some(import),
            ResolveOutcome::External => None,
        }
    }
}

#[async_trait]
pub trait Resolver: Component {
    async fn resolve(&self, state: &mut ResolveState, ctx: &Context) -> Result<Resolution>;
}

/// Resolution entry point handed to transformers.
///
/// The orchestrator implements this on top of its dedicated resolution lane.
#[async_trait]
pub trait ResolveHandle: Send + Sync {
    async fn resolve(
        &self,
        request: &str,
        request_file: Option<&Path>,
        ignored: &[String],
    ) -> Result<ResolveOutcome>;
}

/// Runs resolvers in priority order until one answers.
pub struct ResolverFacade {
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl ResolverFacade {
    pub fn new(resolvers: Registry<dyn Resolver>) -> Self {
        Self {
            resolvers: resolvers.into_ordered(),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resolvers.iter().map(|r| r.name())
    }

    pub async fn resolve(
        &self,
        request: &str,
        request_file: Option<&Path>,
        ignored: &[String],
        ctx: &Context,
    ) -> Result<ResolveOutcome> {
        let failure = |message: String| match request_file {
            Some(file) => PundleError::resolve_failed(message).with_path(file),
            None => PundleError::resolve_failed(message),
        };

        if self.resolvers.is_empty() {
            return Err(failure("no resolvers configured".to_string()));
        }

        let mut state = ResolveState {
            request: request.to_string(),
            request_file: request_file.map(Path::to_path_buf),
            ignored: ignored.to_vec(),
        };

        let mut consulted = 0;
        for resolver in &self.resolvers {
            if state.ignored.iter().any(|name| name == resolver.name()) {
                continue;
            }
            consulted += 1;

            match resolver.resolve(&mut state, ctx).await? {
                Resolution::Declined => continue,
                Resolution::External => {
                    tracing::trace!(request, resolver = resolver.name(), "Resolved as external");
                    return Ok(ResolveOutcome::External);
                }
                Resolution::Resolved(import) => {
                    import.validate().map_err(|reason| {
                        failure(format!(
                            "resolver '{}' returned an invalid result: {}",
                            resolver.name(),
                            reason
                        ))
                    })?;
                    tracing::trace!(
                        request,
                        resolver = resolver.name(),
                        path = %import.file_path.display(),
                        "Resolved"
                    );
                    return Ok(ResolveOutcome::Resolved(import));
                }
            }
        }

        if consulted == 0 {
            return Err(failure("all resolvers were ignored".to_string()));
        }

        let from = request_file
            .map(|f| f.display().to_string())
            .unwrap_or_else(|| ctx.root().display().to_string());
        Err(failure(format!("unable to resolve '{}' from '{}'", request, from)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::fs::MemoryFileSystem;

    struct Fixed {
        name: &'static str,
        priority: i32,
        answer: Resolution,
    }

    impl Component for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    #[async_trait]
    impl Resolver for Fixed {
        async fn resolve(&self, _state: &mut ResolveState, _ctx: &Context) -> Result<Resolution> {
            Ok(self.answer.clone())
        }
    }

    /// Rewrites `~/x` to `./x` and declines.
    struct Alias;

    impl Component for Alias {
        fn name(&self) -> &str {
            "alias"
        }

        fn priority(&self) -> i32 {
            100
        }
    }

    #[async_trait]
    impl Resolver for Alias {
        async fn resolve(&self, state: &mut ResolveState, _ctx: &Context) -> Result<Resolution> {
            if let Some(rest) = state.request.strip_prefix("~/") {
                state.request = format!("./{rest}");
            }
            Ok(Resolution::Declined)
        }
    }

    /// Resolves `./x` to `/root/x`.
    struct Relative;

    impl Component for Relative {
        fn name(&self) -> &str {
            "relative"
        }
    }

    #[async_trait]
    impl Resolver for Relative {
        async fn resolve(&self, state: &mut ResolveState, _ctx: &Context) -> Result<Resolution> {
            Ok(match state.request.strip_prefix("./") {
                Some(rest) => Resolution::Resolved(ImportResolved::new("js", format!("/root/{rest}"))),
                None => Resolution::Declined,
            })
        }
    }

    fn ctx() -> Context {
        Context::new("/root", Arc::new(MemoryFileSystem::new()))
    }

    fn facade(resolvers: Vec<Arc<dyn Resolver>>) -> ResolverFacade {
        ResolverFacade::new(resolvers.into_iter().collect())
    }

    #[tokio::test]
    async fn test_no_resolvers_configured() {
        let err = facade(vec![]).resolve("./a.js", None, &[], &ctx()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ResolveFailed);
        assert_eq!(err.message, "no resolvers configured");
    }

    #[tokio::test]
    async fn test_all_resolvers_ignored() {
        let only: Arc<dyn Resolver> = Arc::new(Fixed {
            name: "only",
            priority: 0,
            answer: Resolution::Declined,
        });
        let err = facade(vec![only])
            .resolve("./a.js", None, &["only".to_string()], &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ResolveFailed);
        assert_eq!(err.message, "all resolvers were ignored");
    }

    #[tokio::test]
    async fn test_every_resolver_declines() {
        let declines: Arc<dyn Resolver> = Arc::new(Fixed {
            name: "nope",
            priority: 0,
            answer: Resolution::Declined,
        });
        let err = facade(vec![declines])
            .resolve("lodash", Some(Path::new("/root/index.js")), &[], &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ResolveFailed);
        assert_eq!(err.message, "unable to resolve 'lodash' from '/root/index.js'");
        assert_eq!(err.path.as_deref(), Some(Path::new("/root/index.js")));
    }

    #[tokio::test]
    async fn test_priority_and_external_stop_the_chain() {
        let external: Arc<dyn Resolver> = Arc::new(Fixed {
            name: "builtins",
            priority: 10,
            answer: Resolution::External,
        });
        let fallback: Arc<dyn Resolver> = Arc::new(Fixed {
            name: "fallback",
            priority: 0,
            answer: Resolution::Resolved(ImportResolved::new("js", "/root/fs.js")),
        });
        let facade = facade(vec![fallback, external]);
        assert_eq!(facade.names().collect::<Vec<_>>(), ["builtins", "fallback"]);

        let outcome = facade.resolve("fs", None, &[], &ctx()).await.unwrap();
        assert_eq!(outcome, ResolveOutcome::External);

        let ignored = facade
            .resolve("fs", None, &["builtins".to_string()], &ctx())
            .await
            .unwrap();
        assert_eq!(
            ignored.into_resolved(),
            Some(ImportResolved::new("js", "/root/fs.js"))
        );
    }

    #[tokio::test]
    async fn test_state_accumulates_across_resolvers() {
        let relative: Arc<dyn Resolver> = Arc::new(Relative);
        let alias: Arc<dyn Resolver> = Arc::new(Alias);
        let facade = facade(vec![relative, alias]);
        let outcome = facade.resolve("~/util.js", None, &[], &ctx()).await.unwrap();
        assert_eq!(
            outcome,
            ResolveOutcome::Resolved(ImportResolved::new("js", "/root/util.js"))
        );
    }

    #[tokio::test]
    async fn test_invalid_result_is_rejected() {
        let bad: Arc<dyn Resolver> = Arc::new(Fixed {
            name: "bad",
            priority: 0,
            answer: Resolution::Resolved(ImportResolved::new("js", "relative.js")),
        });
        let err = facade(vec![bad]).resolve("x", None, &[], &ctx()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ResolveFailed);
        assert!(err.message.contains("resolver 'bad'"));
    }
}
