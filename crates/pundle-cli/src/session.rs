//! Turning a loaded configuration into a ready orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use pundle_config::{LoadedConfig, PundleConfig, load};
use pundle_core::{Context, Master, MemoryCache, PersistentCache, TransformCache};

use crate::cli::SessionArgs;
use crate::error::Result;
use crate::output::OutputWriter;

/// Everything a build or watch command needs.
pub struct Session {
    pub config: PundleConfig,
    pub config_path: Option<PathBuf>,
    pub master: Arc<Master>,
    pub writer: OutputWriter,
}

impl Session {
    /// Load configuration for `args` and assemble the orchestrator.
    pub fn from_args(args: &SessionArgs) -> Result<Self> {
        let cwd = match &args.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir()?,
        };
        let loaded = load(&cwd, args.config.as_deref(), &args.overrides())?;
        Self::new(loaded)
    }

    pub fn new(loaded: LoadedConfig) -> Result<Self> {
        let LoadedConfig {
            config,
            path,
            epoch,
        } = loaded;

        let ctx = Arc::new(
            Context::native(config.root()).with_manifest_name(config.watch.manifest.clone()),
        );

        let mut builder = pundle_components::install(
            Master::builder(ctx),
            config.components.extensions.clone(),
        )
        .entries(config.entries.iter().cloned())
        .templates(config.output_templates())
        .workers(config.workers.count)
        .timeout(config.timeout());

        if let Some(cache) = open_cache(&config, &epoch) {
            builder = builder.cache(cache);
        }

        let master = builder.build()?;
        let writer = OutputWriter::new(config.output_dir());
        Ok(Self {
            config,
            config_path: path,
            master,
            writer,
        })
    }
}

/// The persistent cache, or an in-memory one when it cannot be opened.
fn open_cache(config: &PundleConfig, epoch: &str) -> Option<Arc<dyn TransformCache>> {
    if !config.cache.enabled {
        return None;
    }
    let dir = config.cache_dir();
    match PersistentCache::open(&dir, epoch, config.cache.reset) {
        Ok(cache) => {
            tracing::debug!(dir = %dir.display(), epoch, "Opened transform cache");
            Some(Arc::new(cache))
        }
        Err(err) => {
            tracing::warn!(
                dir = %dir.display(),
                error = %err,
                "Transform cache unavailable, caching in memory only"
            );
            Some(MemoryCache::shared())
        }
    }
}
