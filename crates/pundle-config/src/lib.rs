//! Configuration for pundle sessions.
//!
//! [`load`] merges defaults, a `pundle.config.json` / `pundle.config.toml`
//! file, `PUNDLE_` environment variables and CLI overrides into a validated
//! [`PundleConfig`].

pub mod config;
pub mod error;
pub mod loading;
pub mod validation;

pub use config::{
    CacheConfig, ComponentsConfig, OutputConfig, PundleConfig, WatchConfig, WorkersConfig,
    default_extensions,
};
pub use error::{ConfigError, Result};
pub use loading::{CONFIG_FILES, ConfigOverrides, LoadedConfig, discover, load};
pub use validation::validate;
