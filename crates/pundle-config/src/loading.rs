//! Multi-source configuration loading.
//!
//! Priority, lowest first: defaults, config file, `PUNDLE_` environment
//! variables, CLI overrides.

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format as _, Json, Serialized, Toml},
};
use serde_json::{Map, Value};

use crate::config::PundleConfig;
use crate::error::{ConfigError, Result};
use crate::validation::validate;

/// Config file names searched in the working directory, in order.
pub const CONFIG_FILES: &[&str] = &["pundle.config.json", "pundle.config.toml"];

pub const ENV_PREFIX: &str = "PUNDLE_";

/// Values set on the command line. Only fields that were actually given
/// override lower layers.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub entries: Vec<String>,
    pub root_directory: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub no_cache: bool,
    pub reset_cache: bool,
}

impl ConfigOverrides {
    fn to_value(&self) -> Value {
        let mut root = Map::new();
        if !self.entries.is_empty() {
            root.insert("entries".into(), Value::from(self.entries.clone()));
        }
        if let Some(dir) = &self.root_directory {
            root.insert("rootDirectory".into(), path_value(dir));
        }
        if let Some(dir) = &self.output_dir {
            root.insert("output".into(), object([("rootDirectory", path_value(dir))]));
        }
        if let Some(count) = self.workers {
            root.insert("workers".into(), object([("count", Value::from(count))]));
        }

        let mut cache = Map::new();
        if self.no_cache {
            cache.insert("enabled".into(), Value::Bool(false));
        }
        if self.reset_cache {
            cache.insert("reset".into(), Value::Bool(true));
        }
        if !cache.is_empty() {
            root.insert("cache".into(), Value::Object(cache));
        }
        Value::Object(root)
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
            && self.root_directory.is_none()
            && self.output_dir.is_none()
            && self.workers.is_none()
            && !self.no_cache
            && !self.reset_cache
    }
}

fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

fn object<const N: usize>(fields: [(&str, Value); N]) -> Value {
    Value::Object(
        fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    )
}

/// A loaded, validated configuration.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: PundleConfig,
    /// The config file used, if any.
    pub path: Option<PathBuf>,
    /// Cache epoch: changes whenever the config file or pundle version does.
    pub epoch: String,
}

/// Find a config file in `cwd`.
pub fn discover(cwd: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| cwd.join(name))
        .find(|path| path.is_file())
}

/// Load configuration for a session started in `cwd`.
///
/// `explicit` must exist when given. Without it, `cwd` is searched for one
/// of [`CONFIG_FILES`]; having none is fine.
pub fn load(cwd: &Path, explicit: Option<&Path>, overrides: &ConfigOverrides) -> Result<LoadedConfig> {
    let path = match explicit {
        Some(path) => {
            let path = absolutize(cwd, path);
            if !path.is_file() {
                return Err(ConfigError::NotFound(path));
            }
            Some(path)
        }
        None => discover(cwd),
    };

    let mut figment = Figment::new().merge(Serialized::defaults(PundleConfig::default()));
    let mut bytes = Vec::new();
    if let Some(path) = &path {
        bytes = std::fs::read(path)?;
        figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => figment.merge(Toml::file(path)),
            _ => figment.merge(Json::file(path)),
        };
    }

    figment = figment.merge(env_provider());

    if !overrides.is_empty() {
        figment = figment.merge(Serialized::defaults(overrides.to_value()));
    }

    let mut config: PundleConfig = figment.extract()?;

    let base = path
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.to_path_buf());
    let root = match config.root_directory.take() {
        Some(root) => absolutize(&base, &root),
        None => path_clean::clean(&base),
    };
    config.root_directory = Some(root);

    validate(&config)?;

    let epoch = epoch(&bytes);
    tracing::debug!(
        path = ?path,
        root = %config.root().display(),
        epoch = %epoch,
        "Loaded configuration"
    );

    Ok(LoadedConfig {
        config,
        path,
        epoch,
    })
}

/// `PUNDLE_WORKERS__TIMEOUT_MS=500` becomes `workers.timeoutMs = 500`.
fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX)
        .split("__")
        .lowercase(false)
        .map(|key| env_key_to_field(key.as_str()).into())
}

fn env_key_to_field(key: &str) -> String {
    key.split('.')
        .map(|segment| {
            let mut out = String::with_capacity(segment.len());
            for (i, word) in segment.split('_').filter(|w| !w.is_empty()).enumerate() {
                let word = word.to_ascii_lowercase();
                if i == 0 {
                    out.push_str(&word);
                } else {
                    let mut chars = word.chars();
                    if let Some(first) = chars.next() {
                        out.push(first.to_ascii_uppercase());
                        out.push_str(chars.as_str());
                    }
                }
            }
            out
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path_clean::clean(path)
    } else {
        path_clean::clean(base.join(path))
    }
}

fn epoch(config_bytes: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
    hasher.update(&[0]);
    hasher.update(config_bytes);
    hasher.finalize().to_hex().as_str()[..16].to_string()
}
