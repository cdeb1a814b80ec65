//! The configuration model. Field names are camelCase on disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use pundle_core::OutputTemplates;
use serde::{Deserialize, Serialize};

pub const DEFAULT_OUTPUT_DIR: &str = "dist";
pub const DEFAULT_CACHE_DIR: &str = ".pundle/cache";
pub const DEFAULT_DEBOUNCE_MS: u64 = 75;

pub fn default_workers() -> usize {
    pundle_core::pool::default_lanes()
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_manifest() -> String {
    pundle_core::context::DEFAULT_MANIFEST.to_string()
}

/// Extension to format table used by the default resolver.
pub fn default_extensions() -> IndexMap<String, String> {
    [
        ("js", "js"),
        ("mjs", "js"),
        ("cjs", "js"),
        ("css", "css"),
        ("json", "json"),
    ]
    .into_iter()
    .map(|(ext, format)| (ext.to_string(), format.to_string()))
    .collect()
}

/// Pundle configuration, loaded from `pundle.config.json` /
/// `pundle.config.toml`, the environment and CLI flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PundleConfig {
    /// Project root. Relative paths elsewhere resolve against it. Defaults to
    /// the config file's directory, else the working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_directory: Option<PathBuf>,

    /// Entry requests, resolved from the root.
    #[serde(default)]
    pub entries: Vec<String>,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub components: ComponentsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub root_directory: PathBuf,

    /// Output path template per format. `null` generates without writing.
    #[serde(default)]
    pub formats: IndexMap<String, Option<String>>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root_directory: default_output_dir(),
            formats: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_dir")]
    pub root_directory: PathBuf,

    /// Drop every cached transform when the cache is opened.
    #[serde(default)]
    pub reset: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root_directory: default_cache_dir(),
            reset: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkersConfig {
    /// Transform lanes. Resolution always has one extra lane of its own.
    #[serde(default = "default_workers")]
    pub count: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_workers(),
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Extra ignore patterns: `*.ext` suffixes or path prefixes.
    #[serde(default)]
    pub ignore: Vec<String>,

    #[serde(default = "default_manifest")]
    pub manifest: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            ignore: Vec::new(),
            manifest: default_manifest(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ComponentsConfig {
    #[serde(default = "default_extensions")]
    pub extensions: IndexMap<String, String>,
}

impl Default for ComponentsConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
        }
    }
}

impl Default for PundleConfig {
    fn default() -> Self {
        Self {
            root_directory: None,
            entries: Vec::new(),
            output: OutputConfig::default(),
            cache: CacheConfig::default(),
            workers: WorkersConfig::default(),
            watch: WatchConfig::default(),
            components: ComponentsConfig::default(),
        }
    }
}

impl PundleConfig {
    /// The project root. Only meaningful after loading, which makes it
    /// absolute.
    pub fn root(&self) -> &Path {
        self.root_directory.as_deref().unwrap_or(Path::new("."))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root().join(&self.output.root_directory)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root().join(&self.cache.root_directory)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root().join(&self.watch.manifest)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.workers.timeout_ms.map(Duration::from_millis)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watch.debounce_ms)
    }

    pub fn output_templates(&self) -> OutputTemplates {
        OutputTemplates::new(self.output.formats.clone())
    }

    /// Format for a file extension, if configured.
    pub fn format_for_extension(&self, ext: &str) -> Option<&str> {
        self.components.extensions.get(ext).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PundleConfig::default();
        assert!(config.entries.is_empty());
        assert_eq!(config.output.root_directory, PathBuf::from("dist"));
        assert!(config.cache.enabled);
        assert_eq!(config.watch.debounce_ms, 75);
        assert_eq!(config.watch.manifest, "package.json");
        assert!(config.workers.count >= 1 && config.workers.count <= 8);
        assert_eq!(config.format_for_extension("mjs"), Some("js"));
        assert_eq!(config.format_for_extension("ts"), None);
    }

    #[test]
    fn test_camel_case_on_disk() {
        let json = r#"{
            "rootDirectory": "/project",
            "entries": ["./src/index.js"],
            "output": { "rootDirectory": "build", "formats": { "js": "[name].js", "css": null } },
            "workers": { "count": 2, "timeoutMs": 500 }
        }"#;
        let config: PundleConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.output_dir(), PathBuf::from("/project/build"));
        assert_eq!(config.output.formats.get("css"), Some(&None));
        assert_eq!(config.timeout(), Some(Duration::from_millis(500)));

        let value = serde_json::to_value(&config).unwrap();
        assert!(value.get("rootDirectory").is_some());
        assert!(value["workers"].get("timeoutMs").is_some());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = serde_json::from_str::<PundleConfig>(r#"{ "entry": ["a.js"] }"#).unwrap_err();
        assert!(err.to_string().contains("entry"));
    }
}
