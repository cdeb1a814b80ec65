//! Configuration validation.

use std::path::{Component, Path};

use crate::config::PundleConfig;
use crate::error::{ConfigError, Result};

const PLACEHOLDERS: &[&str] = &["[name]", "[id]", "[format]", "[ext]"];

/// Check a loaded configuration. The first problem found is returned.
pub fn validate(config: &PundleConfig) -> Result<()> {
    if config.entries.is_empty() {
        return Err(ConfigError::NoEntries);
    }
    if let Some(index) = config.entries.iter().position(|e| e.trim().is_empty()) {
        return Err(ConfigError::invalid(
            format!("entries[{index}]"),
            "entry requests must not be empty",
        ));
    }

    if config.workers.count == 0 {
        return Err(ConfigError::invalid("workers.count", "must be at least 1"));
    }
    if config.workers.timeout_ms == Some(0) {
        return Err(ConfigError::invalid(
            "workers.timeoutMs",
            "must be greater than 0, or omitted to disable",
        ));
    }

    for (format, template) in &config.output.formats {
        if format.trim().is_empty() {
            return Err(ConfigError::invalid("output.formats", "format names must not be empty"));
        }
        if let Some(template) = template {
            validate_template(format, template)?;
        }
    }

    for (ext, format) in &config.components.extensions {
        if ext.is_empty() || ext.starts_with('.') {
            return Err(ConfigError::invalid(
                "components.extensions",
                format!("'{ext}' must be an extension without the leading dot"),
            ));
        }
        if format.trim().is_empty() {
            return Err(ConfigError::invalid(
                format!("components.extensions.{ext}"),
                "format names must not be empty",
            ));
        }
    }

    if config.watch.manifest.trim().is_empty() {
        return Err(ConfigError::invalid("watch.manifest", "must name a file"));
    }

    Ok(())
}

fn validate_template(format: &str, template: &str) -> Result<()> {
    let field = format!("output.formats.{format}");
    let has_placeholder = PLACEHOLDERS.iter().any(|p| template.contains(p));
    let has_extension = Path::new(template).extension().is_some();
    if !has_placeholder && !has_extension {
        return Err(ConfigError::invalid(
            field,
            format!("template '{template}' needs a placeholder such as [name] or a file extension"),
        ));
    }

    let path = Path::new(template);
    if path.is_absolute() {
        return Err(ConfigError::invalid(
            field,
            "templates are relative to output.rootDirectory",
        ));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ConfigError::invalid(
            field,
            "templates must not leave output.rootDirectory",
        ));
    }
    Ok(())
}
