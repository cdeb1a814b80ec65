//! Error types for configuration loading and validation.

use std::path::PathBuf;

use pundle_core::{ErrorCode, PundleError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("no entries specified")]
    NoEntries,

    #[error("invalid config value for '{field}': {hint}")]
    InvalidValue { field: String, hint: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            hint: hint.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ConfigError::NotFound(_) => ErrorCode::ConfigNotFound,
            _ => ErrorCode::InvalidConfig,
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<ConfigError> for PundleError {
    fn from(err: ConfigError) -> Self {
        let code = err.code();
        let path = match &err {
            ConfigError::NotFound(path) => Some(path.clone()),
            _ => None,
        };
        let converted = PundleError::new(code, err.to_string());
        match path {
            Some(path) => converted.with_path(path),
            None => converted,
        }
    }
}
