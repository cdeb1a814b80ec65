//! Error types surfaced by the build core.
//!
//! Every failure that crosses a collaborator boundary is a [`PundleError`]:
//! a broad [`ErrorKind`] (who is at fault), a stable [`ErrorCode`] (what went
//! wrong) and an optional file path and source location. Errors are `Clone`
//! because a single in-flight failure is handed to every caller waiting on
//! the same graph node.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Broad error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorKind {
    /// Invalid or missing configuration.
    Config,
    /// Worker / process level failure.
    Daemon,
    /// Resolve, transform or generate failure during a build.
    Work,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "CONFIG"),
            ErrorKind::Daemon => write!(f, "DAEMON"),
            ErrorKind::Work => write!(f, "WORK"),
        }
    }
}

/// Stable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConfigNotFound,
    InvalidConfig,
    ResolveFailed,
    TransformFailed,
    GenerateFailed,
    WorkerCrashed,
}

impl ErrorCode {
    /// The category a code belongs to.
    pub fn kind(self) -> ErrorKind {
        match self {
            ErrorCode::ConfigNotFound | ErrorCode::InvalidConfig => ErrorKind::Config,
            ErrorCode::WorkerCrashed => ErrorKind::Daemon,
            ErrorCode::ResolveFailed | ErrorCode::TransformFailed | ErrorCode::GenerateFailed => {
                ErrorKind::Work
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ConfigNotFound => "CONFIG_NOT_FOUND",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::ResolveFailed => "RESOLVE_FAILED",
            ErrorCode::TransformFailed => "TRANSFORM_FAILED",
            ErrorCode::GenerateFailed => "GENERATE_FAILED",
            ErrorCode::WorkerCrashed => "WORKER_CRASHED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-based line and zero-based column inside a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// Error surfaced by the build core and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}{}", format_origin(.path.as_deref(), .loc.as_ref()))]
pub struct PundleError {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub message: String,
    pub path: Option<PathBuf>,
    pub loc: Option<Location>,
}

fn format_origin(path: Option<&Path>, loc: Option<&Location>) -> String {
    match (path, loc) {
        (Some(path), Some(loc)) => format!(" ({}:{}:{})", path.display(), loc.line, loc.column),
        (Some(path), None) => format!(" ({})", path.display()),
        _ => String::new(),
    }
}

impl PundleError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind: code.kind(),
            code,
            message: message.into(),
            path: None,
            loc: None,
        }
    }

    pub fn config_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigNotFound, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfig, message)
    }

    pub fn resolve_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResolveFailed, message)
    }

    pub fn transform_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransformFailed, message)
    }

    pub fn generate_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::GenerateFailed, message)
    }

    pub fn worker_crashed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::WorkerCrashed, message)
    }

    /// Attach the file the error originates from.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach a path only when none is recorded yet.
    pub fn or_path(mut self, path: &Path) -> Self {
        if self.path.is_none() {
            self.path = Some(path.to_path_buf());
        }
        self
    }

    pub fn with_loc(mut self, line: u32, column: u32) -> Self {
        self.loc = Some(Location { line, column });
        self
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }
}

impl miette::Diagnostic for PundleError {
    fn code(&self) -> Option<Box<dyn fmt::Display + '_>> {
        Some(Box::new(self.code))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help(&self) -> Option<Box<dyn fmt::Display + '_>> {
        let help = match self.code {
            ErrorCode::ConfigNotFound => {
                "Create a pundle.config.json file or pass --config <path>"
            }
            ErrorCode::InvalidConfig => "Check your configuration file for invalid values",
            ErrorCode::ResolveFailed => {
                "Check that the imported file exists and the request is spelled correctly"
            }
            ErrorCode::TransformFailed => "A transformer rejected this file; see the message above",
            ErrorCode::GenerateFailed => {
                "No generator produced output for this chunk; check the registered components"
            }
            ErrorCode::WorkerCrashed => "A worker task panicked or timed out; retry the build",
        };
        Some(Box::new(help))
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, PundleError>;
