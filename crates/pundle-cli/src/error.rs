//! Error handling for the pundle CLI.
//!
//! Build failures stay [`PundleError`]s all the way to `main`, where they are
//! rendered as miette diagnostics with their error code. Everything the CLI
//! itself can get wrong (output paths, the watcher, arguments) lives in
//! [`CliError`].

mod miette;

use std::path::PathBuf;

use pundle_config::ConfigError;
use pundle_core::PundleError;
use thiserror::Error;

pub use self::miette::cli_error_to_miette;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A build, rebuild or generation failure from the core.
    #[error(transparent)]
    Build(#[from] PundleError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Refusing to write outside the output directory: {}", .0.display())]
    OutputEscapes(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("{0}")]
    Custom(String),
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;

/// Attach context to fallible calls.
pub trait ResultExt<T> {
    /// Name the file an I/O error was about.
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T>;

    fn context(self, msg: impl std::fmt::Display) -> Result<T>;
}

impl<T, E: Into<CliError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T> {
        self.map_err(|e| match e.into() {
            CliError::Io(io_err) => CliError::Custom(format!(
                "{}: {}",
                path.as_ref().display(),
                io_err
            )),
            other => other,
        })
    }

    fn context(self, msg: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{msg}: {err}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_with_path_names_the_file() {
        let result: std::result::Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        let err = result.with_path("/out/a.js").unwrap_err();
        assert!(err.to_string().contains("/out/a.js"));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_build_errors_are_transparent() {
        let err: CliError = PundleError::resolve_failed("unable to resolve './x'").into();
        assert_eq!(err.to_string(), "RESOLVE_FAILED: unable to resolve './x'");
    }
}
