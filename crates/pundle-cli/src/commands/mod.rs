//! Command implementations.
//!
//! - [`build`] - one batch build
//! - [`watch`] - build, then rebuild on file changes

pub mod build;
pub mod watch;

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::output::{OutputWriter, WrittenFile};
use crate::ui;

pub use build::execute as build_execute;
pub use watch::execute as watch_execute;

/// Summary rows for written files, named relative to the output directory.
pub(crate) fn summary_rows(writer: &OutputWriter, files: &[WrittenFile]) -> Vec<(String, u64)> {
    files
        .iter()
        .map(|file| (display_relative(writer.out_dir(), &file.path), file.size))
        .collect()
}

pub(crate) fn display_relative(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Announce the config file a session was loaded from.
pub(crate) fn announce_config(path: Option<&PathBuf>) {
    match path {
        Some(path) => ui::info(&format!("Using config {}", path.display())),
        None => ui::info("No config file found, using defaults and flags"),
    }
}

pub(crate) fn ensure_out_dir(writer: &OutputWriter) -> Result<()> {
    std::fs::create_dir_all(writer.out_dir())?;
    Ok(())
}
