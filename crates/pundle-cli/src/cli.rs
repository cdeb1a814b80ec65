//! Command-line interface definition.
//!
//! - `pundle build` runs one batch build and writes the outputs.
//! - `pundle watch` builds, then rebuilds incrementally on file changes.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pundle_config::ConfigOverrides;

/// Pundle - an incremental build orchestrator for module graphs
#[derive(Parser, Debug)]
#[command(
    name = "pundle",
    version,
    about = "An incremental build orchestrator for module graphs",
    long_about = "Pundle resolves entry files, transforms every reachable module through\n\
                  pluggable components, groups them into chunks and generates outputs.\n\
                  In watch mode only the files affected by a change are rebuilt."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build every entry once and write the outputs
    Build(BuildArgs),

    /// Build, then rebuild affected chunks whenever files change
    ///
    /// Stops cleanly on Ctrl+C.
    Watch(WatchArgs),
}

/// Options shared by every command that runs a build.
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// Entry requests, resolved from the project root
    ///
    /// Overrides `entries` from the config file.
    #[arg(value_name = "ENTRY")]
    pub entries: Vec<String>,

    /// Path to a pundle.config.json or pundle.config.toml file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Working directory to search for the config file
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Output directory, relative to the project root
    #[arg(short = 'd', long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Number of transform lanes
    #[arg(short = 'j', long, value_name = "N")]
    pub workers: Option<usize>,

    /// Disable the persistent transform cache
    #[arg(long)]
    pub no_cache: bool,

    /// Drop every cached transform before building
    #[arg(long, conflicts_with = "no_cache")]
    pub reset_cache: bool,
}

impl SessionArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            entries: self.entries.clone(),
            root_directory: None,
            output_dir: self.out_dir.clone(),
            workers: self.workers,
            no_cache: self.no_cache,
            reset_cache: self.reset_cache,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    #[command(flatten)]
    pub session: SessionArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Debounce window for file events, in milliseconds
    #[arg(long, value_name = "MS")]
    pub debounce: Option<u64>,
}
