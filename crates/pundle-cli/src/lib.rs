//! Pundle CLI - batch and incremental watch builds.
//!
//! - [`cli`] - argument parsing with clap
//! - [`session`] - config loading and orchestrator assembly
//! - [`output`] - writing generated chunks under the output directory
//! - [`watcher`] - filesystem events for watch mode
//! - [`error`], [`logger`], [`ui`] - diagnostics, tracing setup, terminal output

pub mod cli;
pub mod commands;
pub mod error;
pub mod logger;
pub mod output;
pub mod session;
pub mod ui;
pub mod watcher;

pub use error::{CliError, Result};
pub use session::Session;
