//! Logging setup for the pundle CLI.
//!
//! Library crates only emit `tracing` events; this installs the subscriber.
//! Filter precedence: `--verbose`, then `--quiet`, then `RUST_LOG`, then
//! info for pundle crates.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const VERBOSE_FILTER: &str =
    "pundle=debug,pundle_core=debug,pundle_config=debug,pundle_components=debug,pundle_cli=debug";
const QUIET_FILTER: &str = "error";
const DEFAULT_FILTER: &str = "pundle=info,pundle_core=info,pundle_config=info,pundle_cli=info";

/// Filter for the given verbosity flags.
pub fn filter_for(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color)
        .compact();

    // a second init (tests) is not an error worth surfacing
    let _ = tracing_subscriber::registry()
        .with(filter_for(verbose, quiet))
        .with(fmt_layer)
        .try_init();
}
