//! Miette diagnostic conversion for CLI errors.

use miette::Report;
use pundle_core::PundleError;

use crate::error::CliError;

/// Convert a CLI error into a miette report for the final exit.
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Build(e) => Report::new(e),
        CliError::Config(e) => Report::new(PundleError::from(e)),
        other => miette::miette!("{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pundle_config::ConfigError;

    #[test]
    fn test_config_errors_keep_their_code() {
        let report = cli_error_to_miette(CliError::Config(ConfigError::NoEntries));
        let code = report.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("INVALID_CONFIG"));
    }
}
