//! `pundle build`: compile every entry once and write the outputs.

use std::time::Instant;

use crate::cli::BuildArgs;
use crate::commands::{announce_config, ensure_out_dir, summary_rows};
use crate::error::Result;
use crate::session::Session;
use crate::ui;

/// Execute the build command.
///
/// Configuration is layered defaults < file < `PUNDLE_*` environment <
/// flags. Nothing is written unless the whole build succeeds.
pub async fn execute(args: BuildArgs) -> Result<()> {
    let start = Instant::now();

    let session = Session::from_args(&args.session)?;
    announce_config(session.config_path.as_ref());
    tracing::debug!(
        root = %session.config.root().display(),
        entries = session.config.entries.len(),
        workers = session.config.workers.count,
        "Starting build"
    );

    let generated = session.master.execute().await?;
    session.master.flush_cache();

    ensure_out_dir(&session.writer)?;
    let written = session.writer.write(&generated.chunks)?;
    ui::print_summary(&summary_rows(&session.writer, &written), start.elapsed());
    Ok(())
}
