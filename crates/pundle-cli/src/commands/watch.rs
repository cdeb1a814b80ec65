//! `pundle watch`: build, then rebuild affected chunks on file changes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use pundle_core::{Chunk, ChunkGenerated, ChunkKey, GenerateHook, Job, Master, WatchController};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::signal;

use crate::cli::WatchArgs;
use crate::commands::{announce_config, ensure_out_dir, summary_rows};
use crate::error::{CliError, Result};
use crate::output::OutputWriter;
use crate::session::Session;
use crate::ui;
use crate::watcher::{FileWatcher, IgnoreRules};

/// How long an in-flight rebuild may take to wind down after Ctrl+C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Execute the watch command. Returns when Ctrl+C is pressed or the
/// controller stops on a crashed worker.
pub async fn execute(args: WatchArgs) -> Result<()> {
    let session = Session::from_args(&args.session)?;
    announce_config(session.config_path.as_ref());
    ensure_out_dir(&session.writer)?;

    let debounce = args
        .debounce
        .map(Duration::from_millis)
        .unwrap_or_else(|| session.config.debounce());
    let rules = IgnoreRules::new(
        session.config.root(),
        vec![session.config.output_dir(), session.config.cache_dir()],
        session.config.watch.ignore.clone(),
    );

    let hook = Arc::new(WriteHook::new(session.master.clone(), session.writer.clone()));
    let (watcher, events) = FileWatcher::new(rules)?;
    ui::info(&format!(
        "Watching {} (debounce {})",
        watcher.root().display(),
        ui::format_duration(debounce)
    ));

    let handle = WatchController::new(session.master.clone(), hook)
        .with_debounce(debounce)
        .spawn(events);
    let join = handle.join();
    tokio::pin!(join);

    let stopped = tokio::select! {
        result = &mut join => Some(result),
        _ = signal::ctrl_c() => None,
    };
    // closes the event channel, which ends the controller loop
    drop(watcher);

    let result = match stopped {
        Some(result) => result,
        None => {
            ui::info("Stopping watch...");
            match tokio::time::timeout(SHUTDOWN_GRACE, join).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("Rebuild still running at shutdown, abandoning it");
                    Ok(())
                }
            }
        }
    };

    session.master.flush_cache();
    result.map_err(CliError::from)
}

/// Regenerates and writes the chunks touched by each rebuild.
pub struct WriteHook {
    master: Arc<Master>,
    writer: OutputWriter,
    /// Output path of every chunk written so far.
    written: Mutex<FxHashMap<ChunkKey, Option<PathBuf>>>,
}

impl WriteHook {
    pub fn new(master: Arc<Master>, writer: OutputWriter) -> Self {
        Self {
            master,
            writer,
            written: Mutex::new(FxHashMap::default()),
        }
    }

    /// Reject outputs that would overwrite a live chunk written earlier.
    fn check_collisions(
        &self,
        job: &Job,
        selected: &[(ChunkKey, Chunk)],
        generated: &[ChunkGenerated],
    ) -> std::result::Result<(), String> {
        let written = self.written.lock();
        for ((key, chunk), output) in selected.iter().zip(generated) {
            let Some(path) = output.file_path.as_ref() else {
                continue;
            };
            let owner = written.iter().find(|(other, other_path)| {
                *other != key && other_path.as_ref() == Some(path) && job.has_chunk(other)
            });
            if let Some((other, _)) = owner {
                let other = job
                    .get_chunk(other)
                    .map(|c| c.display_name())
                    .unwrap_or_else(|| other.to_string());
                return Err(format!(
                    "chunks '{}' and '{}' both write to '{}'",
                    other,
                    chunk.display_name(),
                    path.display()
                ));
            }
        }
        Ok(())
    }
}

/// Chunks to regenerate after a rebuild: those whose own files or
/// dependency closure include a changed path, plus every chunk not written
/// yet (e.g. split off by a new dynamic import). Everything is selected when
/// `changed` is empty.
pub fn affected_chunks(
    job: &Job,
    changed: &[PathBuf],
    written: &FxHashMap<ChunkKey, Option<PathBuf>>,
) -> Vec<(ChunkKey, Chunk)> {
    let chunks = job.chunks().into_iter();
    if changed.is_empty() {
        return chunks.collect();
    }

    let changed: FxHashSet<&PathBuf> = changed.iter().collect();
    chunks
        .filter(|(key, chunk)| {
            !written.contains_key(key)
                || changed.iter().any(|path| chunk.references(path))
                || job
                    .chunk_closure(chunk)
                    .iter()
                    .any(|file| changed.contains(&file.file_path))
        })
        .collect()
}

#[async_trait]
impl GenerateHook for WriteHook {
    async fn on_generate(&self, job: &Arc<Job>, changed: &[PathBuf]) -> pundle_core::Result<()> {
        let start = Instant::now();
        let selected = {
            let mut written = self.written.lock();
            written.retain(|key, _| job.has_chunk(key));
            affected_chunks(job, changed, &written)
        };
        if selected.is_empty() {
            tracing::debug!(changed = changed.len(), "No chunk affected by change");
            return Ok(());
        }

        // a failed generation is retried by the next change
        let chunks: Vec<Chunk> = selected.iter().map(|(_, chunk)| chunk.clone()).collect();
        let generated = match self.master.generate_chunks(job, &chunks).await {
            Ok(generated) => generated,
            Err(err) => {
                ui::error(&err.to_string());
                return Ok(());
            }
        };
        self.master.flush_cache();

        if let Err(message) = self.check_collisions(job, &selected, &generated.chunks) {
            ui::error(&message);
            return Ok(());
        }

        match self.writer.write(&generated.chunks) {
            Ok(files) => {
                let mut written = self.written.lock();
                for ((key, _), output) in selected.iter().zip(&generated.chunks) {
                    written.insert(key.clone(), output.file_path.clone());
                }
                drop(written);
                ui::print_summary(&summary_rows(&self.writer, &files), start.elapsed());
                Ok(())
            }
            Err(CliError::Build(err)) => Err(err),
            Err(err) => {
                ui::error(&err.to_string());
                Ok(())
            }
        }
    }
}
