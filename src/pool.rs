//! Bounded file-level worker pool for one directory.
//!
//! A walker thread feeds file paths into a bounded queue (blocking when it is
//! full) and `file_workers` threads drain it. Each worker owns its own sink
//! writer and keeps a local [`DirectoryReport`]; the reports are summed once
//! every worker has exited.

use std::io;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use glob::Pattern;
use walkdir::WalkDir;

use crate::config::{PipelineOptions, TableName};
use crate::error::SinkError;
use crate::extract::Extractor;
use crate::input::{is_included, open_input_stream};
use crate::sink::{GameSink, GameWriter, InsertOutcome};
use crate::splitter::GameBlocks;
use crate::types::GameRecord;

const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// One dataset: a directory tree whose games all land in `table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryJob {
    pub path: PathBuf,
    pub table: TableName,
    /// `false` only looks at regular files directly inside `path`.
    pub recursive: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryReport {
    pub files: u64,
    pub files_failed: u64,
    pub games: u64,
    pub duplicates: u64,
    pub games_failed: u64,
}

impl AddAssign for DirectoryReport {
    fn add_assign(&mut self, rhs: Self) {
        self.files += rhs.files;
        self.files_failed += rhs.files_failed;
        self.games += rhs.games;
        self.duplicates += rhs.duplicates;
        self.games_failed += rhs.games_failed;
    }
}

/// Run-wide stop signal; once raised, workers stop taking new files and games.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Running total of persisted games across every pool, for progress logging.
#[derive(Debug, Default)]
pub struct Progress(AtomicU64);

impl Progress {
    fn record(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything a file worker needs besides its writer.
pub struct PoolContext<'a> {
    pub options: &'a PipelineOptions,
    pub extractor: &'a Extractor,
    pub progress: &'a Progress,
    pub cancel: &'a Cancellation,
}

/// Provisions the job's table, then processes every file under the job's
/// path with `options.file_workers` workers. Blocks until all files are done.
///
/// Only a provisioning failure is returned; file- and game-level failures are
/// logged and counted in the report.
pub fn process_directory<S: GameSink>(
    job: &DirectoryJob,
    sink: &S,
    ctx: &PoolContext<'_>,
) -> Result<DirectoryReport, SinkError> {
    sink.provision(&job.table)?;

    let (file_tx, file_rx) = bounded::<PathBuf>(ctx.options.file_queue);

    let report = thread::scope(|scope| {
        let walker = scope.spawn(|| {
            walk_files(
                &job.path,
                job.recursive,
                ctx.options.include.as_ref(),
                file_tx,
                ctx.cancel,
            )
        });

        let workers: Vec<_> = (0..ctx.options.file_workers)
            .map(|_| {
                let file_rx = file_rx.clone();
                scope.spawn(move || file_worker(file_rx, sink, &job.table, ctx))
            })
            .collect();
        drop(file_rx);

        let mut report = DirectoryReport::default();
        for worker in workers {
            match worker.join() {
                Ok(local) => report += local,
                Err(_) => log::error!("file worker for {} panicked", job.path.display()),
            }
        }
        if walker.join().is_err() {
            log::error!("directory walker for {} panicked", job.path.display());
        }
        report
    });

    Ok(report)
}

fn walk_files(
    root: &Path,
    recursive: bool,
    include: Option<&Pattern>,
    file_tx: Sender<PathBuf>,
    cancel: &Cancellation,
) {
    let mut walker = WalkDir::new(root).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }

    for entry in walker {
        if cancel.is_cancelled() {
            break;
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).display().to_string();
                log::warn!("Error accessing file {path}: {e}");
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_included(entry.path(), include) {
            continue;
        }

        // Blocks while the queue is full; fails only once every worker is gone.
        if file_tx.send(entry.into_path()).is_err() {
            break;
        }
    }
}

fn file_worker<S: GameSink>(
    file_rx: Receiver<PathBuf>,
    sink: &S,
    table: &TableName,
    ctx: &PoolContext<'_>,
) -> DirectoryReport {
    let mut report = DirectoryReport::default();

    let mut writer = match sink.writer() {
        Ok(writer) => writer,
        Err(e) => {
            log::error!("Storage unavailable, cancelling run: {e}");
            ctx.cancel.cancel();
            return report;
        }
    };

    for path in file_rx {
        if ctx.cancel.is_cancelled() {
            break;
        }

        report.files += 1;
        if let Err(e) = process_file(&path, &mut writer, table, ctx, &mut report) {
            report.files_failed += 1;
            log::warn!("Error reading file {}: {e}", path.display());
        } else {
            log::debug!("Finished file {}", path.display());
        }
    }

    report
}

/// Splits, parses and persists every game in one file. Games persisted before
/// a read error stay persisted.
fn process_file<W: GameWriter>(
    path: &Path,
    writer: &mut W,
    table: &TableName,
    ctx: &PoolContext<'_>,
    report: &mut DirectoryReport,
) -> io::Result<()> {
    let input = open_input_stream(path)?;

    for block in GameBlocks::new(input) {
        let block = block?;
        if ctx.cancel.is_cancelled() {
            break;
        }

        let game = ctx.extractor.parse(&block);
        if let Some(warnings) = game.parse_warnings.as_deref() {
            log::warn!(
                "{}: game '{}' kept defaults for: {warnings}",
                path.display(),
                game.external_id
            );
        }

        match insert_with_retry(writer, table, &game, ctx.options.insert_retries) {
            Ok(InsertOutcome::Inserted) => {
                report.games += 1;
                let total = ctx.progress.record();
                log::debug!("Total games processed: {total}");
            }
            Ok(InsertOutcome::Duplicate) => report.duplicates += 1,
            Err(e) => {
                report.games_failed += 1;
                log::warn!("Failed to insert game from {}: {e}", path.display());
            }
        }
    }

    Ok(())
}

fn insert_with_retry<W: GameWriter>(
    writer: &mut W,
    table: &TableName,
    game: &GameRecord,
    retries: u32,
) -> Result<InsertOutcome, SinkError> {
    let mut backoff = RETRY_BACKOFF;
    let mut attempt = 0;
    loop {
        match writer.insert(table, game) {
            Ok(outcome) => return Ok(outcome),
            Err(e) if attempt < retries => {
                attempt += 1;
                log::debug!("insert failed (attempt {attempt} of {retries} retries): {e}");
                thread::sleep(backoff);
                backoff *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}
