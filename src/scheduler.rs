//! Top-level fan-out: one dataset per root subdirectory, processed by a
//! bounded pool of directory workers.

use std::fs;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::bounded;

use crate::config::{Config, PipelineOptions, TableName};
use crate::error::{ConfigError, IngestError};
use crate::extract::Extractor;
use crate::pool::{Cancellation, DirectoryJob, DirectoryReport, PoolContext, Progress, process_directory};
use crate::sink::GameSink;

pub const DEFAULT_DIR_WORKERS: usize = 3;
pub const DEFAULT_DIR_QUEUE: usize = 10;

/// Datasets found under the root, with their table names fixed up front.
#[derive(Debug, Default)]
pub struct Plan {
    pub jobs: Vec<DirectoryJob>,
    /// Subdirectories whose names do not map to a table identifier.
    pub rejected: Vec<PathBuf>,
}

/// Lists the root's immediate children. Each subdirectory becomes a
/// recursive job; regular files directly under the root form one extra,
/// non-recursive job written to `default_table`.
pub fn plan(root: &Path, default_table: &TableName) -> Result<Plan, IngestError> {
    let enumerate_err = |source| IngestError::Enumerate {
        path: root.to_path_buf(),
        source,
    };

    let mut plan = Plan::default();
    let mut has_root_files = false;

    for entry in fs::read_dir(root).map_err(enumerate_err)? {
        let entry = entry.map_err(enumerate_err)?;
        let file_type = entry.file_type().map_err(enumerate_err)?;
        let path = entry.path();

        if file_type.is_dir() {
            let name = entry.file_name();
            match TableName::from_dir_name(&name.to_string_lossy()) {
                Ok(table) => plan.jobs.push(DirectoryJob {
                    path,
                    table,
                    recursive: true,
                }),
                Err(e) => {
                    log::error!("Skipping directory {}: {e}", path.display());
                    plan.rejected.push(path);
                }
            }
        } else if file_type.is_file() {
            has_root_files = true;
        }
    }

    plan.jobs.sort_by(|a, b| a.path.cmp(&b.path));
    if has_root_files {
        plan.jobs.push(DirectoryJob {
            path: root.to_path_buf(),
            table: default_table.clone(),
            recursive: false,
        });
    }

    Ok(plan)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub directories: u64,
    pub directories_failed: u64,
    pub totals: DirectoryReport,
}

impl AddAssign for RunSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.directories += rhs.directories;
        self.directories_failed += rhs.directories_failed;
        self.totals += rhs.totals;
    }
}

impl RunSummary {
    /// Games newly written during the run.
    pub fn total_persisted(&self) -> u64 {
        self.totals.games
    }
}

pub struct Scheduler<'a, S> {
    sink: &'a S,
    options: PipelineOptions,
    default_table: TableName,
    dir_workers: usize,
    dir_queue: usize,
}

impl<'a, S: GameSink> Scheduler<'a, S> {
    pub fn new(sink: &'a S, options: PipelineOptions, default_table: TableName) -> Self {
        Self {
            sink,
            options,
            default_table,
            dir_workers: DEFAULT_DIR_WORKERS,
            dir_queue: DEFAULT_DIR_QUEUE,
        }
    }

    pub fn from_config(sink: &'a S, config: &Config) -> Result<Self, ConfigError> {
        let options = config.pipeline_options()?;
        let default_table = TableName::from_dir_name(&config.table)?;
        Ok(Self::new(sink, options, default_table)
            .with_dir_workers(config.dir_workers)
            .with_dir_queue(config.dir_queue))
    }

    pub fn with_dir_workers(mut self, dir_workers: usize) -> Self {
        self.dir_workers = dir_workers;
        self
    }

    pub fn with_dir_queue(mut self, dir_queue: usize) -> Self {
        self.dir_queue = dir_queue;
        self
    }

    /// Processes every dataset under `root` and blocks until all are done.
    ///
    /// Fails when the root cannot be enumerated, or with
    /// [`IngestError::Cancelled`] once storage is lost mid-run. A directory
    /// whose table cannot be provisioned is logged and counted; the others
    /// carry on.
    pub fn run(&self, root: &Path) -> Result<RunSummary, IngestError> {
        let plan = plan(root, &self.default_table)?;
        log::info!(
            "Found {} dataset(s) under {}",
            plan.jobs.len(),
            root.display()
        );

        let extractor = Extractor::new(self.options.site_prefix.clone(), self.options.with_positions);
        let progress = Progress::default();
        let cancel = Cancellation::default();
        let ctx = PoolContext {
            options: &self.options,
            extractor: &extractor,
            progress: &progress,
            cancel: &cancel,
        };
        let ctx = &ctx;
        let sink = self.sink;

        let (dir_tx, dir_rx) = bounded::<DirectoryJob>(self.dir_queue);

        let mut summary = thread::scope(|scope| {
            let workers: Vec<_> = (0..self.dir_workers)
                .map(|_| {
                    let dir_rx = dir_rx.clone();
                    scope.spawn(move || {
                        let mut local = RunSummary::default();
                        for job in dir_rx {
                            if ctx.cancel.is_cancelled() {
                                break;
                            }
                            local += run_job(&job, sink, ctx);
                        }
                        local
                    })
                })
                .collect();
            drop(dir_rx);

            for job in plan.jobs {
                if cancel.is_cancelled() || dir_tx.send(job).is_err() {
                    break;
                }
            }
            drop(dir_tx);

            let mut summary = RunSummary::default();
            for worker in workers {
                match worker.join() {
                    Ok(local) => summary += local,
                    Err(_) => log::error!("directory worker panicked"),
                }
            }
            summary
        });

        summary.directories_failed += plan.rejected.len() as u64;
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled {
                persisted: summary.total_persisted(),
            });
        }
        Ok(summary)
    }
}

fn run_job<S: GameSink>(job: &DirectoryJob, sink: &S, ctx: &PoolContext<'_>) -> RunSummary {
    log::info!("Processing {} into {}", job.path.display(), job.table);

    match process_directory(job, sink, ctx) {
        Ok(report) if ctx.cancel.is_cancelled() => {
            log::error!("{} left incomplete: run cancelled", job.path.display());
            RunSummary {
                directories: 0,
                directories_failed: 1,
                totals: report,
            }
        }
        Ok(report) => {
            log::info!(
                "Finished {}: {} files ({} failed), {} games, {} duplicates, {} failed games",
                job.path.display(),
                report.files,
                report.files_failed,
                report.games,
                report.duplicates,
                report.games_failed
            );
            RunSummary {
                directories: 1,
                directories_failed: 0,
                totals: report,
            }
        }
        Err(source) => {
            let err = IngestError::Directory {
                path: job.path.clone(),
                source,
            };
            log::error!("{err}");
            RunSummary {
                directories: 0,
                directories_failed: 1,
                totals: DirectoryReport::default(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::DuckDbSink;
    use crate::sink::memory::MemorySink;
    use std::fs;

    fn game_text(id: &str) -> String {
        format!(
            "[Event \"Rated Blitz game\"]\n[Site \"https://lichess.org/{id}\"]\n[WhiteElo \"1500\"]\n\n1. d4 d5 2. c4 0-1\n\n"
        )
    }

    fn table(name: &str) -> TableName {
        TableName::from_dir_name(name).unwrap()
    }

    fn scheduler<S: GameSink>(sink: &S) -> Scheduler<'_, S> {
        let options = PipelineOptions {
            file_workers: 2,
            file_queue: 2,
            with_positions: false,
            ..PipelineOptions::default()
        };
        Scheduler::new(sink, options, table("games"))
            .with_dir_workers(2)
            .with_dir_queue(1)
    }

    fn write_dataset(root: &Path, dir: &str, ids: &[&str]) {
        let path = root.join(dir);
        fs::create_dir_all(&path).unwrap();
        for id in ids {
            fs::write(path.join(format!("{id}.pgn")), game_text(id)).unwrap();
        }
    }

    #[test]
    fn test_plan_maps_directories_to_tables() {
        let root = tempfile::tempdir().unwrap();
        write_dataset(root.path(), "lichess-2024-01", &["a"]);
        write_dataset(root.path(), "2023 rapid", &["b"]);

        let plan = plan(root.path(), &table("games")).unwrap();
        let tables: Vec<_> = plan.jobs.iter().map(|j| j.table.to_string()).collect();

        assert_eq!(tables, vec!["_2023_rapid", "lichess_2024_01"]);
        assert!(plan.jobs.iter().all(|j| j.recursive));
        assert!(plan.rejected.is_empty());
    }

    #[test]
    fn test_plan_adds_root_files_job_last() {
        let root = tempfile::tempdir().unwrap();
        write_dataset(root.path(), "blitz", &["a"]);
        fs::write(root.path().join("loose.pgn"), game_text("loose")).unwrap();

        let plan = plan(root.path(), &table("games")).unwrap();
        let last = plan.jobs.last().unwrap();

        assert_eq!(plan.jobs.len(), 2);
        assert_eq!(last.table.as_str(), "games");
        assert!(!last.recursive);
    }

    #[test]
    fn test_plan_rejects_unmappable_directory_name() {
        let root = tempfile::tempdir().unwrap();
        write_dataset(root.path(), "---", &["a"]);

        let plan = plan(root.path(), &table("games")).unwrap();
        assert!(plan.jobs.is_empty());
        assert_eq!(plan.rejected.len(), 1);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope");
        let sink = MemorySink::new();

        let err = scheduler(&sink).run(&missing).unwrap_err();
        assert!(matches!(err, IngestError::Enumerate { .. }));
    }

    #[test]
    fn test_failed_directory_does_not_stop_others() {
        let root = tempfile::tempdir().unwrap();
        write_dataset(root.path(), "alpha", &["a1", "a2"]);
        write_dataset(root.path(), "broken", &["b1"]);
        write_dataset(root.path(), "gamma", &["g1", "g2", "g3"]);

        let sink = MemorySink::new().failing_provision("broken");
        let summary = scheduler(&sink).run(root.path()).unwrap();

        assert_eq!(summary.directories, 2);
        assert_eq!(summary.directories_failed, 1);
        assert_eq!(summary.total_persisted(), 5);
        assert_eq!(sink.rows("alpha").len(), 2);
        assert_eq!(sink.rows("gamma").len(), 3);
        assert!(sink.rows("broken").is_empty());
    }

    #[test]
    fn test_root_files_land_in_default_table() {
        let root = tempfile::tempdir().unwrap();
        write_dataset(root.path(), "blitz", &["x1"]);
        fs::write(root.path().join("loose.pgn"), game_text("loose")).unwrap();

        let sink = MemorySink::new();
        let summary = scheduler(&sink).run(root.path()).unwrap();

        assert_eq!(summary.total_persisted(), 2);
        assert_eq!(sink.rows("games")[0].external_id, "loose");
        assert_eq!(sink.rows("blitz")[0].external_id, "x1");
    }

    #[test]
    fn test_empty_root_persists_nothing() {
        let root = tempfile::tempdir().unwrap();
        let sink = MemorySink::new();

        let summary = scheduler(&sink).run(root.path()).unwrap();
        assert_eq!(summary, RunSummary::default());
        assert!(sink.provisioned().is_empty());
    }

    #[test]
    fn test_many_directories_with_small_queue() {
        let root = tempfile::tempdir().unwrap();
        for d in 0..12 {
            let ids: Vec<String> = (0..3).map(|g| format!("d{d}g{g}")).collect();
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            write_dataset(root.path(), &format!("set{d}"), &ids);
        }

        let sink = MemorySink::new();
        let summary = scheduler(&sink).run(root.path()).unwrap();

        assert_eq!(summary.directories, 12);
        assert_eq!(summary.total_persisted(), 36);
        assert_eq!(sink.row_count(), 36);
    }

    #[test]
    fn test_lost_storage_fails_the_run() {
        let root = tempfile::tempdir().unwrap();
        write_dataset(root.path(), "only", &["w1"]);

        let sink = MemorySink::new().failing_writer();
        let err = scheduler(&sink).run(root.path()).unwrap_err();

        assert!(matches!(err, IngestError::Cancelled { persisted: 0 }));
        assert_eq!(sink.row_count(), 0);
    }

    #[test]
    fn test_lost_storage_stops_dispatching_directories() {
        let root = tempfile::tempdir().unwrap();
        for d in 0..5 {
            write_dataset(root.path(), &format!("set{d}"), &["x"]);
        }

        let sink = MemorySink::new().failing_writer();
        let result = scheduler(&sink).with_dir_workers(1).run(root.path());

        assert!(matches!(result, Err(IngestError::Cancelled { .. })));
        assert_eq!(sink.provisioned(), vec!["set0".to_string()]);
    }

    #[test]
    fn test_reingestion_is_idempotent_in_duckdb() {
        let root = tempfile::tempdir().unwrap();
        write_dataset(root.path(), "lichess-2024", &["aa", "bb", "cc"]);
        let sink = DuckDbSink::open(":memory:", "main").unwrap();

        let first = scheduler(&sink).run(root.path()).unwrap();
        let second = scheduler(&sink).run(root.path()).unwrap();

        assert_eq!(first.total_persisted(), 3);
        assert_eq!(second.total_persisted(), 0);
        assert_eq!(second.totals.duplicates, 3);
        assert_eq!(sink.count_rows(&table("lichess_2024")).unwrap(), 3);
    }
}
