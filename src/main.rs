use std::error::Error;

use chess_ingest::{Config, DuckDbSink, Scheduler, logging};
use clap::Parser;

fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::parse();
    logging::init();
    config.validate()?;

    let sink = DuckDbSink::open(&config.database_url, &config.database_name)?;
    log::info!(
        "Connected to {} (schema {})",
        config.database_url,
        config.database_name
    );

    let summary = Scheduler::from_config(&sink, &config)?.run(&config.folder_path)?;

    if summary.directories_failed > 0 {
        log::warn!("{} directories were skipped", summary.directories_failed);
    }
    log::info!(
        "{} duplicates ignored, {} games failed, {} files failed",
        summary.totals.duplicates,
        summary.totals.games_failed,
        summary.totals.files_failed
    );
    println!("Finished. Total Games Processed: {}", summary.total_persisted());
    Ok(())
}
