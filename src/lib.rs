pub mod config;
pub mod error;
pub mod extract;
pub mod input;
pub mod logging;
pub mod pool;
pub mod replay;
pub mod scheduler;
pub mod sink;
pub mod splitter;
pub mod types;

pub use config::{Config, PipelineOptions, TableName};
pub use error::{ConfigError, IngestError, SinkError};
pub use scheduler::{RunSummary, Scheduler};
pub use sink::{DuckDbSink, GameSink, GameWriter, InsertOutcome};
pub use types::GameRecord;
