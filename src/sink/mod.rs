//! Persistence boundary for parsed games.

mod duckdb_impl;
#[cfg(test)]
pub(crate) mod memory;

pub use duckdb_impl::{DuckDbSink, DuckDbWriter};

use crate::config::TableName;
use crate::error::SinkError;
use crate::types::GameRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same external id already exists; nothing was written.
    Duplicate,
}

/// One worker's handle for writing games.
pub trait GameWriter: Send {
    fn insert(&mut self, table: &TableName, game: &GameRecord)
    -> Result<InsertOutcome, SinkError>;
}

/// Shared storage backend. Provisioning is idempotent; writers are handed
/// out one per worker and may be used concurrently with each other.
pub trait GameSink: Send + Sync {
    type Writer: GameWriter;

    fn provision(&self, table: &TableName) -> Result<(), SinkError>;

    fn writer(&self) -> Result<Self::Writer, SinkError>;
}
