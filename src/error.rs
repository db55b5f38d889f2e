use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::TableName;

/// Per-game conversion warnings, reported as one `"; "`-joined string.
#[derive(Debug, Clone, Default)]
pub struct ErrorAccumulator {
    messages: Vec<String>,
}

impl ErrorAccumulator {
    pub fn push(&mut self, msg: impl Into<String>) {
        self.messages.push(msg.into());
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// `None` when nothing was pushed.
    pub fn finish(self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self.messages.join("; "))
        }
    }
}

/// Failures reported by a [`crate::sink::GameSink`] or its writers.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open database '{uri}': {source}")]
    Connect {
        uri: String,
        #[source]
        source: duckdb::Error,
    },
    #[error("failed to provision table {table}: {source}")]
    Provision {
        table: TableName,
        #[source]
        source: duckdb::Error,
    },
    #[error("failed to open a writer connection: {0}")]
    Writer(#[source] duckdb::Error),
    #[error("failed to insert game into {table}: {source}")]
    Insert {
        table: TableName,
        #[source]
        source: duckdb::Error,
    },
    #[error("query failed: {0}")]
    Query(#[source] duckdb::Error),
    #[error("failed to encode positions: {0}")]
    Encode(#[from] serde_json::Error),
    /// Used by non-DuckDB sinks.
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be at least 1 (got {value})")]
    ZeroBound { name: &'static str, value: usize },
    #[error("invalid include pattern '{pattern}': {source}")]
    Include {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("'{raw}' does not map to a valid table identifier")]
    TableName { raw: String },
    #[error("'{raw}' is not a valid schema identifier")]
    SchemaName { raw: String },
}

/// Run-level failures: fatal for the whole run, or scoped to one directory.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot enumerate root path '{}': {source}", path.display())]
    Enumerate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("directory '{}' skipped: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: SinkError,
    },
    #[error("run cancelled after {persisted} games were persisted: storage became unavailable")]
    Cancelled { persisted: u64 },
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("illegal move '{san}'")]
    IllegalMove { san: String },
}
