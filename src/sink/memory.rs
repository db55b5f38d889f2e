//! In-process sink used by the pipeline tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::{GameSink, GameWriter, InsertOutcome};
use crate::config::TableName;
use crate::error::SinkError;
use crate::types::GameRecord;

#[derive(Default)]
struct MemoryState {
    rows: HashMap<String, Vec<GameRecord>>,
    ids: HashSet<(String, String)>,
    provisioned: Vec<String>,
    insert_attempts: usize,
}

#[derive(Default, Clone)]
struct Faults {
    provision: HashSet<String>,
    insert_events: HashSet<String>,
    transient_failures: usize,
    writer: bool,
}

#[derive(Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    faults: Faults,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisioning `table` fails.
    pub fn failing_provision(mut self, table: &str) -> Self {
        self.faults.provision.insert(table.to_string());
        self
    }

    /// Inserting a game whose `Event` tag equals `event` always fails.
    pub fn failing_insert_for_event(mut self, event: &str) -> Self {
        self.faults.insert_events.insert(event.to_string());
        self
    }

    /// The first `n` insert attempts fail, later ones succeed.
    pub fn transient_failures(mut self, n: usize) -> Self {
        self.faults.transient_failures = n;
        self
    }

    /// Every `writer()` call fails.
    pub fn failing_writer(mut self) -> Self {
        self.faults.writer = true;
        self
    }

    pub fn rows(&self, table: &str) -> Vec<GameRecord> {
        let state = self.state.lock().unwrap();
        state.rows.get(table).cloned().unwrap_or_default()
    }

    pub fn row_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.rows.values().map(Vec::len).sum()
    }

    pub fn provisioned(&self) -> Vec<String> {
        self.state.lock().unwrap().provisioned.clone()
    }

    pub fn insert_attempts(&self) -> usize {
        self.state.lock().unwrap().insert_attempts
    }
}

impl GameSink for MemorySink {
    type Writer = MemoryWriter;

    fn provision(&self, table: &TableName) -> Result<(), SinkError> {
        if self.faults.provision.contains(table.as_str()) {
            return Err(SinkError::Other(format!("cannot create {table}")));
        }
        let mut state = self.state.lock().unwrap();
        state.provisioned.push(table.to_string());
        state.rows.entry(table.to_string()).or_default();
        Ok(())
    }

    fn writer(&self) -> Result<Self::Writer, SinkError> {
        if self.faults.writer {
            return Err(SinkError::Other("connection refused".to_string()));
        }
        Ok(MemoryWriter {
            state: Arc::clone(&self.state),
            faults: self.faults.clone(),
        })
    }
}

pub struct MemoryWriter {
    state: Arc<Mutex<MemoryState>>,
    faults: Faults,
}

impl GameWriter for MemoryWriter {
    fn insert(
        &mut self,
        table: &TableName,
        game: &GameRecord,
    ) -> Result<InsertOutcome, SinkError> {
        let mut state = self.state.lock().unwrap();
        state.insert_attempts += 1;

        if state.insert_attempts <= self.faults.transient_failures {
            return Err(SinkError::Other("transient failure".to_string()));
        }
        if self.faults.insert_events.contains(&game.event) {
            return Err(SinkError::Other(format!("rejected {}", game.event)));
        }

        if let Some(id) = game.dedup_key()
            && !state.ids.insert((table.to_string(), id.to_string()))
        {
            return Ok(InsertOutcome::Duplicate);
        }

        state
            .rows
            .entry(table.to_string())
            .or_default()
            .push(game.clone());
        Ok(InsertOutcome::Inserted)
    }
}
