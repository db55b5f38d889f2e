use std::sync::{Mutex, PoisonError};

use duckdb::{Connection, params};

use super::{GameSink, GameWriter, InsertOutcome};
use crate::config::TableName;
use crate::error::SinkError;
use crate::types::GameRecord;

const GAMES_COLUMNS: &str = "external_id, event, site, opening, eco, result, white, black, \
     white_elo, black_elo, date, time, time_control, termination, moves, moves_count, \
     positions, parse_warnings";

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn qualified(schema: &str, table: &TableName) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table.as_str()))
}

/// Concurrent writers only see committed ids, so a racing duplicate surfaces
/// as a commit-time constraint error instead of a skipped row.
fn is_unique_violation(err: &duckdb::Error) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("duplicate key") && msg.contains("constraint")
}

fn create_table_sql(qualified_table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {qualified_table} (
            external_id VARCHAR UNIQUE,
            event VARCHAR,
            site VARCHAR,
            opening VARCHAR,
            eco VARCHAR,
            result VARCHAR,
            white VARCHAR,
            black VARCHAR,
            white_elo INTEGER,
            black_elo INTEGER,
            date DATE,
            time TIME,
            time_control VARCHAR,
            termination VARCHAR,
            moves VARCHAR,
            moves_count INTEGER,
            positions VARCHAR,
            parse_warnings VARCHAR,
            created_at TIMESTAMP DEFAULT current_timestamp
        )"
    )
}

fn insert_sql(qualified_table: &str) -> String {
    format!(
        "INSERT INTO {qualified_table} ({GAMES_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (external_id) DO NOTHING"
    )
}

/// DuckDB-backed sink. Every table lives in one schema of one database.
pub struct DuckDbSink {
    conn: Mutex<Connection>,
    schema: String,
}

impl DuckDbSink {
    /// Opens (or creates) the database and its schema. `:memory:` gives a
    /// private in-memory database.
    pub fn open(uri: &str, schema: &str) -> Result<Self, SinkError> {
        let connect_err = |source| SinkError::Connect {
            uri: uri.to_string(),
            source,
        };

        let conn = if uri == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(uri)
        }
        .map_err(connect_err)?;

        conn.execute_batch(&format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_ident(schema)
        ))
        .map_err(connect_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
            schema: schema.to_string(),
        })
    }

    pub fn count_rows(&self, table: &TableName) -> Result<u64, SinkError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let sql = format!("SELECT count(*) FROM {}", qualified(&self.schema, table));
        conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
            .map(|n| n.max(0) as u64)
            .map_err(SinkError::Query)
    }
}

impl GameSink for DuckDbSink {
    type Writer = DuckDbWriter;

    fn provision(&self, table: &TableName) -> Result<(), SinkError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute_batch(&create_table_sql(&qualified(&self.schema, table)))
            .map_err(|source| SinkError::Provision {
                table: table.clone(),
                source,
            })
    }

    fn writer(&self) -> Result<Self::Writer, SinkError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = conn.try_clone().map_err(SinkError::Writer)?;
        Ok(DuckDbWriter {
            conn,
            schema: self.schema.clone(),
        })
    }
}

/// A dedicated connection to the sink's database.
pub struct DuckDbWriter {
    conn: Connection,
    schema: String,
}

impl GameWriter for DuckDbWriter {
    fn insert(
        &mut self,
        table: &TableName,
        game: &GameRecord,
    ) -> Result<InsertOutcome, SinkError> {
        let positions = serde_json::to_string(&game.positions)?;
        let insert_err = |source| SinkError::Insert {
            table: table.clone(),
            source,
        };

        let mut stmt = self
            .conn
            .prepare_cached(&insert_sql(&qualified(&self.schema, table)))
            .map_err(insert_err)?;

        let result = stmt.execute(params![
            game.dedup_key(),
            game.event,
            game.site,
            game.opening,
            game.eco,
            game.result,
            game.white,
            game.black,
            game.white_elo,
            game.black_elo,
            game.date,
            game.time,
            game.time_control,
            game.termination,
            game.moves,
            game.move_count,
            positions,
            game.parse_warnings,
        ]);

        match result {
            Ok(0) => Ok(InsertOutcome::Duplicate),
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if game.dedup_key().is_some() && is_unique_violation(&e) => {
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(insert_err(e)),
        }
    }
}
