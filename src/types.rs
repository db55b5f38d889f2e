use chrono::{NaiveDate, NaiveTime};

/// Canonical board string after one ply (FEN for the shakmaty board).
pub type PositionKey = String;

/// Stores parsed game data from one PGN game block - matches Lichess dataset schema.
///
/// Built once by [`crate::extract::Extractor::parse`] and owned by the file worker
/// that parsed it; the sink borrows it so a failed insert can be retried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameRecord {
    /// Natural dedup key derived from `Site`; empty means dedup-exempt.
    pub external_id: String,

    // Core game info
    pub event: String,
    pub site: String,
    pub white: String,
    pub black: String,
    pub result: String,

    // Player info
    pub white_elo: i32,
    pub black_elo: i32,

    // Date/Time
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,

    // Opening info
    pub eco: String,
    pub opening: String,

    // Game details
    pub termination: String,
    pub time_control: String,

    // Movetext
    pub moves: String,
    pub move_count: i32,
    pub positions: Vec<PositionKey>,

    /// Tag values that failed conversion and fell back to their defaults.
    pub parse_warnings: Option<String>,
}

impl GameRecord {
    /// `None` when the record carries no external id.
    pub fn dedup_key(&self) -> Option<&str> {
        (!self.external_id.is_empty()).then_some(self.external_id.as_str())
    }
}
