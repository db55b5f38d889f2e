//! Tag & move extraction for one raw game block.
//!
//! Never fails: missing or malformed tags fall back to field defaults and the
//! conversion problems are collected into [`GameRecord::parse_warnings`].

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use shakmaty::Chess;
use smallvec::SmallVec;

use crate::error::ErrorAccumulator;
use crate::replay;
use crate::types::GameRecord;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[(\w+) "([^"]*)"\]"#).unwrap());

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^}]*\}").unwrap());

/// Comments, move numbers, score patterns and leftover periods.
static MOVETEXT_NOISE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^}]*\}|\b\d+\.|\d+-\d+|\.").unwrap());

/// The last token of PGN movetext is normally the result marker (`1-0`, `*`, ...),
/// which the token sweep picks up like a move. The move count discounts it
/// unconditionally, so games without a trailing marker read one ply short.
pub const RESULT_MARKER_BIAS: usize = 1;

const DATE_FORMAT: &str = "%Y.%m.%d";
const TIME_FORMAT: &str = "%H:%M:%S";

type MoveTokens<'a> = SmallVec<[&'a str; 128]>;

/// Turns raw game blocks into [`GameRecord`]s.
#[derive(Debug, Clone)]
pub struct Extractor {
    site_prefix: Option<String>,
    with_positions: bool,
}

impl Extractor {
    /// `site_prefix` is stripped from `Site` to form the external id; `None`
    /// disables ids entirely.
    pub fn new(site_prefix: Option<String>, with_positions: bool) -> Self {
        Self {
            site_prefix,
            with_positions,
        }
    }

    pub fn parse(&self, block: &str) -> GameRecord {
        let mut headers = HeaderFields::default();
        for caps in TAG_RE.captures_iter(block) {
            headers.set_known_tag(&caps[1], &caps[2]);
        }

        let mut parse_error = ErrorAccumulator::default();

        let white_elo = parse_rating(&headers.white_elo, "WhiteElo", &mut parse_error);
        let black_elo = parse_rating(&headers.black_elo, "BlackElo", &mut parse_error);
        let date = parse_first(
            [("Date", &headers.date), ("UTCDate", &headers.utc_date)],
            parse_date_field,
            &mut parse_error,
        );
        let time = parse_first(
            [("UTCTime", &headers.utc_time), ("Time", &headers.time)],
            parse_time_field,
            &mut parse_error,
        );

        let external_id = self
            .site_prefix
            .as_deref()
            .and_then(|prefix| headers.site.strip_prefix(prefix))
            .map(|id| id.trim().to_string())
            .unwrap_or_default();

        let movetext = movetext_lines(block);
        let moves = normalize_moves(&movetext);
        let move_count = i32::try_from(move_count(&movetext)).unwrap_or(i32::MAX);
        let positions = if self.with_positions {
            replay::reconstruct::<Chess>(&moves)
        } else {
            Vec::new()
        };

        GameRecord {
            external_id,
            event: headers.event,
            site: headers.site,
            white: headers.white,
            black: headers.black,
            result: headers.result,
            white_elo,
            black_elo,
            date,
            time,
            eco: headers.eco,
            opening: headers.opening,
            termination: headers.termination,
            time_control: headers.time_control,
            moves,
            move_count,
            positions,
            parse_warnings: parse_error.finish(),
        }
    }
}

#[derive(Default)]
struct HeaderFields {
    event: String,
    site: String,
    white: String,
    black: String,
    result: String,
    white_elo: String,
    black_elo: String,
    date: String,
    utc_date: String,
    utc_time: String,
    time: String,
    eco: String,
    opening: String,
    termination: String,
    time_control: String,
}

impl HeaderFields {
    /// Later duplicates overwrite earlier ones; unknown keys are ignored.
    fn set_known_tag(&mut self, key: &str, value: &str) {
        let slot: &mut String = match key {
            "Event" => &mut self.event,
            "Site" => &mut self.site,
            "White" => &mut self.white,
            "Black" => &mut self.black,
            "Result" => &mut self.result,
            "WhiteElo" => &mut self.white_elo,
            "BlackElo" => &mut self.black_elo,
            "Date" => &mut self.date,
            "UTCDate" => &mut self.utc_date,
            "UTCTime" => &mut self.utc_time,
            "Time" => &mut self.time,
            "ECO" => &mut self.eco,
            "Opening" => &mut self.opening,
            "Termination" => &mut self.termination,
            "TimeControl" => &mut self.time_control,
            _ => return,
        };

        slot.clear();
        slot.push_str(value);
    }
}

fn is_unknown_marker(s: &str) -> bool {
    s.is_empty() || s.contains('?') || s == "-"
}

/// Reads a leading optionally-signed integer the way `scanf("%d")` does:
/// `"1500"` and `"1500?"` give 1500, anything without leading digits gives 0.
fn parse_rating(raw: &str, label: &str, parse_error: &mut ErrorAccumulator) -> i32 {
    let s = raw.trim();
    if let Ok(v) = s.parse::<i32>() {
        return v;
    }

    if !is_unknown_marker(s) {
        parse_error.push(format!("Conversion error: {label}='{s}'"));
    }

    let (sign, digits) = match s.as_bytes().first() {
        Some(b'-') => (-1i64, &s[1..]),
        Some(b'+') => (1i64, &s[1..]),
        _ => (1i64, s),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());

    digits[..end]
        .parse::<i64>()
        .ok()
        .and_then(|v| i32::try_from(sign * v).ok())
        .unwrap_or(0)
}

fn parse_first<T, const N: usize>(
    candidates: [(&str, &String); N],
    parse: fn(&str, &str, &mut ErrorAccumulator) -> Option<T>,
    parse_error: &mut ErrorAccumulator,
) -> Option<T> {
    candidates
        .into_iter()
        .find_map(|(label, raw)| parse(raw, label, parse_error))
}

fn parse_date_field(
    raw: &str,
    label: &str,
    parse_error: &mut ErrorAccumulator,
) -> Option<NaiveDate> {
    let s = raw.trim();
    if is_unknown_marker(s) {
        return None;
    }

    match NaiveDate::parse_from_str(s, DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(e) => {
            parse_error.push(format!("Conversion error: {label}='{s}' (chrono: {e})"));
            None
        }
    }
}

fn parse_time_field(
    raw: &str,
    label: &str,
    parse_error: &mut ErrorAccumulator,
) -> Option<NaiveTime> {
    let s = raw.trim();
    if is_unknown_marker(s) {
        return None;
    }

    match NaiveTime::parse_from_str(s, TIME_FORMAT) {
        Ok(time) => Some(time),
        Err(e) => {
            parse_error.push(format!("Conversion error: {label}='{s}' (chrono: {e})"));
            None
        }
    }
}

/// Movetext lines are the ones starting with a digit; tag lines never do.
pub fn movetext_lines(block: &str) -> String {
    block
        .lines()
        .filter(|line| line.starts_with(|c: char| c.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Single-line move list without comments, move numbers, scores or periods.
pub fn normalize_moves(movetext: &str) -> String {
    let stripped = MOVETEXT_NOISE_RE.replace_all(movetext, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_move_number(token: &str) -> bool {
    let digits = token.trim_end_matches('.');
    digits.len() < token.len() && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Every token that follows a move-number marker (`12.` or `12...`), in order.
///
/// Comments are removed first. Text before the first marker is not part of
/// the sequence.
pub fn move_tokens(movetext: &str) -> Vec<&str> {
    let mut tokens = MoveTokens::new();
    let mut seen_marker = false;

    for segment in COMMENT_RE.split(movetext) {
        for token in segment.split_whitespace() {
            if is_move_number(token) {
                seen_marker = true;
            } else if seen_marker {
                tokens.push(token);
            }
        }
    }

    tokens.into_vec()
}

/// Ply count, biased by [`RESULT_MARKER_BIAS`]; never negative.
pub fn move_count(movetext: &str) -> usize {
    move_tokens(movetext).len().saturating_sub(RESULT_MARKER_BIAS)
}
