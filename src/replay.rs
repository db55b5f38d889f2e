//! Replays a normalized move list into per-ply position keys.

use std::ops::ControlFlow;
use std::sync::LazyLock;

use pgn_reader::{Reader, SanPlus, Skip, Visitor};
use regex::Regex;
use shakmaty::{Chess, EnPassantMode, Position, fen::Fen};

use crate::error::ReplayError;
use crate::types::PositionKey;

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^}]*\}").unwrap());

/// `12...` black-to-move markers, which the movetext grammar does not accept mid-line.
static BLACK_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d+\.\.\.").unwrap());

/// Move-application capability. `Default` is the initial position.
pub trait ReplayBoard: Default {
    /// Applies one move; on error the board is left untouched.
    fn apply_move(&mut self, san: &SanPlus) -> Result<(), ReplayError>;

    fn canonical_string(&self) -> PositionKey;
}

impl ReplayBoard for Chess {
    fn apply_move(&mut self, san_plus: &SanPlus) -> Result<(), ReplayError> {
        let m = san_plus
            .san
            .to_move(&*self)
            .map_err(|_| ReplayError::IllegalMove {
                san: san_plus.to_string(),
            })?;
        self.play_unchecked(m);
        Ok(())
    }

    fn canonical_string(&self) -> PositionKey {
        Fen::from_position(self, EnPassantMode::Legal).to_string()
    }
}

/// Extra cleanup so more games survive the stricter movetext grammar.
pub fn prepare_for_replay(moves: &str) -> String {
    let text = COMMENT_RE.replace_all(moves, "");
    let text = BLACK_MARKER_RE.replace_all(&text, "");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Position keys for each ply, in order, stopping at the first move that
/// cannot be applied. Never fails; a bad game just yields a shorter sequence.
pub fn reconstruct<B: ReplayBoard>(moves: &str) -> Vec<PositionKey> {
    let prepared = prepare_for_replay(moves);
    if prepared.is_empty() {
        return Vec::new();
    }

    let mut visitor = ReplayVisitor::<B>::default();
    let mut reader = Reader::new(prepared.as_bytes());

    if let Err(e) = reader.read_game(&mut visitor) {
        log::trace!(
            "movetext parse stopped after {} plies: {e}",
            visitor.positions.len()
        );
    }

    visitor.positions
}

#[derive(Default)]
struct ReplayVisitor<B> {
    board: B,
    positions: Vec<PositionKey>,
}

impl<B: ReplayBoard> Visitor for ReplayVisitor<B> {
    type Tags = ();
    type Movetext = ();
    type Output = ();

    fn begin_tags(&mut self) -> ControlFlow<Self::Output, Self::Tags> {
        self.board = B::default();
        self.positions.clear();
        ControlFlow::Continue(())
    }

    fn begin_movetext(&mut self, _tags: Self::Tags) -> ControlFlow<Self::Output, Self::Movetext> {
        ControlFlow::Continue(())
    }

    fn san(
        &mut self,
        _movetext: &mut Self::Movetext,
        san_plus: SanPlus,
    ) -> ControlFlow<Self::Output> {
        match self.board.apply_move(&san_plus) {
            Ok(()) => {
                self.positions.push(self.board.canonical_string());
                ControlFlow::Continue(())
            }
            Err(e) => {
                log::trace!("replay stopped after {} plies: {e}", self.positions.len());
                ControlFlow::Break(())
            }
        }
    }

    fn begin_variation(&mut self, _: &mut Self::Movetext) -> ControlFlow<Self::Output, Skip> {
        ControlFlow::Continue(Skip(true))
    }

    fn end_game(&mut self, _movetext: Self::Movetext) -> Self::Output {}
}
