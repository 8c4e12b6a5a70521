//! Rule engine collaborator.
//!
//! The framework treats the rule engine as authoritative: it never derives
//! legality on its own, it only asks.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::error::ConvertError;
use crate::event::FoulKind;
use crate::moves::{AppliedMove, Color, LegalMove, Move};

/// Starting point of a `position` command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasePosition {
    #[default]
    Startpos,
    /// SFEN text, kept opaque.
    Sfen(String),
}

/// A base position plus the moves played from it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionSetup {
    pub base: BasePosition,
    pub moves: Vec<Move>,
}

impl PositionSetup {
    pub fn new(base: BasePosition) -> Self {
        Self {
            base,
            moves: Vec::new(),
        }
    }
}

/// Terminal verdict on a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Checkmate { winner: Color },
    Draw,
    Foul { loser: Color, kind: FoulKind },
}

pub trait RuleEngine: Send + Sync + 'static {
    type Position: Clone + Debug + Send + 'static;

    fn setup(&self, base: &BasePosition) -> Result<Self::Position, ConvertError>;

    fn side_to_move(&self, position: &Self::Position) -> Color;

    fn legal_moves(&self, position: &Self::Position) -> Vec<LegalMove>;

    /// Returns the resulting position, or `None` when `mv` is illegal.
    fn apply(&self, position: &Self::Position, mv: &AppliedMove) -> Option<Self::Position>;

    fn is_terminal(&self, position: &Self::Position) -> Option<Outcome>;

    /// Whether `color` may claim a win by declaration (entering king).
    fn declares_win(&self, _position: &Self::Position, _color: Color) -> bool {
        false
    }
}
