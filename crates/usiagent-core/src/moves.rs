//! Move representations.
//!
//! Three related value types describe a move at different distances from the
//! wire:
//!
//! - [`LegalMove`]: produced by a [`crate::rules::RuleEngine`], known to be legal
//!   in the position it was generated for.
//! - [`AppliedMove`]: a move committed to a board, with validated squares.
//! - [`Move`]: the protocol representation with raw coordinates.
//!
//! Conversions only go towards the wire (`LegalMove -> AppliedMove -> Move`).
//! The way back, `Move -> AppliedMove`, is fallible because a wire move may
//! name squares that do not exist.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConvertError;
use crate::kind::KindIndex;

/// Side to move. Black moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Black,
    White,
}

impl Color {
    pub fn opposite(self) -> Self {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Black => write!(f, "black"),
            Color::White => write!(f, "white"),
        }
    }
}

/// A square on the 9x9 board. Files and ranks are both `1..=9`.
///
/// Only [`Square::new`] builds one, so every value is on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Square {
    file: u8,
    rank: u8,
}

impl Square {
    pub fn new(file: u8, rank: u8) -> Result<Self, ConvertError> {
        if (1..=9).contains(&file) && (1..=9).contains(&rank) {
            Ok(Self { file, rank })
        } else {
            Err(ConvertError::InvalidSquare { file, rank })
        }
    }

    pub fn file(self) -> u8 {
        self.file
    }

    pub fn rank(self) -> u8 {
        self.rank
    }
}

crate::kind_enum! {
    /// Piece kinds that can be dropped from the reserve (hand).
    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum ReserveKind {
        Pawn,
        Lance,
        Knight,
        Silver,
        Gold,
        Bishop,
        Rook,
    }
}

impl ReserveKind {
    /// Upper-case piece letter used in drop notation (`P*5e`).
    pub fn letter(self) -> char {
        match self {
            ReserveKind::Pawn => 'P',
            ReserveKind::Lance => 'L',
            ReserveKind::Knight => 'N',
            ReserveKind::Silver => 'S',
            ReserveKind::Gold => 'G',
            ReserveKind::Bishop => 'B',
            ReserveKind::Rook => 'R',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.letter() == letter)
    }
}

/// Board move known to be legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LegalMoveTo {
    from: Square,
    to: Square,
    promote: bool,
}

impl LegalMoveTo {
    pub fn from(&self) -> Square {
        self.from
    }

    pub fn to(&self) -> Square {
        self.to
    }

    pub fn is_promote(&self) -> bool {
        self.promote
    }
}

/// Drop from the reserve known to be legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LegalMovePut {
    kind: ReserveKind,
    to: Square,
}

impl LegalMovePut {
    pub fn kind(&self) -> ReserveKind {
        self.kind
    }

    pub fn to(&self) -> Square {
        self.to
    }
}

/// A move a rule engine vouches for in one specific position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegalMove {
    To(LegalMoveTo),
    Put(LegalMovePut),
}

impl LegalMove {
    /// Board move. Intended for [`crate::rules::RuleEngine`] implementations.
    pub fn to(from: Square, to: Square, promote: bool) -> Self {
        LegalMove::To(LegalMoveTo { from, to, promote })
    }

    /// Drop move. Intended for [`crate::rules::RuleEngine`] implementations.
    pub fn put(kind: ReserveKind, to: Square) -> Self {
        LegalMove::Put(LegalMovePut { kind, to })
    }
}

/// A move as committed to a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppliedMove {
    To {
        from: Square,
        to: Square,
        promote: bool,
    },
    Put {
        kind: ReserveKind,
        to: Square,
    },
}

impl From<LegalMove> for AppliedMove {
    fn from(mv: LegalMove) -> Self {
        match mv {
            LegalMove::To(m) => AppliedMove::To {
                from: m.from,
                to: m.to,
                promote: m.promote,
            },
            LegalMove::Put(m) => AppliedMove::Put {
                kind: m.kind,
                to: m.to,
            },
        }
    }
}

/// Wire-level move. Coordinates are `(file, rank)` as read from the protocol
/// and are not validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Move {
    To {
        from: (u8, u8),
        to: (u8, u8),
        promote: bool,
    },
    Put {
        kind: ReserveKind,
        to: (u8, u8),
    },
}

impl From<AppliedMove> for Move {
    fn from(mv: AppliedMove) -> Self {
        match mv {
            AppliedMove::To { from, to, promote } => Move::To {
                from: (from.file, from.rank),
                to: (to.file, to.rank),
                promote,
            },
            AppliedMove::Put { kind, to } => Move::Put {
                kind,
                to: (to.file, to.rank),
            },
        }
    }
}

impl From<LegalMove> for Move {
    fn from(mv: LegalMove) -> Self {
        Move::from(AppliedMove::from(mv))
    }
}

impl TryFrom<Move> for AppliedMove {
    type Error = ConvertError;

    fn try_from(mv: Move) -> Result<Self, Self::Error> {
        match mv {
            Move::To { from, to, promote } => {
                let from_sq = Square::new(from.0, from.1)?;
                let to_sq = Square::new(to.0, to.1)?;
                if from_sq == to_sq {
                    return Err(ConvertError::InvalidMove {
                        text: mv.to_string(),
                    });
                }
                Ok(AppliedMove::To {
                    from: from_sq,
                    to: to_sq,
                    promote,
                })
            }
            Move::Put { kind, to } => Ok(AppliedMove::Put {
                kind,
                to: Square::new(to.0, to.1)?,
            }),
        }
    }
}

fn rank_letter(rank: u8) -> Option<char> {
    (1..=9).contains(&rank).then(|| char::from(b'a' + rank - 1))
}

fn write_square(f: &mut fmt::Formatter<'_>, (file, rank): (u8, u8)) -> fmt::Result {
    match rank_letter(rank) {
        Some(r) => write!(f, "{}{}", file, r),
        None => write!(f, "{}?{}", file, rank),
    }
}

/// USI notation (`7g7f`, `8h2b+`, `P*5e`). Off-board ranks render as `?n`.
impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Move::To { from, to, promote } => {
                write_square(f, from)?;
                write_square(f, to)?;
                if promote {
                    write!(f, "+")?;
                }
                Ok(())
            }
            Move::Put { kind, to } => {
                write!(f, "{}*", kind.letter())?;
                write_square(f, to)
            }
        }
    }
}

/// Answer to a `go` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BestMove {
    Move(Move),
    Resign,
    Win,
    Abort,
}

impl From<LegalMove> for BestMove {
    fn from(mv: LegalMove) -> Self {
        BestMove::Move(Move::from(mv))
    }
}
