//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use usiagent_core::{
    AppliedMove, BasePosition, BestMove, Color, ConvertError, GameResult, GoLimit, InfoSender,
    LegalMove, Move, OptionValue, Outcome, Player, PlayerError, RuleEngine, Square, StopHandle,
};

pub fn sq(file: u8, rank: u8) -> Square {
    Square::new(file, rank).unwrap()
}

pub fn mv(from: (u8, u8), to: (u8, u8)) -> Move {
    Move::To {
        from,
        to,
        promote: false,
    }
}

/// Position of [`ScriptedRules`]: just the moves played so far.
#[derive(Debug, Clone, Default)]
pub struct Line {
    pub moves: Vec<AppliedMove>,
}

/// Accepts every on-board move except the one at `reject_ply`, and declares
/// checkmate for the side that just moved once `mate_after` plies are played.
#[derive(Debug, Default)]
pub struct ScriptedRules {
    pub reject_ply: Option<usize>,
    pub mate_after: Option<usize>,
}

impl RuleEngine for ScriptedRules {
    type Position = Line;

    fn setup(&self, base: &BasePosition) -> Result<Line, ConvertError> {
        match base {
            BasePosition::Startpos => Ok(Line::default()),
            BasePosition::Sfen(text) => Err(ConvertError::InvalidValue {
                what: "sfen",
                token: text.clone(),
            }),
        }
    }

    fn side_to_move(&self, position: &Line) -> Color {
        if position.moves.len() % 2 == 0 {
            Color::Black
        } else {
            Color::White
        }
    }

    fn legal_moves(&self, position: &Line) -> Vec<LegalMove> {
        match self.side_to_move(position) {
            Color::Black => vec![LegalMove::to(sq(7, 7), sq(7, 6), false)],
            Color::White => vec![LegalMove::to(sq(3, 3), sq(3, 4), false)],
        }
    }

    fn apply(&self, position: &Line, mv: &AppliedMove) -> Option<Line> {
        if self.reject_ply == Some(position.moves.len() + 1) {
            return None;
        }
        let mut next = position.clone();
        next.moves.push(*mv);
        Some(next)
    }

    fn is_terminal(&self, position: &Line) -> Option<Outcome> {
        (self.mate_after == Some(position.moves.len())).then(|| Outcome::Checkmate {
            winner: self.side_to_move(position).opposite(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("scripted failure: {0}")]
pub struct ScriptError(pub String);

impl PlayerError for ScriptError {}

/// What a [`ScriptedPlayer`] does on one `go`.
#[derive(Debug, Clone)]
pub enum Turn {
    Play(BestMove),
    /// First legal move offered by the rule engine.
    FirstLegal,
    Fail(String),
    Panic,
    /// Sleep, then play the first legal move.
    Slow(Duration),
    /// Send an `info string`, then play the first legal move.
    Say(String),
}

/// Player that follows a script, then falls back to the first legal move.
#[derive(Debug, Default)]
pub struct ScriptedPlayer {
    pub script: VecDeque<Turn>,
    pub reject_option: Option<String>,
    pub journal: Arc<Mutex<Vec<String>>>,
    /// The limit of every `go`, in order.
    pub limits: Arc<Mutex<Vec<GoLimit>>>,
    /// Requested on `isready`, before `readyok` goes out.
    pub stop_on_ready: Option<StopHandle>,
}

impl ScriptedPlayer {
    pub fn new(script: impl IntoIterator<Item = Turn>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    fn note(&self, entry: impl Into<String>) {
        self.journal.lock().unwrap().push(entry.into());
    }
}

impl Player<ScriptedRules> for ScriptedPlayer {
    type Error = ScriptError;

    const ID: &'static str = "Scripted";
    const AUTHOR: &'static str = "Test Suite";

    fn set_option(&mut self, name: &str, _value: &OptionValue) -> Result<(), ScriptError> {
        if self.reject_option.as_deref() == Some(name) {
            return Err(ScriptError(format!("unknown option {name}")));
        }
        self.note(format!("setoption {name}"));
        Ok(())
    }

    fn take_ready(&mut self) -> Result<(), ScriptError> {
        self.note("isready");
        if let Some(stop) = &self.stop_on_ready {
            stop.request_stop();
        }
        Ok(())
    }

    fn new_game(&mut self) -> Result<(), ScriptError> {
        self.note("usinewgame");
        Ok(())
    }

    fn think(
        &mut self,
        _position: &Line,
        legal_moves: &[LegalMove],
        limit: &GoLimit,
        info: &mut InfoSender<'_>,
    ) -> Result<BestMove, ScriptError> {
        self.note("go");
        self.limits.lock().unwrap().push(limit.clone());
        let first_legal = || {
            legal_moves
                .first()
                .copied()
                .map(BestMove::from)
                .ok_or_else(|| ScriptError("no legal moves".to_string()))
        };
        match self.script.pop_front().unwrap_or(Turn::FirstLegal) {
            Turn::Play(best) => Ok(best),
            Turn::FirstLegal => first_legal(),
            Turn::Fail(reason) => Err(ScriptError(reason)),
            Turn::Panic => panic!("scripted panic"),
            Turn::Slow(delay) => {
                thread::sleep(delay);
                first_legal()
            }
            Turn::Say(text) => {
                info.send(text)
                    .map_err(|e| ScriptError(e.to_string()))?;
                first_legal()
            }
        }
    }

    fn on_stop(&mut self) -> Result<(), ScriptError> {
        self.note("stop");
        Ok(())
    }

    fn game_over(&mut self, result: GameResult) -> Result<(), ScriptError> {
        self.note(format!("gameover {result:?}"));
        Ok(())
    }

    fn quit(&mut self) -> Result<(), ScriptError> {
        self.note("quit");
        Ok(())
    }
}
