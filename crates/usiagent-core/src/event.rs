//! Event payloads and their kinds.
//!
//! Each category pairs a payload enum with a fieldless `*Kind` enum that
//! implements [`crate::kind::KindIndex`]. The dispatcher only ever looks at the kind; the
//! payload is interpreted by handlers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kind::MapEventKind;
use crate::moves::{Color, Move};
use crate::rules::PositionSetup;

/// Value carried by `setoption`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Num(i64),
    Str(String),
    /// Present without a value (buttons).
    Exist,
}

/// Time control attached to `go`. All times are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoLimit {
    Infinite,
    Ponder,
    Timed {
        black_ms: u64,
        white_ms: u64,
        byoyomi_ms: u64,
        black_inc_ms: u64,
        white_inc_ms: u64,
    },
}

impl Default for GoLimit {
    fn default() -> Self {
        GoLimit::Timed {
            black_ms: 0,
            white_ms: 0,
            byoyomi_ms: 1000,
            black_inc_ms: 0,
            white_inc_ms: 0,
        }
    }
}

/// Result announced by `gameover`, from the receiver's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameResult {
    Win,
    Lose,
    Draw,
}

/// Commands from the protocol peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    Usi,
    IsReady,
    SetOption(String, OptionValue),
    UsiNewGame,
    Position(PositionSetup),
    Go(GoLimit),
    Stop,
    PonderHit,
    GameOver(GameResult),
    Quit,
}

crate::kind_enum! {
    pub enum SystemEventKind {
        Usi,
        IsReady,
        SetOption,
        UsiNewGame,
        Position,
        Go,
        Stop,
        PonderHit,
        GameOver,
        Quit,
    }
}

impl SystemEventKind {
    /// Protocol command word.
    pub fn name(self) -> &'static str {
        match self {
            SystemEventKind::Usi => "usi",
            SystemEventKind::IsReady => "isready",
            SystemEventKind::SetOption => "setoption",
            SystemEventKind::UsiNewGame => "usinewgame",
            SystemEventKind::Position => "position",
            SystemEventKind::Go => "go",
            SystemEventKind::Stop => "stop",
            SystemEventKind::PonderHit => "ponderhit",
            SystemEventKind::GameOver => "gameover",
            SystemEventKind::Quit => "quit",
        }
    }
}

impl MapEventKind<SystemEventKind> for SystemEvent {
    fn event_kind(&self) -> SystemEventKind {
        match self {
            SystemEvent::Usi => SystemEventKind::Usi,
            SystemEvent::IsReady => SystemEventKind::IsReady,
            SystemEvent::SetOption(..) => SystemEventKind::SetOption,
            SystemEvent::UsiNewGame => SystemEventKind::UsiNewGame,
            SystemEvent::Position(_) => SystemEventKind::Position,
            SystemEvent::Go(_) => SystemEventKind::Go,
            SystemEvent::Stop => SystemEventKind::Stop,
            SystemEvent::PonderHit => SystemEventKind::PonderHit,
            SystemEvent::GameOver(_) => SystemEventKind::GameOver,
            SystemEvent::Quit => SystemEventKind::Quit,
        }
    }
}

/// Directives from the embedding program rather than the protocol peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEvent {
    Stop,
    PonderHit,
    Quit,
}

crate::kind_enum! {
    pub enum UserEventKind {
        Stop,
        PonderHit,
        Quit,
    }
}

impl MapEventKind<UserEventKind> for UserEvent {
    fn event_kind(&self) -> UserEventKind {
        match self {
            UserEvent::Stop => UserEventKind::Stop,
            UserEvent::PonderHit => UserEventKind::PonderHit,
            UserEvent::Quit => UserEventKind::Quit,
        }
    }
}

/// Anything an agent runtime reads from its input source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentInput {
    System(SystemEvent),
    User(UserEvent),
}

impl From<SystemEvent> for AgentInput {
    fn from(event: SystemEvent) -> Self {
        AgentInput::System(event)
    }
}

impl From<UserEvent> for AgentInput {
    fn from(event: UserEvent) -> Self {
        AgentInput::User(event)
    }
}

/// One of the two players of a self-match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Player1,
    Player2,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Side::Player1 => Side::Player2,
            Side::Player2 => Side::Player1,
        }
    }

    /// Position in two-element per-side arrays.
    pub fn slot(self) -> usize {
        match self {
            Side::Player1 => 0,
            Side::Player2 => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Player1 => write!(f, "player1"),
            Side::Player2 => write!(f, "player2"),
        }
    }
}

/// Why a rule engine considers a move a foul.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoulKind {
    InvalidMove,
    PutFuAndMate,
    Sennichite,
    SennichiteOu,
    NotRespondedOute,
    Suicide,
}

/// How a self-match game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum GameEndState {
    Checkmate { winner: Side },
    Resign { loser: Side },
    DeclareWin { winner: Side },
    DeclareLose { loser: Side },
    Draw,
    Foul { loser: Side, kind: FoulKind },
    Timeover { loser: Side },
    MaxPlies,
}

impl GameEndState {
    pub fn winner(&self) -> Option<Side> {
        match *self {
            GameEndState::Checkmate { winner } | GameEndState::DeclareWin { winner } => {
                Some(winner)
            }
            GameEndState::Resign { loser }
            | GameEndState::DeclareLose { loser }
            | GameEndState::Foul { loser, .. }
            | GameEndState::Timeover { loser } => Some(loser.other()),
            GameEndState::Draw | GameEndState::MaxPlies => None,
        }
    }

    /// `gameover` result to send to `side`.
    pub fn result_for(&self, side: Side) -> GameResult {
        match self.winner() {
            Some(winner) if winner == side => GameResult::Win,
            Some(_) => GameResult::Lose,
            None => GameResult::Draw,
        }
    }
}

/// Notifications published to self-match observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelfMatchEvent {
    GameStart {
        game: u32,
        black: Side,
        setup: PositionSetup,
    },
    Moved {
        ply: u32,
        color: Color,
        mv: Move,
    },
    GameEnd(GameEndState),
    Abort,
}

crate::kind_enum! {
    pub enum SelfMatchEventKind {
        GameStart,
        Moved,
        GameEnd,
        Abort,
    }
}

impl MapEventKind<SelfMatchEventKind> for SelfMatchEvent {
    fn event_kind(&self) -> SelfMatchEventKind {
        match self {
            SelfMatchEvent::GameStart { .. } => SelfMatchEventKind::GameStart,
            SelfMatchEvent::Moved { .. } => SelfMatchEventKind::Moved,
            SelfMatchEvent::GameEnd(_) => SelfMatchEventKind::GameEnd,
            SelfMatchEvent::Abort => SelfMatchEventKind::Abort,
        }
    }
}
