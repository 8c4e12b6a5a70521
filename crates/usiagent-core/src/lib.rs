//! USI agent core.
//!
//! Building blocks for engines that speak a USI-style protocol:
//! - Kind-indexed event dispatch
//! - A layered error taxonomy that keeps every cause
//! - An agent runtime driving a player over protocol input
//! - Self-match orchestration of two runtimes on separate threads

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod kind;
pub mod moves;
pub mod player;
pub mod protocol;
pub mod report;
pub mod rules;
pub mod runtime;
pub mod selfmatch;
pub mod telemetry;

pub use config::{AgentConfig, ConfigError, IllegalMovePolicy, SelfMatchConfig};
pub use dispatch::{DispatchOutcome, DispatcherState, EventDispatcher, Flow};
pub use error::{
    ConvertError, DispatchError, EmitError, HandlerError, KifuWriteError, LockExt,
    OutputCreateError, PlayerError, PoisonedLock, RunningError, SelfMatchRunningError,
    StartupError,
};
pub use event::{
    AgentInput, FoulKind, GameEndState, GameResult, GoLimit, OptionValue, SelfMatchEvent,
    SelfMatchEventKind, Side, SystemEvent, SystemEventKind, UserEvent, UserEventKind,
};
pub use kind::{KindIndex, MapEventKind};
pub use moves::{AppliedMove, BestMove, Color, LegalMove, Move, ReserveKind, Square};
pub use player::{InfoSender, OptionKind, OptionSpec, Player};
pub use protocol::{
    AgentOutput, InputSource, OutputSink, Polled, ProtocolCodec, ProtocolReader, ProtocolWriter,
    UsiCodec,
};
pub use report::{
    emit_game_finished, emit_game_started, emit_match_finished, emit_match_started,
    emit_move_applied, emit_side_detached, render_chain, sandboxed, ErrorReporter, MatchSpan,
    TracingReporter,
};
pub use rules::{BasePosition, Outcome, PositionSetup, RuleEngine};
pub use runtime::{
    AgentRuntime, Phase, RunEnd, RunOutcome, Session, SessionHandle, StopHandle,
};
pub use selfmatch::{
    GameHeader, GameRecord, MatchProgress, MemoryRecordSink, RecordSink, SelfMatch,
    SelfMatchMessage, SelfMatchResult, StartPosition,
};
pub use telemetry::init_tracing;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
