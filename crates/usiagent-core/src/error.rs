//! Layered error types.
//!
//! Each layer owns one enum. Lower-layer errors are lifted with a total
//! conversion into a dedicated variant that keeps the original value, so
//! `source()` always reaches the failure site and every `Display` already
//! carries the summary of what it wraps.
//!
//! ```text
//! ConvertError -> OutputCreateError -> HandlerError -> DispatchError
//!      -> RunningError (also <- StartupError) -> SelfMatchRunningError
//! ```

use std::fmt::Debug;
use std::io;
use std::num::ParseIntError;
use std::sync::{Mutex, MutexGuard};

use crossbeam_channel::{RecvError, SendError};
use thiserror::Error;

use crate::event::{AgentInput, Side};
use crate::moves::Move;

/// Marker for error types produced by player implementations.
///
/// The framework never inspects these; it only carries them upward.
pub trait PlayerError: std::error::Error + Debug + Send + 'static {}

impl PlayerError for std::convert::Infallible {}

/// A mutex was poisoned by a panic while it was held.
///
/// `std::sync::PoisonError` borrows the guard, so only the name of the
/// resource survives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("lock on {resource} is poisoned")]
pub struct PoisonedLock {
    pub resource: &'static str,
}

/// Locks a mutex and reports poisoning as [`PoisonedLock`].
pub trait LockExt<T> {
    fn lock_named(&self, resource: &'static str) -> Result<MutexGuard<'_, T>, PoisonedLock>;
}

impl<T> LockExt<T> for Mutex<T> {
    fn lock_named(&self, resource: &'static str) -> Result<MutexGuard<'_, T>, PoisonedLock> {
        self.lock().map_err(|_| PoisonedLock { resource })
    }
}

/// Malformed textual or numeric input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("invalid number '{token}': {source}")]
    InvalidNumber {
        token: String,
        #[source]
        source: ParseIntError,
    },

    #[error("invalid move '{text}'")]
    InvalidMove { text: String },

    #[error("square ({file}, {rank}) is off the board")]
    InvalidSquare { file: u8, rank: u8 },

    #[error("unknown command '{line}'")]
    UnknownCommand { line: String },

    #[error("'{command}' is missing {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("invalid {what} '{token}'")]
    InvalidValue { what: &'static str, token: String },
}

/// Failure to build a protocol output line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputCreateError {
    #[error("conversion failed: {0}")]
    Convert(#[from] ConvertError),

    #[error("{field} '{text}' cannot be written as a single protocol token")]
    InvalidText { field: &'static str, text: String },
}

/// Failure to hand an output to an [`crate::protocol::OutputSink`].
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("could not create output: {0}")]
    Create(#[from] OutputCreateError),

    #[error("could not write output: {0}")]
    Io(#[from] io::Error),

    #[error("output sink is closed")]
    Closed,
}

/// Failure inside an event handler.
#[derive(Debug, Error)]
pub enum HandlerError<E: PlayerError> {
    #[error("output creation failed: {0}")]
    Output(#[from] OutputCreateError),

    #[error("output i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("output sink is closed")]
    OutputClosed,

    #[error("conversion failed: {0}")]
    Convert(#[from] ConvertError),

    #[error("move {mv} at ply {ply} is not legal")]
    IllegalMove { ply: u32, mv: Move },

    #[error("'{event}' is not valid now: {reason}")]
    InvalidState {
        event: &'static str,
        reason: &'static str,
    },

    #[error("handler state unavailable: {0}")]
    Poisoned(#[from] PoisonedLock),

    #[error("player failed: {0}")]
    Player(#[source] E),
}

impl<E: PlayerError> From<EmitError> for HandlerError<E> {
    fn from(err: EmitError) -> Self {
        match err {
            EmitError::Create(e) => HandlerError::Output(e),
            EmitError::Io(e) => HandlerError::Io(e),
            EmitError::Closed => HandlerError::OutputClosed,
        }
    }
}

/// Failure routing an event.
#[derive(Debug, Error)]
pub enum DispatchError<E: PlayerError> {
    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError<E>),

    #[error("dispatcher state unavailable: {0}")]
    Poisoned(#[from] PoisonedLock),

    #[error("dispatcher halted after a handler panicked")]
    Halted,

    #[error("dispatcher is stopped")]
    Stopped,
}

/// Failure before the agent's read loop begins.
#[derive(Debug, Error)]
pub enum StartupError<E: PlayerError> {
    #[error("handler registration failed: {0}")]
    Dispatch(#[from] DispatchError<E>),

    #[error("agent identity is not writable: {0}")]
    Identity(#[from] OutputCreateError),

    #[error("agent state unavailable: {0}")]
    Poisoned(#[from] PoisonedLock),

    #[error("player rejected option '{name}': {source}")]
    Player {
        name: String,
        #[source]
        source: E,
    },
}

/// Failure that ends an agent run.
#[derive(Debug, Error)]
pub enum RunningError<E: PlayerError> {
    #[error("agent failed to start: {0}")]
    Startup(#[from] StartupError<E>),

    #[error("event dispatch failed: {0}")]
    Dispatch(#[from] DispatchError<E>),

    #[error("session state unavailable: {0}")]
    Poisoned(#[from] PoisonedLock),

    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),

    #[error("malformed input: {0}")]
    Convert(#[from] ConvertError),
}

/// Failure writing a game record.
#[derive(Debug, Error)]
pub enum KifuWriteError {
    #[error("record write failed: {0}")]
    Fail(String),

    #[error("record i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("ply {got} appended out of order, expected {expected}")]
    OutOfOrder { expected: u32, got: u32 },
}

/// Failure that ends a self-match.
#[derive(Debug, Error)]
pub enum SelfMatchRunningError<E: PlayerError> {
    #[error("{side} runtime failed at ply {ply}: {source}")]
    Runtime {
        side: Side,
        ply: u32,
        #[source]
        source: RunningError<E>,
    },

    #[error("{side} sent an unreadable move at ply {ply}: {source}")]
    Convert {
        side: Side,
        ply: u32,
        #[source]
        source: ConvertError,
    },

    #[error("start position is unusable: {0}")]
    Setup(#[source] ConvertError),

    #[error("{side} played illegal move {mv} at ply {ply}")]
    IllegalMove { side: Side, ply: u32, mv: Move },

    #[error("could not send to {side} at ply {ply}: {source}")]
    Send {
        side: Side,
        ply: u32,
        #[source]
        source: SendError<AgentInput>,
    },

    #[error("relay channel closed at ply {ply}: {source}")]
    Recv {
        ply: u32,
        #[source]
        source: RecvError,
    },

    #[error("{side} did not answer {waiting_for} at ply {ply}")]
    Unresponsive {
        side: Side,
        ply: u32,
        waiting_for: &'static str,
    },

    #[error("{side} thread panicked at ply {ply}")]
    SidePanicked { side: Side, ply: u32 },

    #[error("{side} misbehaved at ply {ply}: {reason}")]
    InvalidState {
        side: Side,
        ply: u32,
        reason: String,
    },

    #[error("{side} rejected option '{name}': {source}")]
    Player {
        side: Side,
        name: String,
        #[source]
        source: E,
    },

    #[error("observer failed: {0}")]
    Observer(#[from] DispatchError<E>),

    #[error("game record failed: {0}")]
    Kifu(#[from] KifuWriteError),

    #[error("self-match i/o failed: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug, PartialEq, Error)]
    #[error("engine out of memory")]
    struct Oom;

    impl PlayerError for Oom {}

    fn bad_number() -> ConvertError {
        let source = "abc".parse::<u64>().unwrap_err();
        ConvertError::InvalidNumber {
            token: "abc".to_string(),
            source,
        }
    }

    #[test]
    fn convert_error_keeps_token() {
        let err = bad_number();
        assert!(err.to_string().contains("'abc'"));
    }

    #[test]
    fn output_create_wraps_convert_losslessly() {
        let original = bad_number();
        let lifted = OutputCreateError::from(original.clone());
        match lifted {
            OutputCreateError::Convert(inner) => assert_eq!(inner, original),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn poisoned_lock_lifts_into_dispatch() {
        let original = PoisonedLock { resource: "context" };
        let lifted: DispatchError<Oom> = original.clone().into();
        assert!(matches!(lifted, DispatchError::Poisoned(ref p) if *p == original));
        assert!(lifted.to_string().contains("context"));
    }

    #[test]
    fn emit_error_maps_to_dedicated_handler_variants() {
        let closed: HandlerError<Oom> = EmitError::Closed.into();
        assert!(matches!(closed, HandlerError::OutputClosed));

        let io: HandlerError<Oom> =
            EmitError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe")).into();
        match io {
            HandlerError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn player_error_is_reachable_through_source() {
        let err: RunningError<Oom> = DispatchError::from(HandlerError::Player(Oom)).into();
        let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(&err);
        let mut depth = 0;
        while let Some(e) = cause {
            if e.downcast_ref::<Oom>().is_some() {
                break;
            }
            cause = e.source();
            depth += 1;
        }
        assert_eq!(depth, 3);
        assert!(err.to_string().contains("engine out of memory"));
    }

    #[test]
    fn lock_named_reports_resource() {
        let m = std::sync::Arc::new(Mutex::new(0u8));
        let m2 = m.clone();
        let _ = std::thread::spawn(move || {
            let _guard = m2.lock().unwrap();
            panic!("poison");
        })
        .join();
        let err = m.lock_named("counter").unwrap_err();
        assert_eq!(err.resource, "counter");
    }
}
