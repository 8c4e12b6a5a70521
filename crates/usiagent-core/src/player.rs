//! Player collaborator: the strategy plugged into an agent.

use serde::{Deserialize, Serialize};

use crate::error::{EmitError, PlayerError};
use crate::event::{GameResult, GoLimit, OptionValue};
use crate::moves::{BestMove, LegalMove};
use crate::protocol::{check_line, AgentOutput, OutputSink};
use crate::rules::RuleEngine;

/// Type and default of an engine option advertised after `usi`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum OptionKind {
    Check {
        default: bool,
    },
    Spin {
        default: i64,
        min: i64,
        max: i64,
    },
    Combo {
        default: String,
        vars: Vec<String>,
    },
    Text {
        default: String,
    },
    Filename {
        default: String,
    },
    Button,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    pub kind: OptionKind,
}

/// Sends `info string` lines to the peer while a player thinks.
pub struct InfoSender<'a> {
    sink: &'a mut dyn OutputSink,
    sent: usize,
}

impl<'a> InfoSender<'a> {
    pub fn new(sink: &'a mut dyn OutputSink) -> Self {
        Self { sink, sent: 0 }
    }

    /// Emits one line. Fails when the text is not a single line or the peer
    /// is gone.
    pub fn send(&mut self, text: impl Into<String>) -> Result<(), EmitError> {
        let text = text.into();
        check_line("info string", &text)?;
        self.sink.emit(AgentOutput::Info(text))?;
        self.sent += 1;
        Ok(())
    }

    /// Lines sent so far.
    pub fn sent(&self) -> usize {
        self.sent
    }
}

/// Game-playing logic driven by an [`crate::runtime::AgentRuntime`].
///
/// Hooks other than [`Player::think`] default to no-ops.
pub trait Player<R: RuleEngine>: Send + 'static {
    type Error: PlayerError;

    const ID: &'static str;
    const AUTHOR: &'static str;

    fn options(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    fn set_option(&mut self, _name: &str, _value: &OptionValue) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Called on `isready`; heavy initialisation belongs here.
    fn take_ready(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn new_game(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Chooses a reply. `legal_moves` is whatever the rule engine produced for
    /// `position`. Progress can be reported through `info` before returning.
    fn think(
        &mut self,
        position: &R::Position,
        legal_moves: &[LegalMove],
        limit: &GoLimit,
        info: &mut InfoSender<'_>,
    ) -> Result<BestMove, Self::Error>;

    fn on_stop(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn on_ponderhit(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn game_over(&mut self, _result: GameResult) -> Result<(), Self::Error> {
        Ok(())
    }

    fn quit(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
