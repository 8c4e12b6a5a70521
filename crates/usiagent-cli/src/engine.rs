//! Built-in player and rule engine for `usiagent serve`.
//!
//! Enough to let a host run the full protocol conversation against this
//! binary: positions are kept as plain move lists and the player resigns on
//! every `go`.

use usiagent_core::{
    AppliedMove, BasePosition, BestMove, Color, ConvertError, EmitError, GoLimit, InfoSender,
    LegalMove, OptionValue, Outcome, Player, PlayerError, RuleEngine,
};

/// Options hosts commonly send unasked; accepted and ignored.
const HOST_OPTIONS: &[&str] = &["USI_Hash", "USI_Ponder"];

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("could not report progress: {0}")]
    Info(#[from] EmitError),
}

impl PlayerError for EngineError {}

/// A position reached from `base` by `moves`, unchecked.
#[derive(Debug, Clone, Default)]
pub struct MoveList {
    pub base: BasePosition,
    pub moves: Vec<AppliedMove>,
}

/// Accepts every move that survives wire validation. Never ends a game.
#[derive(Debug, Default, Clone, Copy)]
pub struct UncheckedRules;

impl RuleEngine for UncheckedRules {
    type Position = MoveList;

    fn setup(&self, base: &BasePosition) -> Result<MoveList, ConvertError> {
        if let BasePosition::Sfen(text) = base {
            sfen_side(text)?;
        }
        Ok(MoveList {
            base: base.clone(),
            moves: Vec::new(),
        })
    }

    fn side_to_move(&self, position: &MoveList) -> Color {
        let first = match &position.base {
            BasePosition::Startpos => Color::Black,
            BasePosition::Sfen(text) => sfen_side(text).unwrap_or(Color::Black),
        };
        if position.moves.len() % 2 == 0 {
            first
        } else {
            first.opposite()
        }
    }

    fn legal_moves(&self, _position: &MoveList) -> Vec<LegalMove> {
        Vec::new()
    }

    fn apply(&self, position: &MoveList, mv: &AppliedMove) -> Option<MoveList> {
        let mut next = position.clone();
        next.moves.push(*mv);
        Some(next)
    }

    fn is_terminal(&self, _position: &MoveList) -> Option<Outcome> {
        None
    }
}

/// Side to move from the second SFEN field.
fn sfen_side(text: &str) -> Result<Color, ConvertError> {
    match text.split_whitespace().nth(1) {
        Some("b") => Ok(Color::Black),
        Some("w") => Ok(Color::White),
        _ => Err(ConvertError::InvalidValue {
            what: "sfen",
            token: text.to_string(),
        }),
    }
}

#[derive(Debug, Default)]
pub struct ResignPlayer {
    games: u32,
}

impl Player<UncheckedRules> for ResignPlayer {
    type Error = EngineError;

    const ID: &'static str = "usiagent resign";
    const AUTHOR: &'static str = "usiagent contributors";

    fn set_option(&mut self, name: &str, _value: &OptionValue) -> Result<(), EngineError> {
        if HOST_OPTIONS.contains(&name) {
            Ok(())
        } else {
            Err(EngineError::UnknownOption(name.to_string()))
        }
    }

    fn new_game(&mut self) -> Result<(), EngineError> {
        self.games += 1;
        tracing::debug!(games = self.games, "new game");
        Ok(())
    }

    fn think(
        &mut self,
        position: &MoveList,
        _legal_moves: &[LegalMove],
        _limit: &GoLimit,
        info: &mut InfoSender<'_>,
    ) -> Result<BestMove, EngineError> {
        tracing::debug!(plies = position.moves.len(), "resigning");
        info.send(format!("resigning after {} plies", position.moves.len()))?;
        Ok(BestMove::Resign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use usiagent_core::{AgentOutput, Move};

    #[test]
    fn sfen_side_to_move_is_read_from_second_field() {
        let rules = UncheckedRules;
        let sfen = BasePosition::Sfen("lnsgkgsnl/9/9/9/9/9/9/9/LNSGKGSNL w - 1".into());
        let position = rules.setup(&sfen).unwrap();
        assert_eq!(rules.side_to_move(&position), Color::White);

        let mv = AppliedMove::try_from(Move::To {
            from: (7, 7),
            to: (7, 6),
            promote: false,
        })
        .unwrap();
        let next = rules.apply(&position, &mv).unwrap();
        assert_eq!(rules.side_to_move(&next), Color::Black);
    }

    #[test]
    fn sfen_without_side_is_rejected() {
        assert!(matches!(
            UncheckedRules.setup(&BasePosition::Sfen("9/9".into())),
            Err(ConvertError::InvalidValue { what: "sfen", .. })
        ));
    }

    #[test]
    fn resign_player_accepts_only_host_options() {
        let mut player = ResignPlayer::default();
        assert!(player.set_option("USI_Hash", &OptionValue::Num(256)).is_ok());
        let err = player
            .set_option("Threads", &OptionValue::Num(4))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown option 'Threads'");
    }

    #[test]
    fn resign_player_reports_before_resigning() {
        let (mut tx, rx) = unbounded::<AgentOutput>();
        let mut info = InfoSender::new(&mut tx);
        let position = UncheckedRules.setup(&BasePosition::Startpos).unwrap();

        let best = ResignPlayer::default()
            .think(&position, &[], &GoLimit::Infinite, &mut info)
            .unwrap();
        assert_eq!(best, BestMove::Resign);
        assert_eq!(
            rx.try_recv().unwrap(),
            AgentOutput::Info("resigning after 0 plies".into())
        );
    }
}
