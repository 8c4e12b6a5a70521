//! Game records and the sink they are written to.

use serde::Serialize;
use uuid::Uuid;

use crate::error::KifuWriteError;
use crate::event::{GameEndState, Side};
use crate::moves::Move;
use crate::rules::PositionSetup;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameHeader {
    pub match_id: Uuid,
    /// Zero-based game number within the match.
    pub game: u32,
    pub black: Side,
    pub start: PositionSetup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameRecord {
    #[serde(flatten)]
    pub header: GameHeader,
    pub moves: Vec<Move>,
    /// `None` when the game was aborted.
    pub end: Option<GameEndState>,
}

/// Append-only destination for self-match games.
///
/// The relay calls `begin` once per game, `append` for every accepted move in
/// ply order and `finish` when the game ends.
pub trait RecordSink {
    fn begin(&mut self, header: &GameHeader) -> Result<(), KifuWriteError>;

    fn append(&mut self, ply: u32, mv: &Move) -> Result<(), KifuWriteError>;

    fn finish(&mut self, end: Option<&GameEndState>) -> Result<(), KifuWriteError>;
}

/// Keeps records in memory. Rejects out-of-order plies.
#[derive(Debug, Default)]
pub struct MemoryRecordSink {
    games: Vec<GameRecord>,
    current: Option<GameRecord>,
    appended: Vec<(u32, Move)>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn games(&self) -> &[GameRecord] {
        &self.games
    }

    /// Every `append` call across all games, in call order.
    pub fn appended(&self) -> &[(u32, Move)] {
        &self.appended
    }
}

impl RecordSink for MemoryRecordSink {
    fn begin(&mut self, header: &GameHeader) -> Result<(), KifuWriteError> {
        if let Some(open) = &self.current {
            return Err(KifuWriteError::Fail(format!(
                "game {} is still open",
                open.header.game
            )));
        }
        self.current = Some(GameRecord {
            header: header.clone(),
            moves: Vec::new(),
            end: None,
        });
        Ok(())
    }

    fn append(&mut self, ply: u32, mv: &Move) -> Result<(), KifuWriteError> {
        let record = self
            .current
            .as_mut()
            .ok_or_else(|| KifuWriteError::Fail("no game in progress".to_string()))?;
        let expected = record.moves.len() as u32 + 1;
        if ply != expected {
            return Err(KifuWriteError::OutOfOrder { expected, got: ply });
        }
        record.moves.push(*mv);
        self.appended.push((ply, *mv));
        Ok(())
    }

    fn finish(&mut self, end: Option<&GameEndState>) -> Result<(), KifuWriteError> {
        let mut record = self
            .current
            .take()
            .ok_or_else(|| KifuWriteError::Fail("no game in progress".to_string()))?;
        record.end = end.copied();
        self.games.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(game: u32) -> GameHeader {
        GameHeader {
            match_id: Uuid::nil(),
            game,
            black: Side::Player1,
            start: PositionSetup::default(),
        }
    }

    fn mv(file: u8) -> Move {
        Move::To {
            from: (file, 7),
            to: (file, 6),
            promote: false,
        }
    }

    #[test]
    fn records_moves_between_begin_and_finish() {
        let mut sink = MemoryRecordSink::new();
        sink.begin(&header(0)).unwrap();
        sink.append(1, &mv(7)).unwrap();
        sink.append(2, &mv(3)).unwrap();
        sink.finish(Some(&GameEndState::Draw)).unwrap();

        assert_eq!(sink.games().len(), 1);
        assert_eq!(sink.games()[0].moves, vec![mv(7), mv(3)]);
        assert_eq!(sink.games()[0].end, Some(GameEndState::Draw));
    }

    #[test]
    fn out_of_order_ply_is_rejected() {
        let mut sink = MemoryRecordSink::new();
        sink.begin(&header(0)).unwrap();
        let err = sink.append(2, &mv(7)).unwrap_err();
        assert!(matches!(err, KifuWriteError::OutOfOrder { expected: 1, got: 2 }));
    }

    #[test]
    fn append_without_game_fails() {
        let mut sink = MemoryRecordSink::new();
        assert!(matches!(
            sink.append(1, &mv(7)),
            Err(KifuWriteError::Fail(_))
        ));
    }

    #[test]
    fn record_serializes_with_flattened_header() {
        let record = GameRecord {
            header: header(2),
            moves: vec![mv(7)],
            end: Some(GameEndState::Resign {
                loser: Side::Player2,
            }),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["game"], 2);
        assert_eq!(json["end"]["reason"], "resign");
        assert_eq!(json["end"]["loser"], "player2");
    }
}
