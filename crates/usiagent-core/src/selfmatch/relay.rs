//! The relay: drives both sides through each game on the calling thread.
//!
//! The relay keeps its own position and is the only party that decides
//! legality and game end, always by asking the rule engine. Sides only ever
//! receive `position`/`go` for their own turn; a `bestmove` is validated,
//! appended to the record sink and only then is the turn handed over.
//!
//! Under a timed limit the relay also runs the game clock: each `go` carries
//! both remaining times and a side that overruns its allowance loses on time.
//! The match uptime and the cancel handle are checked between turns and
//! every poll interval while a side thinks; either one abandons the game in
//! progress.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::clock::GameClock;
use super::message::SelfMatchMessage;
use super::record::{GameHeader, GameRecord, RecordSink};
use super::side::SideHandle;
use super::{ObserverDispatcher, StartPosition};
use crate::config::{IllegalMovePolicy, SelfMatchConfig};
use crate::dispatch::DispatchOutcome;
use crate::error::{PlayerError, SelfMatchRunningError};
use crate::event::{
    AgentInput, FoulKind, GameEndState, SelfMatchEvent, Side, SystemEvent, UserEvent,
};
use crate::moves::{AppliedMove, BestMove, Color, Move};
use crate::protocol::AgentOutput;
use crate::report::{emit_game_finished, emit_game_started, emit_move_applied};
use crate::rules::{Outcome, PositionSetup, RuleEngine};
use crate::runtime::StopHandle;

type RelayResult<T, E> = Result<T, SelfMatchRunningError<E>>;

/// Why the relay stopped waiting on a side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    /// The turn allowance ran out; the mover loses on time.
    Clock,
    /// The match uptime is spent.
    Uptime,
    Cancelled,
}

enum Turn {
    Played(BestMove),
    Expired(Expiry),
}

/// Games played and whether the match ended before `config.games`.
pub(crate) struct RelayOutcome {
    pub(crate) records: Vec<GameRecord>,
    pub(crate) aborted: bool,
}

pub(crate) struct Relay<'a, R: RuleEngine, E: PlayerError> {
    pub(crate) rules: &'a R,
    pub(crate) config: &'a SelfMatchConfig,
    pub(crate) observers: &'a ObserverDispatcher<E>,
    pub(crate) messages: &'a Receiver<SelfMatchMessage<E>>,
    pub(crate) sides: &'a mut [SideHandle; 2],
    pub(crate) match_id: Uuid,
    pub(crate) start: &'a StartPosition,
    pub(crate) cancel: &'a StopHandle,
    /// When the match uptime runs out.
    pub(crate) uptime_deadline: Option<Instant>,
}

impl<'a, R: RuleEngine, E: PlayerError> Relay<'a, R, E> {
    pub(crate) fn run(&mut self, sink: &mut dyn RecordSink) -> RelayResult<RelayOutcome, E> {
        for side in [Side::Player1, Side::Player2] {
            self.send(side, SystemEvent::Usi.into(), 0)?;
        }
        let mut records = Vec::new();
        for game in 0..self.config.games {
            if let Some(expiry) = self.interruption() {
                info!(game, reason = ?expiry, "match ended before the next game");
                return Ok(RelayOutcome {
                    records,
                    aborted: true,
                });
            }
            let (record, keep_going) = self.play_game(game, sink)?;
            records.push(record);
            if !keep_going {
                return Ok(RelayOutcome {
                    records,
                    aborted: true,
                });
            }
        }
        Ok(RelayOutcome {
            records,
            aborted: false,
        })
    }

    fn play_game(
        &mut self,
        game: u32,
        sink: &mut dyn RecordSink,
    ) -> RelayResult<(GameRecord, bool), E> {
        let black = self.config.black_for_game(game);
        let side_of = |color: Color| match color {
            Color::Black => black,
            Color::White => black.other(),
        };

        for side in [Side::Player1, Side::Player2] {
            self.send(side, SystemEvent::IsReady.into(), 0)?;
        }
        self.await_ready()?;
        for side in [Side::Player1, Side::Player2] {
            self.send(side, SystemEvent::UsiNewGame.into(), 0)?;
        }

        let base = (self.start)(game);
        let mut position = self
            .rules
            .setup(&base)
            .map_err(SelfMatchRunningError::Setup)?;
        let mut setup = PositionSetup::new(base);
        let mut clock = GameClock::new(&self.config.limit);
        let header = GameHeader {
            match_id: self.match_id,
            game,
            black,
            start: setup.clone(),
        };
        sink.begin(&header)?;
        self.observers.with_context(|p| {
            p.game = game;
            p.ply = 0;
        })?;
        let mut keep_going = self.observe(SelfMatchEvent::GameStart {
            game,
            black,
            setup: setup.clone(),
        })?;
        emit_game_started(&self.match_id, game, black);

        let mut stalled = false;
        let end = loop {
            let ply = setup.moves.len() as u32 + 1;
            if self.config.max_plies.is_some_and(|max| ply > max) {
                break Some(GameEndState::MaxPlies);
            }

            if let Some(expiry) = self.interruption() {
                info!(game, ply, reason = ?expiry, "game abandoned");
                break None;
            }

            let color = self.rules.side_to_move(&position);
            let side = side_of(color);
            let turn_started = Instant::now();
            let turn_deadline = [clock.allowance(color), self.config.turn_timeout()]
                .into_iter()
                .flatten()
                .min()
                .map(|allowance| turn_started + allowance);
            self.send(side, SystemEvent::Position(setup.clone()).into(), ply)?;
            self.send(side, SystemEvent::Go(clock.go_limit()).into(), ply)?;

            let best = match self.await_turn(side, ply, turn_deadline)? {
                Turn::Played(best) => best,
                Turn::Expired(expiry) => {
                    warn!(side = %side, ply, reason = ?expiry, "turn ended without bestmove");
                    self.send(side, UserEvent::Stop.into(), ply)?;
                    let grace = Instant::now() + self.config.join_timeout();
                    stalled = self.await_bestmove(side, ply, Some(grace))?.is_none();
                    match expiry {
                        Expiry::Clock => break Some(GameEndState::Timeover { loser: side }),
                        Expiry::Uptime | Expiry::Cancelled => break None,
                    }
                }
            };
            clock.charge(color, turn_started.elapsed());
            trace!(side = %side, ply, remaining_ms = ?clock.remaining_ms(color), "clock charged");

            let mv = match best {
                BestMove::Move(mv) => mv,
                BestMove::Resign => break Some(GameEndState::Resign { loser: side }),
                BestMove::Win if self.rules.declares_win(&position, color) => {
                    break Some(GameEndState::DeclareWin { winner: side })
                }
                BestMove::Win => break Some(GameEndState::DeclareLose { loser: side }),
                BestMove::Abort => break None,
            };

            let Some(next) = self.check_move(&position, mv, side, ply)? else {
                break Some(GameEndState::Foul {
                    loser: side,
                    kind: FoulKind::InvalidMove,
                });
            };
            sink.append(ply, &mv)?;
            setup.moves.push(mv);
            position = next;

            self.observers.with_context(|p| p.ply = ply)?;
            keep_going &= self.observe(SelfMatchEvent::Moved { ply, color, mv })?;
            emit_move_applied(&self.match_id, game, ply, side, &mv);

            if let Some(outcome) = self.rules.is_terminal(&position) {
                break Some(end_state(outcome, side_of));
            }
        };

        let plies = setup.moves.len() as u32;
        match &end {
            Some(state) => {
                for side in [Side::Player1, Side::Player2] {
                    let result = state.result_for(side);
                    self.send(side, SystemEvent::GameOver(result).into(), plies)?;
                }
                keep_going &= self.observe(SelfMatchEvent::GameEnd(*state))?;
            }
            None => {
                self.observe(SelfMatchEvent::Abort)?;
                keep_going = false;
            }
        }
        sink.finish(end.as_ref())?;
        emit_game_finished(&self.match_id, game, plies, end.as_ref());

        let record = GameRecord {
            header,
            moves: setup.moves,
            end,
        };
        Ok((record, keep_going && !stalled))
    }

    /// `Some(next)` for a legal move; `None` when the move is a foul under
    /// [`IllegalMovePolicy::Foul`].
    fn check_move(
        &self,
        position: &R::Position,
        mv: Move,
        side: Side,
        ply: u32,
    ) -> RelayResult<Option<R::Position>, E> {
        let policy = self.config.illegal_move;
        let applied = match AppliedMove::try_from(mv) {
            Ok(applied) => applied,
            Err(source) if policy == IllegalMovePolicy::Fail => {
                return Err(SelfMatchRunningError::Convert { side, ply, source })
            }
            Err(e) => {
                warn!(side = %side, ply, error = %e, "unreadable move scored as foul");
                return Ok(None);
            }
        };
        match self.rules.apply(position, &applied) {
            Some(next) => Ok(Some(next)),
            None if policy == IllegalMovePolicy::Fail => {
                Err(SelfMatchRunningError::IllegalMove { side, ply, mv })
            }
            None => {
                warn!(side = %side, ply, mv = %mv, "illegal move scored as foul");
                Ok(None)
            }
        }
    }

    /// Publishes to observers; `false` when one of them asked to stop.
    fn observe(&self, event: SelfMatchEvent) -> RelayResult<bool, E> {
        Ok(self.observers.dispatch(&event)? != DispatchOutcome::Stop)
    }

    fn send(&self, side: Side, input: AgentInput, ply: u32) -> RelayResult<(), E> {
        trace!(side = %side, ply, input = ?input, "relay send");
        self.sides[side.slot()]
            .send(input)
            .map_err(|source| SelfMatchRunningError::Send { side, ply, source })
    }

    fn await_ready(&mut self) -> RelayResult<(), E> {
        let deadline = Instant::now() + self.config.ready_timeout();
        let mut pending = [true, true];
        while let Some(waiting) = pending.iter().position(|p| *p) {
            match self.next_output(Some(deadline), 0)? {
                Some((side, AgentOutput::ReadyOk)) => pending[side.slot()] = false,
                Some((side, AgentOutput::BestMove(_))) => {
                    return Err(SelfMatchRunningError::InvalidState {
                        side,
                        ply: 0,
                        reason: "bestmove while waiting for readyok".to_string(),
                    })
                }
                Some(_) => {}
                None => {
                    let side = if waiting == 0 {
                        Side::Player1
                    } else {
                        Side::Player2
                    };
                    return Err(SelfMatchRunningError::Unresponsive {
                        side,
                        ply: 0,
                        waiting_for: "readyok",
                    });
                }
            }
        }
        Ok(())
    }

    /// Waits out one turn, waking every poll interval to check the uptime
    /// and the cancel handle.
    fn await_turn(
        &mut self,
        side: Side,
        ply: u32,
        turn_deadline: Option<Instant>,
    ) -> RelayResult<Turn, E> {
        let slice = self.config.agent.poll_interval().max(Duration::from_millis(1));
        loop {
            if let Some(expiry) = self.interruption() {
                return Ok(Turn::Expired(expiry));
            }
            let now = Instant::now();
            if turn_deadline.is_some_and(|deadline| now >= deadline) {
                return Ok(Turn::Expired(Expiry::Clock));
            }
            let wake = [Some(now + slice), turn_deadline, self.uptime_deadline]
                .into_iter()
                .flatten()
                .min();
            if let Some(best) = self.await_bestmove(side, ply, wake)? {
                return Ok(Turn::Played(best));
            }
        }
    }

    /// Set when the match must end before its configured games are played.
    fn interruption(&self) -> Option<Expiry> {
        if self.cancel.is_stop_requested() {
            Some(Expiry::Cancelled)
        } else if self
            .uptime_deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            Some(Expiry::Uptime)
        } else {
            None
        }
    }

    /// Waits for `side`'s `bestmove`. `None` when `deadline` passes first.
    fn await_bestmove(
        &mut self,
        side: Side,
        ply: u32,
        deadline: Option<Instant>,
    ) -> RelayResult<Option<BestMove>, E> {
        loop {
            match self.next_output(deadline, ply)? {
                Some((from, AgentOutput::BestMove(best))) if from == side => {
                    debug!(side = %side, ply, bestmove = ?best, "bestmove received");
                    return Ok(Some(best));
                }
                Some((from, AgentOutput::BestMove(_))) => {
                    return Err(SelfMatchRunningError::InvalidState {
                        side: from,
                        ply,
                        reason: "bestmove out of turn".to_string(),
                    })
                }
                Some((from, AgentOutput::Info(text))) => {
                    debug!(side = %from, ply, info = %text, "side info");
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
    }

    /// Next output from either side. Runtime exits and panics are errors;
    /// `None` means the deadline passed.
    fn next_output(
        &mut self,
        deadline: Option<Instant>,
        ply: u32,
    ) -> RelayResult<Option<(Side, AgentOutput)>, E> {
        let message = match deadline {
            Some(deadline) => match self.messages.recv_deadline(deadline) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SelfMatchRunningError::Recv {
                        ply,
                        source: crossbeam_channel::RecvError,
                    })
                }
            },
            None => self
                .messages
                .recv()
                .map_err(|source| SelfMatchRunningError::Recv { ply, source })?,
        };

        match message {
            SelfMatchMessage::Output { side, output } => {
                trace!(side = %side, output = ?output, "relay received");
                Ok(Some((side, output)))
            }
            SelfMatchMessage::Finished { side, result } => {
                self.sides[side.slot()].finished = true;
                Err(match result {
                    Err(source) => SelfMatchRunningError::Runtime { side, ply, source },
                    Ok(outcome) => SelfMatchRunningError::InvalidState {
                        side,
                        ply,
                        reason: format!("runtime ended early ({:?})", outcome.end),
                    },
                })
            }
            SelfMatchMessage::Panicked { side } => {
                self.sides[side.slot()].finished = true;
                Err(SelfMatchRunningError::SidePanicked { side, ply })
            }
        }
    }
}

fn end_state(outcome: Outcome, side_of: impl Fn(Color) -> Side) -> GameEndState {
    match outcome {
        Outcome::Checkmate { winner } => GameEndState::Checkmate {
            winner: side_of(winner),
        },
        Outcome::Draw => GameEndState::Draw,
        Outcome::Foul { loser, kind } => GameEndState::Foul {
            loser: side_of(loser),
            kind,
        },
    }
}
