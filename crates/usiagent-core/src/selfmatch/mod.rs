//! Self-match orchestration: two agent runtimes playing each other.
//!
//! # Module layout
//!
//! - [`message`]: what side threads report to the relay
//! - [`record`]: game records and [`RecordSink`]
//! - `side`: side threads, bounded cleanup
//! - `relay`: the per-game turn loop
//! - `clock`: remaining time per color under a timed limit
//!
//! Each side runs an [`crate::runtime::AgentRuntime`] on its own thread, fed
//! through a channel. Only protocol values cross thread boundaries; every side
//! and the relay keep their own position.

mod clock;
pub mod message;
pub mod record;
mod relay;
mod side;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::unbounded;
use serde::Serialize;
use uuid::Uuid;

pub use message::SelfMatchMessage;
pub use record::{GameHeader, GameRecord, MemoryRecordSink, RecordSink};

use crate::config::SelfMatchConfig;
use crate::dispatch::EventDispatcher;
use crate::error::{PlayerError, SelfMatchRunningError};
use crate::event::{SelfMatchEvent, SelfMatchEventKind, Side};
use crate::player::Player;
use crate::report::{
    emit_match_finished, emit_match_started, sandboxed, ErrorReporter, MatchSpan, TracingReporter,
};
use crate::rules::{BasePosition, RuleEngine};
use crate::runtime::StopHandle;
use relay::Relay;
use side::{shutdown, SideHandle};

/// Where the match stands; the context observers see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchProgress {
    pub match_id: Uuid,
    pub game: u32,
    /// Last ply applied in the current game.
    pub ply: u32,
}

pub type ObserverDispatcher<E> =
    EventDispatcher<SelfMatchEventKind, SelfMatchEvent, MatchProgress, E>;

/// Chooses the start position of each game from its zero-based number.
pub type StartPosition = dyn Fn(u32) -> BasePosition + Send + Sync;

#[derive(Debug, Clone, Serialize)]
pub struct SelfMatchResult {
    pub match_id: Uuid,
    pub records: Vec<GameRecord>,
    /// The match ended before all configured games were played.
    pub aborted: bool,
    pub elapsed: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct SelfMatch<R: RuleEngine, E: PlayerError> {
    rules: Arc<R>,
    config: SelfMatchConfig,
    observers: ObserverDispatcher<E>,
    reporter: Arc<dyn ErrorReporter>,
    start: Box<StartPosition>,
    cancel: StopHandle,
}

impl<R: RuleEngine, E: PlayerError> SelfMatch<R, E> {
    pub fn new(rules: Arc<R>, config: SelfMatchConfig) -> Self {
        let start = config.start.clone();
        Self {
            rules,
            config,
            observers: ObserverDispatcher::new(MatchProgress::default()),
            reporter: Arc::new(TracingReporter),
            start: Box::new(move |_game: u32| start.clone()),
            cancel: StopHandle::default(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replaces `config.start` with a position chosen per game.
    ///
    /// ```ignore
    /// let openings = vec![BasePosition::Startpos, BasePosition::Sfen(sfen)];
    /// let selfmatch = SelfMatch::new(rules, config)
    ///     .with_start_position(move |game| openings[game as usize % 2].clone());
    /// ```
    pub fn with_start_position<F>(mut self, start: F) -> Self
    where
        F: Fn(u32) -> BasePosition + Send + Sync + 'static,
    {
        self.start = Box::new(start);
        self
    }

    /// Handle that ends a running match from another thread. The game in
    /// progress is abandoned and the result is marked aborted.
    ///
    /// The request is sticky: later runs end before their first game.
    pub fn stop_handle(&self) -> StopHandle {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SelfMatchConfig {
        &self.config
    }

    /// Dispatcher for [`SelfMatchEvent`]s. A handler returning
    /// [`crate::dispatch::Flow::Stop`] ends the match after the current game.
    pub fn observers(&self) -> &ObserverDispatcher<E> {
        &self.observers
    }

    /// Plays `config.games` games between the two players.
    ///
    /// On failure the first error observed is returned after both sides
    /// have been asked to quit and joined, or detached once the join timeout
    /// elapses.
    pub fn run<P1, P2>(
        &self,
        player1: P1,
        player2: P2,
        sink: &mut dyn RecordSink,
    ) -> Result<SelfMatchResult, SelfMatchRunningError<E>>
    where
        P1: Player<R, Error = E>,
        P2: Player<R, Error = E>,
    {
        sandboxed(&*self.reporter, || self.play(player1, player2, sink))
    }

    fn play<P1, P2>(
        &self,
        mut player1: P1,
        mut player2: P2,
        sink: &mut dyn RecordSink,
    ) -> Result<SelfMatchResult, SelfMatchRunningError<E>>
    where
        P1: Player<R, Error = E>,
        P2: Player<R, Error = E>,
    {
        let match_id = Uuid::new_v4();
        let _span = MatchSpan::enter(&match_id);
        let started_at = Utc::now();
        let started = Instant::now();

        self.apply_options(Side::Player1, &mut player1)?;
        self.apply_options(Side::Player2, &mut player2)?;
        self.observers.with_context(|p| {
            *p = MatchProgress {
                match_id,
                ..MatchProgress::default()
            }
        })?;
        emit_match_started(&match_id, self.config.games);

        let (tx, rx) = unbounded::<SelfMatchMessage<E>>();
        let first = SideHandle::spawn(
            Side::Player1,
            player1,
            self.rules.clone(),
            self.config.agent.clone(),
            tx.clone(),
            self.reporter.clone(),
        )?;
        let second = match SideHandle::spawn(
            Side::Player2,
            player2,
            self.rules.clone(),
            self.config.agent.clone(),
            tx,
            self.reporter.clone(),
        ) {
            Ok(second) => second,
            Err(e) => {
                shutdown(&mut [first], &rx, self.config.join_timeout(), &match_id);
                return Err(e.into());
            }
        };
        let mut sides = [first, second];

        let outcome = Relay {
            rules: &*self.rules,
            config: &self.config,
            observers: &self.observers,
            messages: &rx,
            sides: &mut sides,
            match_id,
            start: &*self.start,
            cancel: &self.cancel,
            uptime_deadline: self.config.uptime().map(|uptime| started + uptime),
        }
        .run(sink);
        shutdown(&mut sides, &rx, self.config.join_timeout(), &match_id);

        let elapsed = started.elapsed();
        emit_match_finished(
            &match_id,
            outcome.as_ref().map_or(0, |o| o.records.len() as u32),
            elapsed.as_millis() as u64,
            outcome.is_ok(),
        );
        let outcome = outcome?;
        Ok(SelfMatchResult {
            match_id,
            records: outcome.records,
            aborted: outcome.aborted,
            elapsed,
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn apply_options<P: Player<R, Error = E>>(
        &self,
        side: Side,
        player: &mut P,
    ) -> Result<(), SelfMatchRunningError<E>> {
        for (name, value) in self.config.options_for(side) {
            player
                .set_option(name, value)
                .map_err(|source| SelfMatchRunningError::Player {
                    side,
                    name: name.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}
