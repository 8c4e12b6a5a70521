//! Agent runtime: a read loop over two dispatchers.
//!
//! Protocol commands go through a [`SystemEvent`] dispatcher whose context
//! owns the output sink and the agent's own position. Directives from the
//! embedding program go through a [`UserEvent`] dispatcher. Both share the
//! player behind a mutex.
//!
//! # Lifecycle
//!
//! - `start` validates identity, applies configured options and registers
//!   the default handler set. Failures here are [`StartupError`]s.
//! - The loop polls the input source and dispatches each input in arrival
//!   order. It ends on a handler asking to stop (`quit`), input exhaustion,
//!   a [`StopHandle`] request or the first error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, info_span, warn};

use crate::config::AgentConfig;
use crate::dispatch::{DispatchOutcome, EventDispatcher, Flow};
use crate::error::{HandlerError, LockExt, PlayerError, PoisonedLock, RunningError, StartupError};
use crate::event::{AgentInput, SystemEvent, SystemEventKind, UserEvent, UserEventKind};
use crate::moves::{AppliedMove, BestMove};
use crate::player::{InfoSender, Player};
use crate::protocol::{AgentOutput, InputSource, OutputSink, Polled, ProtocolCodec, UsiCodec};
use crate::report::{ErrorReporter, TracingReporter};
use crate::rules::{PositionSetup, RuleEngine};

/// Cooperative stop request, checked between dispatches.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Where the agent is in the protocol conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Handshake,
    Ready,
    InGame,
    GameOver,
    Quit,
}

/// Snapshot of agent state readable from outside the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub phase: Phase,
    pub games: u32,
    pub position: Option<PositionSetup>,
    pub last_bestmove: Option<BestMove>,
    pub events: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SessionHandle(Arc<Mutex<Session>>);

impl SessionHandle {
    pub fn snapshot(&self) -> Result<Session, PoisonedLock> {
        Ok(self.0.lock_named("session")?.clone())
    }

    fn update<T>(&self, f: impl FnOnce(&mut Session) -> T) -> Result<T, PoisonedLock> {
        let mut session = self.0.lock_named("session")?;
        Ok(f(&mut session))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// A handler asked to stop (`quit`).
    Quit,
    InputClosed,
    /// The [`StopHandle`] was triggered.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub end: RunEnd,
    /// Inputs dispatched, including unclaimed ones.
    pub events: u64,
}

/// Context of the protocol dispatcher.
pub struct AgentContext<P, R: RuleEngine> {
    player: Arc<Mutex<P>>,
    rules: Arc<R>,
    sink: Box<dyn OutputSink>,
    session: SessionHandle,
    position: Option<R::Position>,
}

/// Context of the user-directive dispatcher.
pub struct UserContext<P> {
    player: Arc<Mutex<P>>,
}

pub type SystemDispatcher<P, R> =
    EventDispatcher<SystemEventKind, SystemEvent, AgentContext<P, R>, <P as Player<R>>::Error>;

pub type UserDispatcher<P, R> =
    EventDispatcher<UserEventKind, UserEvent, UserContext<P>, <P as Player<R>>::Error>;

type HandlerResult<P, R> = Result<Flow, HandlerError<<P as Player<R>>::Error>>;

fn payload_mismatch<E: PlayerError>(event: &'static str) -> HandlerError<E> {
    HandlerError::InvalidState {
        event,
        reason: "payload does not match event kind",
    }
}

pub struct AgentRuntime<P, R: RuleEngine> {
    player: Arc<Mutex<P>>,
    rules: Arc<R>,
    config: AgentConfig,
    stop: StopHandle,
    session: SessionHandle,
    reporter: Arc<dyn ErrorReporter>,
}

impl<P: Player<R>, R: RuleEngine> AgentRuntime<P, R> {
    pub fn new(player: P, rules: Arc<R>, config: AgentConfig) -> Self {
        Self {
            player: Arc::new(Mutex::new(player)),
            rules,
            config,
            stop: StopHandle::default(),
            session: SessionHandle::default(),
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn session(&self) -> SessionHandle {
        self.session.clone()
    }

    pub fn player(&self) -> Arc<Mutex<P>> {
        self.player.clone()
    }

    /// Runs the agent until it quits, its input closes or it is stopped.
    ///
    /// A failing run is reported through the configured [`ErrorReporter`]
    /// before the error is returned, unless a stop had been requested: the
    /// owner has already given up on the run and its output.
    pub fn start<S, O>(
        &self,
        source: &mut S,
        sink: O,
    ) -> Result<RunOutcome, RunningError<P::Error>>
    where
        S: InputSource + ?Sized,
        O: OutputSink + 'static,
    {
        let span = info_span!("usiagent.agent", id = P::ID);
        let _guard = span.enter();
        let result = self
            .startup(Box::new(sink))
            .map_err(RunningError::from)
            .and_then(|(system, user)| self.run_loop(source, &system, &user));
        if let Err(e) = &result {
            if self.stop.is_stop_requested() {
                debug!(error = %e, "run failed after stop was requested");
            } else {
                self.reporter.report(e);
            }
        }
        result
    }

    fn startup(
        &self,
        sink: Box<dyn OutputSink>,
    ) -> Result<(SystemDispatcher<P, R>, UserDispatcher<P, R>), StartupError<P::Error>> {
        UsiCodec.format_output(&AgentOutput::Id {
            name: P::ID.to_string(),
            author: P::AUTHOR.to_string(),
        })?;

        {
            let mut player = self.player.lock_named("player")?;
            for (name, value) in &self.config.options {
                player
                    .set_option(name, value)
                    .map_err(|source| StartupError::Player {
                        name: name.clone(),
                        source,
                    })?;
            }
        }

        let system = SystemDispatcher::<P, R>::new(AgentContext {
            player: self.player.clone(),
            rules: self.rules.clone(),
            sink,
            session: self.session.clone(),
            position: None,
        });
        system.register(SystemEventKind::Usi, Self::on_usi)?;
        system.register(SystemEventKind::IsReady, Self::on_isready)?;
        system.register(SystemEventKind::SetOption, Self::on_setoption)?;
        system.register(SystemEventKind::UsiNewGame, Self::on_usinewgame)?;
        system.register(SystemEventKind::Position, Self::on_position)?;
        system.register(SystemEventKind::Go, Self::on_go)?;
        system.register(SystemEventKind::Stop, Self::on_stop)?;
        system.register(SystemEventKind::PonderHit, Self::on_ponderhit)?;
        system.register(SystemEventKind::GameOver, Self::on_gameover)?;
        system.register(SystemEventKind::Quit, Self::on_quit)?;

        let user = UserDispatcher::<P, R>::new(UserContext {
            player: self.player.clone(),
        });
        user.register(UserEventKind::Stop, |ctx: &mut UserContext<P>, _: &UserEvent| {
            let mut player = ctx.player.lock_named("player")?;
            player.on_stop().map_err(HandlerError::Player)?;
            Ok(Flow::Continue)
        })?;
        user.register(
            UserEventKind::PonderHit,
            |ctx: &mut UserContext<P>, _: &UserEvent| {
                let mut player = ctx.player.lock_named("player")?;
                player.on_ponderhit().map_err(HandlerError::Player)?;
                Ok(Flow::Continue)
            },
        )?;
        user.register(UserEventKind::Quit, |ctx: &mut UserContext<P>, _: &UserEvent| {
            let mut player = ctx.player.lock_named("player")?;
            player.quit().map_err(HandlerError::Player)?;
            Ok(Flow::Stop)
        })?;

        info!(id = P::ID, author = P::AUTHOR, options = self.config.options.len(), "agent started");
        Ok((system, user))
    }

    fn run_loop<S>(
        &self,
        source: &mut S,
        system: &SystemDispatcher<P, R>,
        user: &UserDispatcher<P, R>,
    ) -> Result<RunOutcome, RunningError<P::Error>>
    where
        S: InputSource + ?Sized,
    {
        let mut events = 0u64;
        let end = loop {
            if self.stop.is_stop_requested() {
                break RunEnd::Stopped;
            }
            let input = match source.poll(self.config.poll_interval())? {
                Polled::Input(input) => input,
                Polled::Idle => continue,
                Polled::Closed => break RunEnd::InputClosed,
                Polled::Malformed(e) => {
                    if self.config.strict_protocol {
                        return Err(e.into());
                    }
                    warn!(error = %e, "skipping malformed input");
                    continue;
                }
            };

            events += 1;
            let outcome = match &input {
                AgentInput::System(event) => system.dispatch(event)?,
                AgentInput::User(event) => user.dispatch(event)?,
            };
            self.session.update(|s| s.events = events)?;
            if outcome == DispatchOutcome::Stop {
                break RunEnd::Quit;
            }
        };

        system.stop();
        user.stop();
        info!(end = ?end, events = events, "agent loop finished");
        Ok(RunOutcome { end, events })
    }

    fn on_usi(ctx: &mut AgentContext<P, R>, _: &SystemEvent) -> HandlerResult<P, R> {
        let options = ctx.player.lock_named("player")?.options();
        ctx.sink.emit(AgentOutput::Id {
            name: P::ID.to_string(),
            author: P::AUTHOR.to_string(),
        })?;
        for spec in options {
            ctx.sink.emit(AgentOutput::Option(spec))?;
        }
        ctx.sink.emit(AgentOutput::UsiOk)?;
        Ok(Flow::Continue)
    }

    fn on_isready(ctx: &mut AgentContext<P, R>, _: &SystemEvent) -> HandlerResult<P, R> {
        ctx.player
            .lock_named("player")?
            .take_ready()
            .map_err(HandlerError::Player)?;
        ctx.session.update(|s| {
            if s.phase == Phase::Handshake {
                s.phase = Phase::Ready;
            }
        })?;
        ctx.sink.emit(AgentOutput::ReadyOk)?;
        Ok(Flow::Continue)
    }

    fn on_setoption(ctx: &mut AgentContext<P, R>, event: &SystemEvent) -> HandlerResult<P, R> {
        let SystemEvent::SetOption(name, value) = event else {
            return Err(payload_mismatch("setoption"));
        };
        debug!(name = %name, value = ?value, "setoption");
        ctx.player
            .lock_named("player")?
            .set_option(name, value)
            .map_err(HandlerError::Player)?;
        Ok(Flow::Continue)
    }

    fn on_usinewgame(ctx: &mut AgentContext<P, R>, _: &SystemEvent) -> HandlerResult<P, R> {
        if ctx.session.snapshot()?.phase == Phase::Handshake {
            return Err(HandlerError::InvalidState {
                event: "usinewgame",
                reason: "isready has not been answered",
            });
        }
        ctx.player
            .lock_named("player")?
            .new_game()
            .map_err(HandlerError::Player)?;
        ctx.position = None;
        ctx.session.update(|s| {
            s.phase = Phase::InGame;
            s.games += 1;
            s.position = None;
            s.last_bestmove = None;
        })?;
        Ok(Flow::Continue)
    }

    fn on_position(ctx: &mut AgentContext<P, R>, event: &SystemEvent) -> HandlerResult<P, R> {
        let SystemEvent::Position(setup) = event else {
            return Err(payload_mismatch("position"));
        };
        if ctx.session.snapshot()?.phase != Phase::InGame {
            return Err(HandlerError::InvalidState {
                event: "position",
                reason: "no game in progress",
            });
        }

        let mut position = ctx.rules.setup(&setup.base)?;
        for (i, mv) in setup.moves.iter().enumerate() {
            let applied = AppliedMove::try_from(*mv)?;
            position = ctx
                .rules
                .apply(&position, &applied)
                .ok_or(HandlerError::IllegalMove {
                    ply: i as u32 + 1,
                    mv: *mv,
                })?;
        }
        ctx.position = Some(position);
        ctx.session.update(|s| s.position = Some(setup.clone()))?;
        debug!(plies = setup.moves.len(), "position set");
        Ok(Flow::Continue)
    }

    fn on_go(ctx: &mut AgentContext<P, R>, event: &SystemEvent) -> HandlerResult<P, R> {
        let SystemEvent::Go(limit) = event else {
            return Err(payload_mismatch("go"));
        };
        let Some(position) = ctx.position.as_ref() else {
            return Err(HandlerError::InvalidState {
                event: "go",
                reason: "no position has been set",
            });
        };

        let legal = ctx.rules.legal_moves(position);
        let mut info = InfoSender::new(&mut *ctx.sink);
        let best = ctx
            .player
            .lock_named("player")?
            .think(position, &legal, limit, &mut info)
            .map_err(HandlerError::Player)?;
        debug!(bestmove = ?best, candidates = legal.len(), info = info.sent(), "think finished");

        ctx.session.update(|s| s.last_bestmove = Some(best.clone()))?;
        ctx.sink.emit(AgentOutput::BestMove(best))?;
        Ok(Flow::Continue)
    }

    fn on_stop(ctx: &mut AgentContext<P, R>, _: &SystemEvent) -> HandlerResult<P, R> {
        ctx.player
            .lock_named("player")?
            .on_stop()
            .map_err(HandlerError::Player)?;
        Ok(Flow::Continue)
    }

    fn on_ponderhit(ctx: &mut AgentContext<P, R>, _: &SystemEvent) -> HandlerResult<P, R> {
        ctx.player
            .lock_named("player")?
            .on_ponderhit()
            .map_err(HandlerError::Player)?;
        Ok(Flow::Continue)
    }

    fn on_gameover(ctx: &mut AgentContext<P, R>, event: &SystemEvent) -> HandlerResult<P, R> {
        let SystemEvent::GameOver(result) = event else {
            return Err(payload_mismatch("gameover"));
        };
        ctx.player
            .lock_named("player")?
            .game_over(*result)
            .map_err(HandlerError::Player)?;
        ctx.position = None;
        ctx.session.update(|s| s.phase = Phase::GameOver)?;
        info!(result = ?result, "game over");
        Ok(Flow::Continue)
    }

    fn on_quit(ctx: &mut AgentContext<P, R>, _: &SystemEvent) -> HandlerResult<P, R> {
        ctx.player
            .lock_named("player")?
            .quit()
            .map_err(HandlerError::Player)?;
        ctx.session.update(|s| s.phase = Phase::Quit)?;
        Ok(Flow::Stop)
    }
}
