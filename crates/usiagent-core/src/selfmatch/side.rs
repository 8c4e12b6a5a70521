//! Side threads and their cleanup.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, SendError, Sender};
use tracing::{debug, warn};
use uuid::Uuid;

use super::message::{RelaySink, SelfMatchMessage};
use crate::config::AgentConfig;
use crate::error::PlayerError;
use crate::event::{AgentInput, Side, UserEvent};
use crate::player::Player;
use crate::report::{emit_side_detached, ErrorReporter};
use crate::rules::RuleEngine;
use crate::runtime::{AgentRuntime, StopHandle};

/// Sends `Panicked` if the side thread unwinds.
struct PanicGuard<E: PlayerError> {
    side: Side,
    messages: Sender<SelfMatchMessage<E>>,
}

impl<E: PlayerError> Drop for PanicGuard<E> {
    fn drop(&mut self) {
        if thread::panicking() {
            let _ = self
                .messages
                .send(SelfMatchMessage::Panicked { side: self.side });
        }
    }
}

/// The relay's handle on one side's runtime thread.
pub(crate) struct SideHandle {
    pub(crate) side: Side,
    input: Sender<AgentInput>,
    stop: StopHandle,
    join: Option<JoinHandle<()>>,
    /// Set once the side reported `Finished` or `Panicked`.
    pub(crate) finished: bool,
}

impl SideHandle {
    pub(crate) fn spawn<P, R>(
        side: Side,
        player: P,
        rules: Arc<R>,
        config: AgentConfig,
        messages: Sender<SelfMatchMessage<P::Error>>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> io::Result<Self>
    where
        P: Player<R>,
        R: RuleEngine,
    {
        let (input, mut source) = unbounded::<AgentInput>();
        let runtime = AgentRuntime::new(player, rules, config).with_reporter(reporter);
        let stop = runtime.stop_handle();

        let join = thread::Builder::new()
            .name(format!("usiagent-{side}"))
            .spawn(move || {
                let _guard = PanicGuard {
                    side,
                    messages: messages.clone(),
                };
                let result = runtime.start(&mut source, RelaySink::new(side, messages.clone()));
                debug!(side = %side, ok = result.is_ok(), "side runtime returned");
                let _ = messages.send(SelfMatchMessage::Finished { side, result });
            })?;

        Ok(Self {
            side,
            input,
            stop,
            join: Some(join),
            finished: false,
        })
    }

    pub(crate) fn send(&self, input: AgentInput) -> Result<(), SendError<AgentInput>> {
        self.input.send(input)
    }

    /// Queues a `quit` for the runtime. Falls back to the stop flag when the
    /// input channel is already gone.
    pub(crate) fn request_stop(&self) {
        if self.input.send(AgentInput::User(UserEvent::Quit)).is_err() {
            debug!(side = %self.side, "side input already closed");
            self.stop.request_stop();
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.join.take() {
            if handle.join().is_err() {
                warn!(side = %self.side, "side thread panicked");
            }
        }
    }

    /// Leaves the thread running. Its runtime is told to stop so that its
    /// failure to reach the relay afterwards is not reported.
    fn detach(&mut self) {
        self.stop.request_stop();
        self.join.take();
    }
}

/// Stops every live side, waits up to `timeout` for them to report, joins
/// those that did and detaches the rest.
pub(crate) fn shutdown<E: PlayerError>(
    sides: &mut [SideHandle],
    messages: &Receiver<SelfMatchMessage<E>>,
    timeout: Duration,
    match_id: &Uuid,
) {
    for side in sides.iter().filter(|s| !s.finished) {
        side.request_stop();
    }

    let deadline = Instant::now() + timeout;
    while sides.iter().any(|s| !s.finished) {
        match messages.recv_deadline(deadline) {
            Ok(SelfMatchMessage::Finished { side, result }) => {
                if let Err(e) = result {
                    debug!(side = %side, error = %e, "side ended with error during shutdown");
                }
                mark_finished(sides, side);
            }
            Ok(SelfMatchMessage::Panicked { side }) => {
                warn!(side = %side, "side panicked during shutdown");
                mark_finished(sides, side);
            }
            Ok(SelfMatchMessage::Output { .. }) => {}
            Err(RecvTimeoutError::Timeout) => break,
            // Every sender lives on a side thread; all of them are gone.
            Err(RecvTimeoutError::Disconnected) => {
                sides.iter_mut().for_each(|s| s.finished = true);
                break;
            }
        }
    }

    for side in sides.iter_mut() {
        if side.finished {
            side.join();
        } else {
            emit_side_detached(match_id, side.side);
            side.detach();
        }
    }
}

fn mark_finished(sides: &mut [SideHandle], side: Side) {
    if let Some(handle) = sides.iter_mut().find(|s| s.side == side) {
        handle.finished = true;
    }
}
