use crossbeam_channel::Sender;

use crate::error::{EmitError, PlayerError, RunningError};
use crate::event::Side;
use crate::protocol::{AgentOutput, OutputSink};
use crate::runtime::RunOutcome;

/// What a side thread reports to the relay.
#[derive(Debug)]
pub enum SelfMatchMessage<E: PlayerError> {
    Output { side: Side, output: AgentOutput },
    /// The side's runtime returned. Sent once, as the thread's last act.
    Finished {
        side: Side,
        result: Result<RunOutcome, RunningError<E>>,
    },
    /// The side's thread is unwinding.
    Panicked { side: Side },
}

/// Output sink of a side runtime: forwards every output to the relay.
pub(crate) struct RelaySink<E: PlayerError> {
    side: Side,
    tx: Sender<SelfMatchMessage<E>>,
}

impl<E: PlayerError> RelaySink<E> {
    pub(crate) fn new(side: Side, tx: Sender<SelfMatchMessage<E>>) -> Self {
        Self { side, tx }
    }
}

impl<E: PlayerError> OutputSink for RelaySink<E> {
    fn emit(&mut self, output: AgentOutput) -> Result<(), EmitError> {
        self.tx
            .send(SelfMatchMessage::Output {
                side: self.side,
                output,
            })
            .map_err(|_| EmitError::Closed)
    }
}
