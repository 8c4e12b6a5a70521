//! Kind-indexed event dispatcher.
//!
//! Handlers live in one `Vec` slot per event kind, sized from
//! [`KindIndex::cardinality`]. A dispatch takes the context lock once, runs
//! every handler for the event's kind in registration order and stops at the
//! first failure.
//!
//! A handler that panics poisons the context lock. The next dispatch of any
//! kind, claimed or not, observes the poisoning, reports it and halts the
//! dispatcher for good; it never runs handlers against a context left
//! half-updated.
//!
//! Once handlers are removed from the registry before they run, so each runs
//! at most once even under concurrent dispatch. If an earlier handler fails,
//! the once handlers that did not start stay registered.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::{DispatchError, HandlerError, LockExt, PlayerError, PoisonedLock};
use crate::kind::{KindIndex, MapEventKind};

/// What a handler asks of the loop driving the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No handler is registered for the event's kind.
    Unclaimed,
    Continue,
    /// At least one handler returned [`Flow::Stop`].
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Running,
    Stopped,
}

impl DispatcherState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DispatcherState::Idle,
            1 => DispatcherState::Running,
            _ => DispatcherState::Stopped,
        }
    }
}

pub type Handler<C, Ev, E> =
    Arc<dyn Fn(&mut C, &Ev) -> Result<Flow, HandlerError<E>> + Send + Sync>;

struct Registry<C, Ev, E: PlayerError> {
    handlers: Vec<Vec<Handler<C, Ev, E>>>,
    once: Vec<Vec<Handler<C, Ev, E>>>,
}

/// Routes events of kind `K` and payload `Ev` to handlers over a shared
/// context `C`.
pub struct EventDispatcher<K, Ev, C, E: PlayerError> {
    registry: Mutex<Registry<C, Ev, E>>,
    context: Mutex<C>,
    state: AtomicU8,
    halted: AtomicBool,
    _kind: PhantomData<fn() -> K>,
}

impl<K, Ev, C, E> EventDispatcher<K, Ev, C, E>
where
    K: KindIndex,
    Ev: MapEventKind<K>,
    E: PlayerError,
{
    pub fn new(context: C) -> Self {
        let slots = K::cardinality();
        Self {
            registry: Mutex::new(Registry {
                handlers: (0..slots).map(|_| Vec::new()).collect(),
                once: (0..slots).map(|_| Vec::new()).collect(),
            }),
            context: Mutex::new(context),
            state: AtomicU8::new(0),
            halted: AtomicBool::new(false),
            _kind: PhantomData,
        }
    }

    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Appends a persistent handler for `kind`.
    pub fn register<F>(&self, kind: K, handler: F) -> Result<(), DispatchError<E>>
    where
        F: Fn(&mut C, &Ev) -> Result<Flow, HandlerError<E>> + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let mut registry = self.lock_registry()?;
        registry.handlers[kind.index()].push(Arc::new(handler));
        Ok(())
    }

    /// Appends a handler that runs on the next dispatch of `kind` only, after
    /// the persistent handlers.
    pub fn register_once<F>(&self, kind: K, handler: F) -> Result<(), DispatchError<E>>
    where
        F: Fn(&mut C, &Ev) -> Result<Flow, HandlerError<E>> + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let mut registry = self.lock_registry()?;
        registry.once[kind.index()].push(Arc::new(handler));
        Ok(())
    }

    /// Number of handlers currently registered for `kind`.
    pub fn handler_count(&self, kind: K) -> Result<usize, DispatchError<E>> {
        let registry = self.lock_registry()?;
        let i = kind.index();
        Ok(registry.handlers[i].len() + registry.once[i].len())
    }

    pub fn dispatch(&self, event: &Ev) -> Result<DispatchOutcome, DispatchError<E>> {
        self.ensure_open()?;
        let _ = self.state.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire);

        let kind = event.event_kind();
        let slot = kind.index();
        // Once handlers leave the registry under the lock; a concurrent
        // dispatch of the same kind sees an empty slot.
        let (persistent, mut once) = {
            let mut registry = self.lock_registry()?;
            (
                registry.handlers[slot].clone(),
                std::mem::take(&mut registry.once[slot]),
            )
        };

        if persistent.is_empty() && once.is_empty() {
            debug!(kind = ?kind, "event unclaimed");
            return Ok(DispatchOutcome::Unclaimed);
        }

        let mut consumed = 0;
        let ran = self.run_handlers(event, &persistent, &once, &mut consumed);
        let restored = if consumed < once.len() {
            self.restore_once(slot, once.split_off(consumed))
        } else {
            Ok(())
        };
        let stop = ran?;
        restored?;

        debug!(kind = ?kind, handlers = persistent.len() + consumed, stop, "event dispatched");
        Ok(if stop {
            DispatchOutcome::Stop
        } else {
            DispatchOutcome::Continue
        })
    }

    /// Runs `f` against the context outside of any dispatch.
    pub fn with_context<T>(&self, f: impl FnOnce(&mut C) -> T) -> Result<T, DispatchError<E>> {
        if self.is_halted() {
            return Err(DispatchError::Halted);
        }
        let mut context = self.lock_context()?;
        Ok(f(&mut *context))
    }

    /// Moves the dispatcher to `Stopped`. Later `register` and `dispatch`
    /// calls fail.
    pub fn stop(&self) {
        self.state.store(2, Ordering::Release);
    }

    fn ensure_open(&self) -> Result<(), DispatchError<E>> {
        if self.state() == DispatcherState::Stopped {
            return Err(DispatchError::Stopped);
        }
        if self.is_halted() {
            return Err(DispatchError::Halted);
        }
        if self.context.is_poisoned() {
            let cause = PoisonedLock {
                resource: "dispatch context",
            };
            self.halt(&cause);
            return Err(DispatchError::Poisoned(cause));
        }
        Ok(())
    }

    /// Runs persistent handlers, then once handlers, counting the once
    /// handlers that were started in `consumed`.
    fn run_handlers(
        &self,
        event: &Ev,
        persistent: &[Handler<C, Ev, E>],
        once: &[Handler<C, Ev, E>],
        consumed: &mut usize,
    ) -> Result<bool, DispatchError<E>> {
        let mut context = self.lock_context()?;
        let mut stop = false;
        for handler in persistent {
            if handler(&mut *context, event)? == Flow::Stop {
                stop = true;
            }
        }
        for handler in once {
            *consumed += 1;
            if handler(&mut *context, event)? == Flow::Stop {
                stop = true;
            }
        }
        Ok(stop)
    }

    /// Puts once handlers that never ran back ahead of any registered since.
    fn restore_once(
        &self,
        slot: usize,
        pending: Vec<Handler<C, Ev, E>>,
    ) -> Result<(), DispatchError<E>> {
        let mut registry = self.lock_registry()?;
        registry.once[slot].splice(0..0, pending);
        Ok(())
    }

    fn lock_context(&self) -> Result<std::sync::MutexGuard<'_, C>, DispatchError<E>> {
        self.context.lock_named("dispatch context").map_err(|e| {
            self.halt(&e);
            DispatchError::Poisoned(e)
        })
    }

    fn lock_registry(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Registry<C, Ev, E>>, DispatchError<E>> {
        self.registry.lock_named("handler registry").map_err(|e| {
            self.halt(&e);
            DispatchError::Poisoned(e)
        })
    }

    fn halt(&self, cause: &PoisonedLock) {
        if !self.halted.swap(true, Ordering::AcqRel) {
            warn!(resource = cause.resource, "dispatcher halted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{UserEvent, UserEventKind};
    use std::convert::Infallible;

    type TestDispatcher = EventDispatcher<UserEventKind, UserEvent, Vec<&'static str>, Infallible>;

    #[test]
    fn unregistered_kind_is_unclaimed() {
        let d = TestDispatcher::new(Vec::new());
        assert_eq!(d.dispatch(&UserEvent::Stop).unwrap(), DispatchOutcome::Unclaimed);
        assert_eq!(d.state(), DispatcherState::Running);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let d = TestDispatcher::new(Vec::new());
        d.register(UserEventKind::Stop, |log, _| {
            log.push("first");
            Ok(Flow::Continue)
        })
        .unwrap();
        d.register(UserEventKind::Stop, |log, _| {
            log.push("second");
            Ok(Flow::Continue)
        })
        .unwrap();

        assert_eq!(d.dispatch(&UserEvent::Stop).unwrap(), DispatchOutcome::Continue);
        assert_eq!(d.with_context(|log| log.clone()).unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn once_handlers_run_a_single_time() {
        let d = TestDispatcher::new(Vec::new());
        d.register_once(UserEventKind::Quit, |log, _| {
            log.push("once");
            Ok(Flow::Stop)
        })
        .unwrap();

        assert_eq!(d.dispatch(&UserEvent::Quit).unwrap(), DispatchOutcome::Stop);
        assert_eq!(d.dispatch(&UserEvent::Quit).unwrap(), DispatchOutcome::Unclaimed);
        assert_eq!(d.handler_count(UserEventKind::Quit).unwrap(), 0);
    }

    #[test]
    fn stopped_dispatcher_rejects_work() {
        let d = TestDispatcher::new(Vec::new());
        d.stop();
        assert!(matches!(
            d.dispatch(&UserEvent::Stop),
            Err(DispatchError::Stopped)
        ));
        assert!(matches!(
            d.register(UserEventKind::Stop, |_, _| Ok(Flow::Continue)),
            Err(DispatchError::Stopped)
        ));
    }
}
