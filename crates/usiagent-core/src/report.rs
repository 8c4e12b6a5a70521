//! Error reporting and structured lifecycle events.
//!
//! The library never installs a subscriber or a global reporter. Callers
//! hand an [`ErrorReporter`] to the runtime and the self-match orchestrator;
//! [`TracingReporter`] is the default.

use std::error::Error;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::event::{GameEndState, Side};
use crate::moves::Move;

/// Receives fully chained errors for display.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &(dyn Error + 'static));
}

/// Renders an error and every `source()` below it, one cause per line,
/// indented by depth.
pub fn render_chain(error: &(dyn Error + 'static)) -> String {
    let mut out = error.to_string();
    let mut cause = error.source();
    let mut depth = 1;
    while let Some(e) = cause {
        out.push('\n');
        out.push_str(&"  ".repeat(depth));
        out.push_str("caused by: ");
        out.push_str(&e.to_string());
        cause = e.source();
        depth += 1;
    }
    out
}

/// Reports errors as a single `error!` event carrying the rendered chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &(dyn Error + 'static)) {
        error!(error = %error, chain = %render_chain(error), "operation failed");
    }
}

/// Runs `f` and reports its error, if any, before handing it back.
pub fn sandboxed<T, E, F>(reporter: &dyn ErrorReporter, f: F) -> Result<T, E>
where
    E: Error + 'static,
    F: FnOnce() -> Result<T, E>,
{
    let result = f();
    if let Err(e) = &result {
        reporter.report(e);
    }
    result
}

/// RAII guard that enters a match-scoped span.
///
/// ```ignore
/// let _span = MatchSpan::enter(&match_id);
/// // events emitted here carry match_id
/// ```
pub struct MatchSpan {
    _span: tracing::span::EnteredSpan,
}

impl MatchSpan {
    pub fn enter(match_id: &Uuid) -> Self {
        let span = tracing::info_span!("usiagent.selfmatch", match_id = %match_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// A self-match has started and will play up to `games` games.
///
/// # Example
///
/// ```
/// use usiagent_core::emit_match_started;
///
/// let match_id = uuid::Uuid::new_v4();
/// emit_match_started(&match_id, 4);
/// ```
pub fn emit_match_started(match_id: &Uuid, games: u32) {
    info!(event = "match.started", match_id = %match_id, games = games);
}

/// Game `game` (zero-based) has started with `black` to move first.
pub fn emit_game_started(match_id: &Uuid, game: u32, black: Side) {
    info!(event = "game.started", match_id = %match_id, game = game, black = %black);
}

/// A move passed the rule engine and was appended to the record.
pub fn emit_move_applied(match_id: &Uuid, game: u32, ply: u32, side: Side, mv: &Move) {
    info!(
        event = "game.move_applied",
        match_id = %match_id,
        game = game,
        ply = ply,
        side = %side,
        mv = %mv,
    );
}

/// A game ended after `plies` moves. `end` is `None` for an abandoned game.
pub fn emit_game_finished(match_id: &Uuid, game: u32, plies: u32, end: Option<&GameEndState>) {
    info!(
        event = "game.finished",
        match_id = %match_id,
        game = game,
        plies = plies,
        end = ?end,
    );
}

/// The match is over and both sides have been joined or detached.
///
/// # Example
///
/// ```
/// use usiagent_core::emit_match_finished;
///
/// let match_id = uuid::Uuid::new_v4();
/// emit_match_finished(&match_id, 4, 1_250, true);
/// ```
pub fn emit_match_finished(match_id: &Uuid, games: u32, duration_ms: u64, success: bool) {
    info!(
        event = "match.finished",
        match_id = %match_id,
        games = games,
        duration_ms = duration_ms,
        success = success,
    );
}

/// A side thread did not finish within the join timeout and was left running.
pub fn emit_side_detached(match_id: &Uuid, side: Side) {
    warn!(event = "match.side_detached", match_id = %match_id, side = %side);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collecting(Mutex<Vec<String>>);

    impl ErrorReporter for Collecting {
        fn report(&self, error: &(dyn Error + 'static)) {
            self.0.lock().unwrap().push(render_chain(error));
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("outer")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn render_chain_indents_each_cause() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "inner"));
        assert_eq!(render_chain(&err), "outer\n  caused by: inner");
    }

    #[test]
    fn sandboxed_reports_errors_and_passes_them_through() {
        let reporter = Collecting::default();
        let result: Result<(), Outer> = sandboxed(&reporter, || {
            Err(Outer(std::io::Error::new(std::io::ErrorKind::Other, "boom")))
        });
        assert!(result.is_err());
        assert_eq!(reporter.0.lock().unwrap().len(), 1);

        let ok: Result<u8, Outer> = sandboxed(&reporter, || Ok(7));
        assert_eq!(ok.unwrap(), 7);
        assert_eq!(reporter.0.lock().unwrap().len(), 1);
    }

    #[tracing_test::traced_test]
    #[test]
    fn tracing_reporter_logs_the_chain() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        TracingReporter.report(&err);
        assert!(logs_contain("operation failed"));
        assert!(logs_contain("caused by: disk gone"));
    }

    #[tracing_test::traced_test]
    #[test]
    fn lifecycle_events_carry_event_names() {
        let id = Uuid::nil();
        emit_game_finished(&id, 3, 12, Some(&GameEndState::MaxPlies));
        emit_side_detached(&id, Side::Player2);
        assert!(logs_contain("game.finished"));
        assert!(logs_contain("plies=12"));
        assert!(logs_contain("match.side_detached"));
    }
}
