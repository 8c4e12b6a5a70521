//! Per-color game clock for timed matches.

use std::time::Duration;

use crate::event::GoLimit;
use crate::moves::Color;

/// Remaining thinking time of both colors during one game.
///
/// Only [`GoLimit::Timed`] runs a clock. Under any other limit turns have no
/// allowance and `go` is sent unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GameClock {
    limit: GoLimit,
}

impl GameClock {
    pub(crate) fn new(limit: &GoLimit) -> Self {
        Self {
            limit: limit.clone(),
        }
    }

    /// The limit to send with the next `go`, carrying both remaining times.
    pub(crate) fn go_limit(&self) -> GoLimit {
        self.limit.clone()
    }

    pub(crate) fn remaining_ms(&self, color: Color) -> Option<u64> {
        match &self.limit {
            GoLimit::Timed {
                black_ms, white_ms, ..
            } => Some(match color {
                Color::Black => *black_ms,
                Color::White => *white_ms,
            }),
            _ => None,
        }
    }

    /// Longest `color` may think this turn: the remaining time plus byoyomi
    /// and its increment.
    pub(crate) fn allowance(&self, color: Color) -> Option<Duration> {
        let GoLimit::Timed {
            black_ms,
            white_ms,
            byoyomi_ms,
            black_inc_ms,
            white_inc_ms,
        } = &self.limit
        else {
            return None;
        };
        let (remaining, inc) = match color {
            Color::Black => (*black_ms, *black_inc_ms),
            Color::White => (*white_ms, *white_inc_ms),
        };
        Some(Duration::from_millis(
            remaining.saturating_add(*byoyomi_ms).saturating_add(inc),
        ))
    }

    /// Deducts a finished turn. Time used beyond the remaining time came out
    /// of byoyomi and leaves the clock at zero; otherwise the increment is
    /// added back.
    pub(crate) fn charge(&mut self, color: Color, used: Duration) {
        let GoLimit::Timed {
            black_ms,
            white_ms,
            black_inc_ms,
            white_inc_ms,
            ..
        } = &mut self.limit
        else {
            return;
        };
        let (remaining, inc) = match color {
            Color::Black => (black_ms, *black_inc_ms),
            Color::White => (white_ms, *white_inc_ms),
        };
        let used = u64::try_from(used.as_millis()).unwrap_or(u64::MAX);
        *remaining = remaining
            .checked_sub(used)
            .map_or(0, |left| left.saturating_add(inc));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed(black_ms: u64, white_ms: u64, byoyomi_ms: u64, inc_ms: u64) -> GameClock {
        GameClock::new(&GoLimit::Timed {
            black_ms,
            white_ms,
            byoyomi_ms,
            black_inc_ms: inc_ms,
            white_inc_ms: inc_ms,
        })
    }

    #[test]
    fn untimed_limits_have_no_allowance() {
        let mut clock = GameClock::new(&GoLimit::Infinite);
        assert_eq!(clock.allowance(Color::Black), None);
        clock.charge(Color::Black, Duration::from_secs(60));
        assert_eq!(clock.go_limit(), GoLimit::Infinite);
        assert_eq!(clock.remaining_ms(Color::White), None);
    }

    #[test]
    fn allowance_adds_byoyomi_to_remaining_time() {
        let clock = timed(3_000, 1_000, 500, 0);
        assert_eq!(clock.allowance(Color::Black), Some(Duration::from_millis(3_500)));
        assert_eq!(clock.allowance(Color::White), Some(Duration::from_millis(1_500)));
    }

    #[test]
    fn charge_deducts_and_adds_the_increment() {
        let mut clock = timed(10_000, 10_000, 0, 2_000);
        clock.charge(Color::White, Duration::from_millis(3_000));
        assert_eq!(clock.remaining_ms(Color::White), Some(9_000));
        assert_eq!(clock.remaining_ms(Color::Black), Some(10_000));
        assert_eq!(
            clock.go_limit(),
            GoLimit::Timed {
                black_ms: 10_000,
                white_ms: 9_000,
                byoyomi_ms: 0,
                black_inc_ms: 2_000,
                white_inc_ms: 2_000,
            }
        );
    }

    #[test]
    fn overrunning_into_byoyomi_empties_the_clock() {
        let mut clock = timed(1_000, 1_000, 5_000, 0);
        clock.charge(Color::Black, Duration::from_millis(2_500));
        assert_eq!(clock.remaining_ms(Color::Black), Some(0));
        assert_eq!(clock.allowance(Color::Black), Some(Duration::from_millis(5_000)));
    }
}
