//! Exponential backoff (spec.md §4.1).
//!
//! Two distinct schedules live here:
//!
//! - [`Backoff`]: the agent's inter-run sleep generator. Doubles on every
//!   call, clamps at a ceiling, and jitters by a fixed randomization factor.
//!   `reset()` returns it to the initial interval.
//! - [`review_backoff`]: the pure, unjittered task-postponement schedule
//!   (`review_after <- now + review_backoff(review_count)`).

use std::time::Duration;

use rand::Rng;

/// Jitter factor applied to every [`Backoff::next_backoff`] call (spec.md §4.1).
pub const JITTER_FACTOR: f64 = 0.33;

/// Agent inter-run backoff generator.
///
/// `NextBackOff` returns a duration in `[base * (1 - j), base * (1 + j)]`
/// where `base` doubles on each call (starting from `initial_interval`) and
/// clamps at `max_interval`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_interval: Duration,
    max_interval: Duration,
    jitter_factor: f64,
    current_base: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(initial_interval: Duration, max_interval: Duration, jitter_factor: f64) -> Self {
        Self {
            initial_interval,
            max_interval,
            jitter_factor,
            current_base: initial_interval,
        }
    }

    /// Reset to the initial interval (called after a successful, non-idle run).
    pub fn reset(&mut self) {
        self.current_base = self.initial_interval;
    }

    /// Advance the base (doubling, clamped at `max_interval`) and return a
    /// jittered duration drawn from `[base * (1 - j), base * (1 + j)]`.
    pub fn next_backoff(&mut self) -> Duration {
        let base = self.current_base;

        let next_base = base
            .checked_mul(2)
            .map_or(self.max_interval, |d| d.min(self.max_interval));
        self.current_base = next_base;

        jittered(base, self.jitter_factor)
    }
}

/// Draw a duration uniformly from `[base * (1 - j), base * (1 + j)]`.
fn jittered(base: Duration, jitter_factor: f64) -> Duration {
    let base_secs = base.as_secs_f64();
    let low = base_secs * (1.0 - jitter_factor);
    let high = base_secs * (1.0 + jitter_factor);
    let drawn = if high > low {
        rand::thread_rng().gen_range(low..=high)
    } else {
        base_secs
    };
    Duration::from_secs_f64(drawn.max(0.0))
}

/// Draw a uniform jitter in `[0, max)` for agent start-up desynchronization
/// (spec.md §4.7).
pub fn start_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..max.as_secs_f64()))
}

/// The task postponement schedule (spec.md §4.1, §8):
///
/// - `review_count < 0` -> `base`
/// - `review_count > 30` -> `max`
/// - otherwise -> `min(base * 2^review_count, max)`
///
/// No jitter is applied by this function.
#[must_use]
pub fn review_backoff(review_count: i64, base: Duration, max: Duration) -> Duration {
    if review_count < 0 {
        return base;
    }
    if review_count > 30 {
        return max;
    }

    let multiplier = 2f64.powi(review_count as i32);
    let scaled = base.as_secs_f64() * multiplier;
    Duration::from_secs_f64(scaled).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(5 * 60);
    const MAX: Duration = Duration::from_secs(24 * 3600);

    #[test]
    fn review_backoff_boundary_values() {
        assert_eq!(review_backoff(0, BASE, MAX), Duration::from_secs(5 * 60));
        assert_eq!(review_backoff(1, BASE, MAX), Duration::from_secs(10 * 60));
        assert_eq!(
            review_backoff(8, BASE, MAX),
            Duration::from_secs(21 * 3600 + 20 * 60)
        );
        assert_eq!(review_backoff(9, BASE, MAX), MAX);
        assert_eq!(review_backoff(31, BASE, MAX), MAX);
        assert_eq!(review_backoff(-1, BASE, MAX), BASE);
    }

    #[test]
    fn review_backoff_is_monotonic_and_saturates() {
        let mut prev = Duration::ZERO;
        for i in 0..=40 {
            let d = review_backoff(i, BASE, MAX);
            assert!(d >= prev, "backoff decreased at i={i}");
            assert!(d <= MAX);
            prev = d;
        }
        assert_eq!(review_backoff(40, BASE, MAX), MAX);
    }

    #[test]
    fn agent_backoff_reset_returns_to_initial() {
        let initial = Duration::from_secs(5);
        let max = Duration::from_secs(3600);
        let mut backoff = Backoff::new(initial, max, 0.33);

        let _ = backoff.next_backoff();
        let _ = backoff.next_backoff();
        backoff.reset();

        let d = backoff.next_backoff();
        assert!(d.as_secs_f64() >= initial.as_secs_f64() * (1.0 - 0.33) - 0.01);
        assert!(d.as_secs_f64() <= initial.as_secs_f64() * (1.0 + 0.33) + 0.01);
    }

    #[test]
    fn agent_backoff_doubles_and_clamps_at_max() {
        let initial = Duration::from_secs(5);
        let max = Duration::from_secs(12);
        let mut backoff = Backoff::new(initial, max, 0.0);

        // base sequence (unjittered since factor=0): 5, 10, 12 (clamped), 12, ...
        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
        assert_eq!(backoff.next_backoff(), max);
        assert_eq!(backoff.next_backoff(), max);
    }

    #[test]
    fn start_jitter_is_bounded() {
        let max = Duration::from_secs(60);
        for _ in 0..100 {
            let d = start_jitter(max);
            assert!(d < max);
        }
    }

    #[test]
    fn start_jitter_of_zero_is_zero() {
        assert_eq!(start_jitter(Duration::ZERO), Duration::ZERO);
    }
}
