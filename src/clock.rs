//! Process-wide clock capability (spec.md §4.1, §9).
//!
//! All wall-clock reads and sleeps in the agent/worker loop go through this
//! trait so that tests can run synchronously instead of waiting out real
//! backoff windows. Production code is wired to [`SystemClock`]; tests inject
//! [`FrozenClock`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// A source of time and a way to suspend for a duration.
#[async_trait::async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// The real wall clock, backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock whose `now()` is fixed until explicitly advanced, and whose
/// `sleep()` advances the fixed time instead of waiting. Used by unit tests
/// that must assert on postpone/backoff arithmetic without real delays.
#[derive(Debug, Clone)]
pub struct FrozenClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FrozenClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("FrozenClock mutex poisoned");
        *now += chrono::Duration::from_std(by).expect("duration too large for chrono");
    }
}

#[async_trait::async_trait]
impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("FrozenClock mutex poisoned")
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frozen_clock_sleep_advances_now() {
        let start = Utc::now();
        let clock = FrozenClock::new(start);
        clock.sleep(Duration::from_secs(30)).await;
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));
    }
}
