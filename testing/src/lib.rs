//! # washQ Testing
//!
//! Testing utilities for the washQ crates.
//!
//! This crate provides:
//! - `ReducerTest`, a Given-When-Then harness for reducers
//! - Effect assertion helpers
//! - Deterministic clocks
//!
//! ## Example
//!
//! ```ignore
//! use washq_testing::{test_clock, ReducerTest};
//!
//! ReducerTest::new(WatcherReducer::new())
//!     .with_env(test_environment())
//!     .given_state(WatcherState::new())
//!     .when_action(WatcherAction::Observe { .. })
//!     .then_state(|state| assert!(state.is_primed()))
//!     .run();
//! ```

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use washq_core::environment::Clock;


/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Duration, Mutex, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use washq_testing::mocks::FixedClock;
    /// use washq_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that advances by a fixed step on every read
    ///
    /// Useful where ordering by timestamp matters (creation order, newest-first lists).
    #[derive(Debug)]
    pub struct SteppingClock {
        next: Mutex<DateTime<Utc>>,
        step: Duration,
    }

    impl SteppingClock {
        /// Start at `start`, advancing by `step` after each `now()`
        #[must_use]
        pub const fn new(start: DateTime<Utc>, step: Duration) -> Self {
            Self {
                next: Mutex::new(start),
                step,
            }
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            // A poisoned lock still holds a valid timestamp
            let mut next = self
                .next
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let current = *next;
            *next = current + self.step;
            current
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(epoch())
    }

    /// Create a stepping clock for tests starting at 2025-01-01, one second per read
    #[must_use]
    pub fn stepping_clock() -> SteppingClock {
        SteppingClock::new(epoch(), Duration::seconds(1))
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }
}

// Re-export commonly used items
pub use mocks::{stepping_clock, test_clock, FixedClock, SteppingClock};
pub use reducer_test::{assertions, ReducerTest};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(time1.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_stepping_clock_advances() {
        let clock = stepping_clock();
        let first = clock.now();
        let second = clock.now();
        assert_eq!(second - first, Duration::seconds(1));
    }
}
