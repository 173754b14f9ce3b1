//! # washQ Core
//!
//! Core traits and types shared by the washQ crates.
//!
//! Decisions that can be made without I/O live in reducers. A reducer mutates
//! its state and describes follow-up work as [`effect::Effect`] values; the
//! runtime crate performs that work and feeds any resulting action back in.
//! Collaborators a reducer needs (clock, notifier) arrive through its
//! environment.
//!
//! ## Example
//!
//! ```ignore
//! use washq_core::{effect::Effect, reducer::Reducer, SmallVec};
//!
//! impl Reducer for WatcherReducer {
//!     type State = WatcherState;
//!     type Action = WatcherAction;
//!     type Environment = WatcherEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut WatcherState,
//!         action: WatcherAction,
//!         env: &WatcherEnvironment,
//!     ) -> SmallVec<[Effect<WatcherAction>; 4]> {
//!         SmallVec::new()
//!     }
//! }
//! ```

pub use chrono::{DateTime, Utc};
pub use smallvec::{smallvec, SmallVec};

/// State transitions.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// Applies actions to a state.
    ///
    /// `reduce` must not perform I/O itself; anything asynchronous is
    /// returned as an effect.
    pub trait Reducer {
        /// State owned by the store.
        type State;

        /// Inputs, including the ones effects feed back.
        type Action;

        /// Collaborators available while reducing and inside effects.
        type Environment;

        /// Apply `action` to `state` and return the work it triggers.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Deferred work returned by reducers.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Work for the store to run after a reducer returns.
    pub enum Effect<Action> {
        /// Nothing to do.
        None,

        /// Run all, concurrently.
        Parallel(Vec<Effect<Action>>),

        /// Async work; a returned action is sent back to the store.
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => f.write_str("Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Future(_) => f.write_str("Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Run `effects` concurrently. A single effect is returned as is.
        #[must_use]
        pub fn merge(mut effects: Vec<Effect<Action>>) -> Effect<Action> {
            match effects.len() {
                0 => Effect::None,
                1 => effects.remove(0),
                _ => Effect::Parallel(effects),
            }
        }

        /// Whether this is [`Effect::None`].
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Collaborators shared by reducers and services.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Source of the current time. Tests pin it.
    ///
    /// # Examples
    ///
    /// ```
    /// use washq_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Current instant in UTC.
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn merge_collapses_small_groups() {
        let empty: Effect<()> = Effect::merge(Vec::new());
        assert!(empty.is_none());

        let single: Effect<u8> = Effect::merge(vec![Effect::Future(Box::pin(async { Some(1) }))]);
        let Effect::Future(fut) = single else {
            unreachable!("a lone effect is not wrapped");
        };
        assert_eq!(tokio_test::block_on(fut), Some(1));

        let merged: Effect<()> = Effect::merge(vec![Effect::None, Effect::None]);
        assert!(matches!(merged, Effect::Parallel(ref inner) if inner.len() == 2));
    }

    #[test]
    fn debug_output_hides_future_body() {
        let effect: Effect<u8> = Effect::Future(Box::pin(async { None }));
        assert_eq!(format!("{effect:?}"), "Effect::Future(<future>)");
        assert!(Effect::<u8>::None.is_none());
    }
}
