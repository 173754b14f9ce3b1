//! # washQ Runtime
//!
//! [`Store`] owns a reducer's state, applies actions to it and performs the
//! effects the reducer returns. Actions produced by effects go back through
//! the reducer.
//!
//! ## Example
//!
//! ```ignore
//! use washq_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//!
//! // Send an action; effects have finished when this returns
//! store.send(Action::DoSomething).await?;
//!
//! // Read state
//! let value = store.state(|s| s.some_field).await;
//! ```

use washq_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use tokio::sync::RwLock;

pub use error::StoreError;
pub use store::Store;

/// Store errors.
pub mod error {
    use thiserror::Error;

    /// Why a store refused an action.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// `shutdown` was called; no further actions are accepted.
        #[error("Store is shutting down")]
        ShutdownInProgress,
    }
}

/// The store.
pub mod store {
    use super::{Arc, Effect, Reducer, RwLock, StoreError};
    use futures::future::{join_all, BoxFuture};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Runs one reducer over its state.
    ///
    /// `send()` returns once every effect it triggered, including effects of
    /// fed-back actions, has finished. Clones share the same state.
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: Arc<R>,
        environment: Arc<E>,
        shutdown: Arc<AtomicBool>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Store starting from `initial_state`.
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer: Arc::new(reducer),
                environment: Arc::new(environment),
                shutdown: Arc::new(AtomicBool::new(false)),
            }
        }

        /// Apply `action`, then run the effects it produced.
        ///
        /// The state lock is released before effects run.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<(), StoreError> {
            if self.shutdown.load(Ordering::Acquire) {
                return Err(StoreError::ShutdownInProgress);
            }

            let effects = {
                let mut state = self.state.write().await;
                self.reducer.reduce(&mut state, action, &self.environment)
            };

            for effect in effects {
                self.execute_effect(effect).await;
            }
            Ok(())
        }

        /// Read the current state through a closure
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&state)
        }

        /// Stop accepting new actions
        pub fn shutdown(&self) {
            tracing::info!("Store shutting down");
            self.shutdown.store(true, Ordering::Release);
        }

        /// Execute a single effect, feeding produced actions back into the store
        fn execute_effect(&self, effect: Effect<A>) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                match effect {
                    Effect::None => {
                        metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                    },
                    Effect::Future(fut) => {
                        tracing::trace!("Executing Effect::Future");
                        metrics::counter!("store.effects.executed", "type" => "future")
                            .increment(1);
                        if let Some(action) = fut.await {
                            self.feed_back(action).await;
                        }
                    },
                    Effect::Parallel(effects) => {
                        tracing::trace!(count = effects.len(), "Executing Effect::Parallel");
                        metrics::counter!("store.effects.executed", "type" => "parallel")
                            .increment(1);
                        join_all(effects.into_iter().map(|e| self.execute_effect(e))).await;
                    },
                }
            })
        }

        async fn feed_back(&self, action: A) {
            if let Err(error) = self.send(action).await {
                tracing::warn!(%error, "Dropped action produced by effect");
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: Arc::clone(&self.reducer),
                environment: Arc::clone(&self.environment),
                shutdown: Arc::clone(&self.shutdown),
            }
        }
    }
}
