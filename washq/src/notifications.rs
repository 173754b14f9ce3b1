//! Notification watcher.
//!
//! Compares successive machine snapshots and raises "your machine is ready"
//! exactly once when the machine the user is booked on goes from `running`
//! to `available`.
//!
//! The decision is a pure reducer; delivering the notification is an effect
//! executed by the [`Store`] runtime against the injected [`Notifier`].
//! Snapshots carry the registry version they were read at, and a snapshot
//! older than the last one observed is dropped.

use crate::metrics;
use crate::providers::notifier::{Notification, Notifier};
use crate::types::{Machine, MachineId, MachineStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use washq_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
use washq_runtime::{Store, StoreError};

/// State kept between observation cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherState {
    snapshot: HashMap<MachineId, MachineStatus>,
    version: u64,
    previous_booking: Option<MachineId>,
    primed: bool,
    delivered: u64,
}

impl WatcherState {
    /// A watcher that has observed nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether at least one snapshot has been observed.
    #[must_use]
    pub const fn is_primed(&self) -> bool {
        self.primed
    }

    /// Status of a machine in the last observed snapshot.
    #[must_use]
    pub fn status_of(&self, machine_id: &MachineId) -> Option<MachineStatus> {
        self.snapshot.get(machine_id).copied()
    }

    /// Registry version of the last observed snapshot.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Notifications delivered so far.
    #[must_use]
    pub const fn delivered(&self) -> u64 {
        self.delivered
    }
}

/// Inputs to the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherAction {
    /// One update cycle: the current machines and the user's active booking.
    Observe {
        /// Registry version the snapshot was read at
        version: u64,
        /// Current machine snapshot
        machines: Vec<Machine>,
        /// Machine the current user is booked on
        active_booking: Option<MachineId>,
    },
    /// A notification was handed to the notifier.
    Delivered {
        /// Machine the notification was about
        machine_id: MachineId,
    },
}

/// Dependencies of the watcher.
#[derive(Clone)]
pub struct WatcherEnvironment {
    /// Where notifications go.
    pub notifier: Arc<dyn Notifier>,
}

/// Pure decision logic of the watcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatcherReducer;

impl WatcherReducer {
    /// Create the reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Reducer for WatcherReducer {
    type State = WatcherState;
    type Action = WatcherAction;
    type Environment = WatcherEnvironment;

    fn reduce(
        &self,
        state: &mut WatcherState,
        action: WatcherAction,
        env: &WatcherEnvironment,
    ) -> SmallVec<[Effect<WatcherAction>; 4]> {
        match action {
            WatcherAction::Observe {
                version,
                machines,
                active_booking,
            } => {
                if state.primed && version < state.version {
                    debug!(version, latest = state.version, "Stale snapshot dropped");
                    return SmallVec::new();
                }

                // The booking may have been released by the same completion
                // that freed the machine, so the previous cycle's booking counts too.
                let watched = |id: &MachineId| {
                    active_booking.as_ref() == Some(id)
                        || state.previous_booking.as_ref() == Some(id)
                };

                let deliveries: Vec<_> = machines
                    .iter()
                    .filter(|m| {
                        state.snapshot.get(&m.id) == Some(&MachineStatus::Running)
                            && m.status == MachineStatus::Available
                            && watched(&m.id)
                    })
                    .map(|machine| {
                        info!(machine_id = %machine.id, "Machine ready for user");
                        deliver(env, Notification::machine_ready(machine))
                    })
                    .collect();

                state.snapshot = machines.iter().map(|m| (m.id.clone(), m.status)).collect();
                state.version = version;
                state.previous_booking = active_booking;
                state.primed = true;

                if deliveries.is_empty() {
                    SmallVec::new()
                } else {
                    smallvec![Effect::merge(deliveries)]
                }
            },
            WatcherAction::Delivered { machine_id } => {
                state.delivered += 1;
                debug!(machine_id = %machine_id, "Notification delivered");
                SmallVec::new()
            },
        }
    }
}

fn deliver(env: &WatcherEnvironment, notification: Notification) -> Effect<WatcherAction> {
    let notifier = Arc::clone(&env.notifier);
    Effect::Future(Box::pin(async move {
        let machine_id = notification.machine_id.clone();
        notifier.notify(notification).await;
        metrics::record_notification_sent();
        Some(WatcherAction::Delivered { machine_id })
    }))
}

/// Runs the watcher reducer on the store runtime.
#[derive(Clone)]
pub struct NotificationWatcher {
    store: Store<WatcherState, WatcherAction, WatcherEnvironment, WatcherReducer>,
}

impl NotificationWatcher {
    /// Create a watcher delivering to `notifier`.
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store: Store::new(
                WatcherState::new(),
                WatcherReducer::new(),
                WatcherEnvironment { notifier },
            ),
        }
    }

    /// Feed one update cycle. Notifications have been delivered when this returns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`Self::shutdown`].
    pub async fn observe(
        &self,
        version: u64,
        machines: Vec<Machine>,
        active_booking: Option<MachineId>,
    ) -> Result<(), StoreError> {
        self.store
            .send(WatcherAction::Observe {
                version,
                machines,
                active_booking,
            })
            .await
    }

    /// Notifications delivered so far.
    pub async fn delivered(&self) -> u64 {
        self.store.state(WatcherState::delivered).await
    }

    /// Stop observing.
    pub fn shutdown(&self) {
        self.store.shutdown();
    }
}
