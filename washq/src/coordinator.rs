//! Booking coordinator.
//!
//! Enforces one active booking per user and drives the machine transitions
//! for booking, starting and completing a wash.
//!
//! # Locking
//!
//! A per-user lock guards the check-then-commit of a user's booking and a
//! per-machine lock guards every read-modify-write of a machine. When both
//! are needed the user lock is taken first. Both only serialize work within
//! one process; bookings written by other clients of the same user are
//! reconciled against the store after the booking is written.

use crate::bookings::BookingLedger;
use crate::error::{Result, WashqError};
use crate::locks::KeyedLocks;
use crate::metrics;
use crate::providers::StoreError;
use crate::registry::MachineRegistry;
use crate::types::{Booking, Machine, MachineId, MachineStatus, UserId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{error, info, warn};

/// Coordinates bookings across the registry and the ledger.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BookingCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<MachineRegistry>,
    ledger: Arc<BookingLedger>,
    user_locks: KeyedLocks<UserId>,
    starting: Mutex<HashSet<MachineId>>,
    start_latency: Duration,
}

impl BookingCoordinator {
    /// Create a coordinator whose `start_wash` waits `start_latency`.
    #[must_use]
    pub fn new(
        registry: Arc<MachineRegistry>,
        ledger: Arc<BookingLedger>,
        start_latency: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                ledger,
                user_locks: KeyedLocks::new(),
                starting: Mutex::new(HashSet::new()),
                start_latency,
            }),
        }
    }

    /// Book a machine for a user.
    ///
    /// An available machine is claimed (`waiting`, queue of one); a waiting
    /// or running machine gains one more queued user.
    ///
    /// # Errors
    ///
    /// - [`WashqError::AlreadyBooked`] if the user already holds a booking
    /// - [`WashqError::NotFound`] if the machine or the user profile is missing
    /// - [`WashqError::Unavailable`] if the machine is out of order
    /// - [`WashqError::Persistence`] if a write failed; earlier writes are
    ///   rolled back
    #[tracing::instrument(skip(self), fields(user_id = %user_id, machine_id = %machine_id))]
    pub async fn book(&self, user_id: &UserId, machine_id: &MachineId) -> Result<Booking> {
        let result = self.try_book(user_id, machine_id).await;
        if let Err(error) = &result {
            metrics::record_booking_rejected(error);
            if error.is_expected() {
                warn!(%error, "Booking refused");
            } else {
                error!(%error, "Booking failed");
            }
        }
        result
    }

    async fn try_book(&self, user_id: &UserId, machine_id: &MachineId) -> Result<Booking> {
        let inner = &self.inner;
        let _user = inner.user_locks.lock(user_id).await;

        if let Some(existing) = inner.ledger.cached_active(user_id) {
            return Err(WashqError::AlreadyBooked { machine_id: existing });
        }

        let _machine = inner.registry.lock(machine_id).await;
        let original = inner.registry.load(machine_id).await?;

        let profile = inner
            .ledger
            .profile(user_id)
            .await?
            .ok_or_else(|| WashqError::NotFound {
                entity: "user",
                id: user_id.to_string(),
            })?;
        if let Some(existing) = profile.active_booking {
            return Err(WashqError::AlreadyBooked { machine_id: existing });
        }
        if let Some(existing) = inner.ledger.find_by_user(user_id).await? {
            return Err(WashqError::AlreadyBooked {
                machine_id: existing.machine_id,
            });
        }

        let mut machine = original.clone();
        let admission = machine.admit()?;

        let booking = inner
            .ledger
            .create(user_id, Some(profile.email), machine_id)
            .await?;

        // Another client of the same user may have booked concurrently; the
        // earliest booking holds and every later one backs out.
        if let Err(error) = self.ensure_earliest(&booking).await {
            self.discard_booking(&booking).await;
            return Err(error);
        }

        if let Err(error) = inner.registry.save(&machine).await {
            self.discard_booking(&booking).await;
            return Err(error);
        }

        if let Err(error) = inner.ledger.set_active_booking(user_id, Some(machine_id)).await {
            self.restore_machine(&original).await;
            self.discard_booking(&booking).await;
            return Err(error);
        }

        metrics::record_booking_created(admission);
        info!(
            booking_id = %booking.id,
            admission = admission.as_str(),
            status = %machine.status,
            queue = machine.queue_len(),
            "Booking committed"
        );
        Ok(booking)
    }

    /// Start the wash on a machine the user has claimed.
    ///
    /// The machine switches to `running` once the start latency has passed.
    /// The transition runs in its own task: dropping the returned future
    /// does not cancel it. Other operations on the machine, and clearing or
    /// leaving the user's booking, wait for it.
    ///
    /// # Errors
    ///
    /// - [`WashqError::Unavailable`] if the user's active booking is not this
    ///   machine or the machine is not `waiting`
    /// - [`WashqError::NotFound`] if the machine is missing
    /// - [`WashqError::Persistence`] if the store fails
    #[tracing::instrument(skip(self), fields(user_id = %user_id, machine_id = %machine_id))]
    pub async fn start_wash(&self, user_id: &UserId, machine_id: &MachineId) -> Result<Machine> {
        let inner = &self.inner;
        let user_guard = inner.user_locks.lock(user_id).await;
        let machine_guard = inner.registry.lock(machine_id).await;

        let machine = inner.registry.load(machine_id).await?;
        let active = inner
            .ledger
            .profile(user_id)
            .await?
            .and_then(|profile| profile.active_booking);
        if active.as_ref() != Some(machine_id) {
            warn!("Start refused: no booking on this machine");
            return Err(WashqError::Unavailable {
                machine_id: machine_id.clone(),
                reason: "you have no booking on this machine".to_string(),
            });
        }
        if machine.status != MachineStatus::Waiting {
            warn!(status = %machine.status, "Start refused: machine not waiting");
            return Err(WashqError::Unavailable {
                machine_id: machine_id.clone(),
                reason: format!("machine is {}", machine.status.label().to_lowercase()),
            });
        }

        inner.starting().insert(machine_id.clone());
        metrics::record_wash_starting();
        info!(latency_ms = inner.start_latency.as_millis(), "Wash starting");

        let task_inner = Arc::clone(inner);
        let task_user = user_id.clone();
        let task_machine = machine_id.clone();
        let task = tokio::spawn(async move {
            let _guards = (user_guard, machine_guard);
            tokio::time::sleep(task_inner.start_latency).await;
            let result = task_inner.finish_start(&task_user, &task_machine).await;
            task_inner.starting().remove(&task_machine);
            metrics::record_wash_start_settled(result.is_ok());
            result
        });

        task.await.unwrap_or_else(|join_error| {
            error!(%join_error, "Start task aborted");
            Err(WashqError::Persistence(StoreError::Rejected(format!(
                "start task aborted: {join_error}"
            ))))
        })
    }

    /// Delete the user's booking and clear their active-booking pointer.
    ///
    /// Succeeds without writes when the user holds no booking.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Persistence`] if the store fails.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn clear_active_booking(&self, user_id: &UserId) -> Result<Option<MachineId>> {
        let _user = self.inner.user_locks.lock(user_id).await;
        self.release_user(user_id).await
    }

    /// Leave the queue the user is in.
    ///
    /// Clears the booking and frees the user's place on the machine; a
    /// `waiting` machine whose queue empties becomes `available`.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Persistence`] if the store fails.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn leave_queue(&self, user_id: &UserId) -> Result<Option<Machine>> {
        let _user = self.inner.user_locks.lock(user_id).await;
        let Some(machine_id) = self.release_user(user_id).await? else {
            return Ok(None);
        };

        let registry = &self.inner.registry;
        let _machine = registry.lock(&machine_id).await;
        let mut machine = match registry.load(&machine_id).await {
            Ok(machine) => machine,
            Err(WashqError::NotFound { .. }) => return Ok(None),
            Err(error) => return Err(error),
        };
        machine.release_place();
        registry.save(&machine).await?;

        info!(
            machine_id = %machine_id,
            status = %machine.status,
            queue = machine.queue_len(),
            "Left queue"
        );
        Ok(Some(machine))
    }

    /// Complete a machine back to `available`, releasing every booking on
    /// it. Returns the released users.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::NotFound`] if the machine is missing or
    /// [`WashqError::Persistence`] if the store fails.
    #[tracing::instrument(skip(self), fields(machine_id = %machine_id))]
    pub async fn complete_to_available(&self, machine_id: &MachineId) -> Result<Vec<UserId>> {
        let (_, released) = self
            .inner
            .registry
            .change_status(machine_id, MachineStatus::Available)
            .await?;
        metrics::record_machine_completed(released.len());
        Ok(released)
    }

    /// Whether a start is pending on the machine.
    #[must_use]
    pub fn is_starting(&self, machine_id: &MachineId) -> bool {
        self.inner.starting().contains(machine_id)
    }

    /// The user's booking, read from the store.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Persistence`] if the store fails.
    pub async fn active_booking(&self, user_id: &UserId) -> Result<Option<Booking>> {
        self.inner.ledger.find_by_user(user_id).await
    }

    /// Caller holds the user lock.
    async fn release_user(&self, user_id: &UserId) -> Result<Option<MachineId>> {
        let ledger = &self.inner.ledger;
        let bookings = ledger.bookings_of_user(user_id).await?;
        let pointer = ledger.profile(user_id).await?.and_then(|p| p.active_booking);

        if bookings.is_empty() && pointer.is_none() {
            return Ok(None);
        }
        for booking in &bookings {
            ledger.delete(&booking.id).await?;
        }
        ledger.set_active_booking(user_id, None).await?;

        let machine_id = bookings.into_iter().next().map(|b| b.machine_id).or(pointer);
        info!(machine_id = ?machine_id, "Active booking cleared");
        Ok(machine_id)
    }

    /// Fails with [`WashqError::AlreadyBooked`] unless `booking` is the
    /// user's earliest booking in the store.
    async fn ensure_earliest(&self, booking: &Booking) -> Result<()> {
        let bookings = self.inner.ledger.bookings_of_user(&booking.user_id).await?;
        match bookings.into_iter().next() {
            Some(earliest) if earliest.id != booking.id => {
                warn!(
                    booking_id = %booking.id,
                    holding = %earliest.id,
                    "Concurrent booking for the same user, backing out"
                );
                Err(WashqError::AlreadyBooked {
                    machine_id: earliest.machine_id,
                })
            },
            _ => Ok(()),
        }
    }

    async fn discard_booking(&self, booking: &Booking) {
        if let Err(error) = self.inner.ledger.delete(&booking.id).await {
            error!(booking_id = %booking.id, %error, "Rollback failed: booking left behind");
        }
    }

    async fn restore_machine(&self, original: &Machine) {
        if let Err(error) = self.inner.registry.save(original).await {
            error!(
                machine_id = %original.id,
                %error,
                "Rollback failed: machine state not restored"
            );
        }
    }
}

impl Inner {
    /// Caller holds the user and machine locks.
    async fn finish_start(&self, user_id: &UserId, machine_id: &MachineId) -> Result<Machine> {
        if self.ledger.cached_active(user_id).as_ref() != Some(machine_id) {
            return Err(WashqError::Unavailable {
                machine_id: machine_id.clone(),
                reason: "booking was cleared before the wash started".to_string(),
            });
        }
        let mut machine = self.registry.load(machine_id).await?;
        if machine.status != MachineStatus::Waiting {
            return Err(WashqError::Unavailable {
                machine_id: machine_id.clone(),
                reason: format!("machine is {}", machine.status.label().to_lowercase()),
            });
        }
        machine.apply_status(MachineStatus::Running);
        self.registry.save(&machine).await?;
        info!(machine_id = %machine_id, minutes = ?machine.time_remaining, "Wash running");
        Ok(machine)
    }

    fn starting(&self) -> MutexGuard<'_, HashSet<MachineId>> {
        self.starting
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
