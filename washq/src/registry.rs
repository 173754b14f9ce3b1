//! Machine registry.
//!
//! Keeps the set of known machines in sync with the document store. Every
//! mutation is a read-modify-write against the store under the machine's
//! lock; the cached snapshot only changes after the store confirms.

use crate::bookings::BookingLedger;
use crate::error::{Result, WashqError};
use crate::locks::KeyedLocks;
use crate::providers::store::{from_document, to_document, Collection, DocumentStore};
use crate::types::{Machine, MachineId, MachineStatus, User, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, OwnedMutexGuard};
use tracing::{info, warn};
use washq_core::environment::Clock;

/// Registry of laundry machines.
pub struct MachineRegistry {
    store: Arc<dyn DocumentStore>,
    ledger: Arc<BookingLedger>,
    clock: Arc<dyn Clock>,
    snapshot: watch::Sender<Vec<Machine>>,
    /// Bumped with every snapshot change, under the channel's write lock.
    version: AtomicU64,
    locks: KeyedLocks<MachineId>,
}

impl MachineRegistry {
    /// Create a registry with an empty cache. Call [`Self::refresh`] to load.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        ledger: Arc<BookingLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (snapshot, _) = watch::channel(Vec::new());
        Self {
            store,
            ledger,
            clock,
            snapshot,
            version: AtomicU64::new(0),
            locks: KeyedLocks::new(),
        }
    }

    /// Machines in creation order.
    ///
    /// Reloads from the store; an unreachable store yields an empty list.
    pub async fn list(&self) -> Vec<Machine> {
        match self.refresh().await {
            Ok(machines) => machines,
            Err(error) => {
                warn!(%error, "Machine list unavailable, showing none");
                Vec::new()
            },
        }
    }

    /// Reload every machine from the store into the cache.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Persistence`] if the store fails.
    pub async fn refresh(&self) -> Result<Vec<Machine>> {
        let documents = self.store.list_all(Collection::Machines).await?;
        let mut machines: Vec<Machine> = documents
            .into_iter()
            .filter_map(|document| {
                let id = document.id.clone();
                from_document(document)
                    .inspect_err(|error| {
                        warn!(machine_id = %id, %error, "Skipping malformed machine");
                    })
                    .ok()
            })
            .collect();
        machines.sort_by_key(|m| m.created_at);
        self.publish(|cached| *cached = machines.clone());
        Ok(machines)
    }

    /// Latest cached machines, without a store round trip.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Machine> {
        self.snapshot.borrow().clone()
    }

    /// Latest cached machines with their version. Later changes always carry
    /// a higher version.
    #[must_use]
    pub fn versioned_snapshot(&self) -> (u64, Vec<Machine>) {
        let machines = self.snapshot.borrow();
        (self.version.load(Ordering::Acquire), machines.clone())
    }

    /// Receive every new snapshot after a mutation or refresh.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<Machine>> {
        self.snapshot.subscribe()
    }

    /// A machine by id, from the cache or else the store.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::NotFound`] if the machine does not exist, or
    /// [`WashqError::Persistence`] if the store fails.
    pub async fn get(&self, id: &MachineId) -> Result<Machine> {
        let cached = self.snapshot.borrow().iter().find(|m| &m.id == id).cloned();
        match cached {
            Some(machine) => Ok(machine),
            None => self.fetch_machine_details(id).await,
        }
    }

    /// A machine read straight from the store.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::NotFound`] if the machine does not exist, or
    /// [`WashqError::Persistence`] if the store fails.
    pub async fn fetch_machine_details(&self, id: &MachineId) -> Result<Machine> {
        let machine = self.load(id).await?;
        self.cache(&machine);
        Ok(machine)
    }

    /// Install a new machine. Admin only.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Forbidden`] for non-admins,
    /// [`WashqError::Validation`] for a blank name, or
    /// [`WashqError::Persistence`] if the store fails.
    pub async fn create(
        &self,
        actor: &User,
        name: &str,
        location: Option<&str>,
    ) -> Result<Machine> {
        actor.require_admin()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(WashqError::Validation("machine name must not be empty".to_string()));
        }
        let location = location
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToString::to_string);

        let mut machine =
            Machine::new(MachineId::new(String::new()), name, location, self.clock.now());
        let id = self
            .store
            .create(Collection::Machines, to_document(&machine)?)
            .await?;
        machine.id = MachineId::new(id);

        self.cache(&machine);
        info!(machine_id = %machine.id, name = %machine.name, "Machine created");
        Ok(machine)
    }

    /// Change a machine's status. Admin only.
    ///
    /// Setting `available` releases every booking on the machine.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Forbidden`] for non-admins,
    /// [`WashqError::NotFound`] if the machine does not exist, or
    /// [`WashqError::Persistence`] if the store fails.
    pub async fn set_status(
        &self,
        actor: &User,
        id: &MachineId,
        status: MachineStatus,
    ) -> Result<Machine> {
        actor.require_admin()?;
        let (machine, _) = self.change_status(id, status).await?;
        Ok(machine)
    }

    /// Delete a machine and release its bookings. Admin only.
    ///
    /// Removing an absent machine succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Forbidden`] for non-admins or
    /// [`WashqError::Persistence`] if the store fails.
    pub async fn remove(&self, actor: &User, id: &MachineId) -> Result<()> {
        actor.require_admin()?;
        let _guard = self.lock(id).await;

        self.store.delete(Collection::Machines, id.as_str()).await?;
        self.publish(|machines| machines.retain(|m| &m.id != id));
        let released = self.ledger.release_machine(id).await?;

        info!(machine_id = %id, released = released.len(), "Machine removed");
        Ok(())
    }

    /// Apply a status under the machine lock without a role check.
    ///
    /// Returns the updated machine and, for `available`, the released users.
    pub(crate) async fn change_status(
        &self,
        id: &MachineId,
        status: MachineStatus,
    ) -> Result<(Machine, Vec<UserId>)> {
        let _guard = self.lock(id).await;

        let mut machine = self.load(id).await?;
        let previous = machine.status;
        machine.apply_status(status);
        self.save(&machine).await?;

        let released = if status == MachineStatus::Available {
            self.ledger.release_machine(id).await?
        } else {
            Vec::new()
        };

        info!(
            machine_id = %id,
            from = %previous,
            to = %status,
            released = released.len(),
            "Machine status changed"
        );
        Ok((machine, released))
    }

    /// Exclusive access to one machine.
    pub(crate) async fn lock(&self, id: &MachineId) -> OwnedMutexGuard<()> {
        self.locks.lock(id).await
    }

    /// Read a machine from the store.
    pub(crate) async fn load(&self, id: &MachineId) -> Result<Machine> {
        let document = self
            .store
            .get_by_id(Collection::Machines, id.as_str())
            .await?
            .ok_or_else(|| WashqError::machine_not_found(id))?;
        Ok(from_document(document)?)
    }

    /// Write a machine to the store, then to the cache.
    pub(crate) async fn save(&self, machine: &Machine) -> Result<()> {
        self.store
            .update(Collection::Machines, machine.id.as_str(), to_document(machine)?)
            .await?;
        self.cache(machine);
        Ok(())
    }

    fn publish(&self, change: impl FnOnce(&mut Vec<Machine>)) {
        self.snapshot.send_modify(|machines| {
            change(machines);
            self.version.fetch_add(1, Ordering::AcqRel);
        });
    }

    fn cache(&self, machine: &Machine) {
        self.publish(|machines| {
            match machines.iter_mut().find(|m| m.id == machine.id) {
                Some(existing) => *existing = machine.clone(),
                None => {
                    machines.push(machine.clone());
                    machines.sort_by_key(|m| m.created_at);
                },
            }
        });
    }
}
