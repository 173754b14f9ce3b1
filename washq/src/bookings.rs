//! Booking ledger.
//!
//! Sole writer of `bookings` documents and of each user's `activeBooking`
//! pointer. Keeps a local index of active bookings that is only updated
//! after the store confirms a write.

use crate::error::{Result, WashqError};
use crate::providers::store::{
    fields, from_document, to_document, Collection, DocumentStore, StoredDocument,
};
use crate::types::{Booking, BookingId, MachineId, User, UserId};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use washq_core::environment::Clock;

/// Persistence of bookings and active-booking pointers.
pub struct BookingLedger {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    active: Mutex<HashMap<UserId, MachineId>>,
}

impl BookingLedger {
    /// Create a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Active booking known locally, without a store round trip.
    #[must_use]
    pub fn cached_active(&self, user_id: &UserId) -> Option<MachineId> {
        self.index().get(user_id).cloned()
    }

    /// Read a user profile.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Persistence`] if the store fails.
    pub async fn profile(&self, user_id: &UserId) -> Result<Option<User>> {
        let document = self.store.get_by_id(Collection::Users, user_id.as_str()).await?;
        let profile = document.map(from_document::<User>).transpose()?;
        if let Some(profile) = &profile {
            self.remember(user_id, profile.active_booking.clone());
        }
        Ok(profile)
    }

    /// The user's booking document, if any.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Persistence`] if the store fails.
    pub async fn find_by_user(&self, user_id: &UserId) -> Result<Option<Booking>> {
        Ok(self.bookings_of_user(user_id).await?.into_iter().next())
    }

    /// Every booking document of a user, earliest first.
    ///
    /// More than one only exists while two clients race to book for the
    /// same user; the earliest by `createdAt`, then id, is the one that holds.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Persistence`] if the store fails.
    pub async fn bookings_of_user(&self, user_id: &UserId) -> Result<Vec<Booking>> {
        let documents = self
            .store
            .query_equals(Collection::Bookings, "userId", Value::from(user_id.as_str()))
            .await?;
        let mut bookings = decode_all(documents)?;
        bookings.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(bookings)
    }

    /// Every booking on a machine, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Persistence`] if the store fails.
    pub async fn find_by_machine(&self, machine_id: &MachineId) -> Result<Vec<Booking>> {
        let documents = self
            .store
            .query_equals(
                Collection::Bookings,
                "machineId",
                Value::from(machine_id.as_str()),
            )
            .await?;
        let mut bookings = decode_all(documents)?;
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }

    /// Write a new booking document.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Persistence`] if the store fails.
    pub async fn create(
        &self,
        user_id: &UserId,
        user_email: Option<String>,
        machine_id: &MachineId,
    ) -> Result<Booking> {
        let now = self.clock.now();
        let mut booking = Booking {
            id: BookingId::new(String::new()),
            user_id: user_id.clone(),
            user_email,
            machine_id: machine_id.clone(),
            start_time: now,
            created_at: now,
        };
        let id = self
            .store
            .create(Collection::Bookings, to_document(&booking)?)
            .await?;
        booking.id = BookingId::new(id);
        debug!(
            booking_id = %booking.id,
            user_id = %user_id,
            machine_id = %machine_id,
            "Booking written"
        );
        Ok(booking)
    }

    /// Delete one booking document. Succeeds when already gone.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Persistence`] if the store fails.
    pub async fn delete(&self, booking_id: &BookingId) -> Result<()> {
        self.store
            .delete(Collection::Bookings, booking_id.as_str())
            .await?;
        Ok(())
    }

    /// Point the user's `activeBooking` at `machine_id`, or clear it.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Persistence`] if the store fails or the user
    /// has no profile.
    pub async fn set_active_booking(
        &self,
        user_id: &UserId,
        machine_id: Option<&MachineId>,
    ) -> Result<()> {
        let value = machine_id.map_or(Value::Null, |id| Value::from(id.as_str()));
        self.store
            .update(
                Collection::Users,
                user_id.as_str(),
                fields([("activeBooking", value)]),
            )
            .await?;
        self.remember(user_id, machine_id.cloned());
        Ok(())
    }

    /// Delete every booking on a machine and clear the pointer of every
    /// user bound to it. Returns the released users.
    ///
    /// Safe to repeat after a partial failure.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Persistence`] if the store fails.
    pub async fn release_machine(&self, machine_id: &MachineId) -> Result<Vec<UserId>> {
        let bookings = self.find_by_machine(machine_id).await?;
        let pointing = self
            .store
            .query_equals(
                Collection::Users,
                "activeBooking",
                Value::from(machine_id.as_str()),
            )
            .await?;

        let mut users: BTreeSet<UserId> = bookings.iter().map(|b| b.user_id.clone()).collect();
        users.extend(pointing.into_iter().map(|d| UserId::new(d.id)));

        if !bookings.is_empty() {
            let ids = bookings.into_iter().map(|b| b.id.as_str().to_string()).collect();
            self.store.batch_delete(Collection::Bookings, ids).await?;
        }

        for user_id in &users {
            match self.set_active_booking(user_id, None).await {
                Ok(()) => {},
                // A booking may outlive its owner's profile
                Err(WashqError::Persistence(crate::providers::StoreError::Missing { .. })) => {
                    warn!(user_id = %user_id, "Released booking of user without profile");
                    self.remember(user_id, None);
                },
                Err(error) => return Err(error),
            }
        }

        Ok(users.into_iter().collect())
    }

    /// Record a user's pointer as read elsewhere, e.g. a reloaded profile.
    pub(crate) fn remember(&self, user_id: &UserId, machine_id: Option<MachineId>) {
        let mut index = self.index();
        match machine_id {
            Some(machine_id) => index.insert(user_id.clone(), machine_id),
            None => index.remove(user_id),
        };
    }

    fn index(&self) -> MutexGuard<'_, HashMap<UserId, MachineId>> {
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn decode_all(documents: Vec<StoredDocument>) -> Result<Vec<Booking>> {
    documents
        .into_iter()
        .map(|d| from_document(d).map_err(WashqError::from))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::InMemoryDocumentStore;
    use crate::types::Role;
    use washq_testing::test_clock;

    async fn ledger_with_users(users: &[&str]) -> (BookingLedger, InMemoryDocumentStore) {
        let store = InMemoryDocumentStore::new();
        let clock = test_clock();
        for id in users {
            let user = User {
                id: UserId::from(*id),
                email: format!("{id}@example.com"),
                display_name: None,
                role: Role::User,
                active_booking: None,
                created_at: clock.now(),
            };
            store
                .put(Collection::Users, id, to_document(&user).unwrap())
                .await
                .unwrap();
        }
        (
            BookingLedger::new(Arc::new(store.clone()), Arc::new(clock)),
            store,
        )
    }

    #[tokio::test]
    async fn pointer_updates_local_index() {
        let (ledger, _store) = ledger_with_users(&["u1"]).await;
        let u1 = UserId::from("u1");
        let m1 = MachineId::from("m1");

        ledger.set_active_booking(&u1, Some(&m1)).await.unwrap();
        assert_eq!(ledger.cached_active(&u1), Some(m1));

        ledger.set_active_booking(&u1, None).await.unwrap();
        assert_eq!(ledger.cached_active(&u1), None);
    }

    #[tokio::test]
    async fn release_clears_every_user_on_the_machine() {
        let (ledger, store) = ledger_with_users(&["u1", "u2", "u3"]).await;
        let m1 = MachineId::from("m1");
        let m2 = MachineId::from("m2");

        for (user, machine) in [("u1", &m1), ("u2", &m1), ("u3", &m2)] {
            let user = UserId::from(user);
            ledger.create(&user, None, machine).await.unwrap();
            ledger.set_active_booking(&user, Some(machine)).await.unwrap();
        }

        let released = ledger.release_machine(&m1).await.unwrap();
        assert_eq!(released, vec![UserId::from("u1"), UserId::from("u2")]);
        assert_eq!(store.len(Collection::Bookings), 1);
        assert_eq!(ledger.cached_active(&UserId::from("u1")), None);
        assert_eq!(ledger.cached_active(&UserId::from("u3")), Some(m2));
        assert!(store.peek(Collection::Users, "u2").unwrap()["activeBooking"].is_null());
    }

    #[tokio::test]
    async fn release_of_unbooked_machine_is_a_no_op() {
        let (ledger, _store) = ledger_with_users(&[]).await;
        let released = ledger.release_machine(&MachineId::from("m9")).await.unwrap();
        assert!(released.is_empty());
    }

    #[tokio::test]
    async fn duplicate_bookings_of_a_user_sort_earliest_first() {
        let (ledger, _store) = ledger_with_users(&["u1"]).await;
        let u1 = UserId::from("u1");

        let first = ledger.create(&u1, None, &MachineId::from("m1")).await.unwrap();
        let second = ledger.create(&u1, None, &MachineId::from("m2")).await.unwrap();

        let bookings = ledger.bookings_of_user(&u1).await.unwrap();
        assert_eq!(bookings.len(), 2);
        let expected = if (first.created_at, &first.id) <= (second.created_at, &second.id) {
            first.id
        } else {
            second.id
        };
        assert_eq!(bookings[0].id, expected);
        assert_eq!(ledger.find_by_user(&u1).await.unwrap().unwrap().id, bookings[0].id);
    }
}
