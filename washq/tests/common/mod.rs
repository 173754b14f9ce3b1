//! Shared fixtures for the washQ integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;
use washq::app::{Providers, WashqApp};
use washq::bookings::BookingLedger;
use washq::config::Config;
use washq::coordinator::BookingCoordinator;
use washq::mocks::{InMemoryDocumentStore, MockIdentityProvider, RecordingNotifier};
use washq::providers::store::{to_document, Collection};
use washq::providers::DocumentStore;
use washq::qr::NoopDecoder;
use washq::registry::MachineRegistry;
use washq::session::Credentials;
use washq::{Machine, MachineId, MachineStatus, Role, User, UserId};
use washq_core::environment::Clock;
use washq_testing::{stepping_clock, SteppingClock};

/// Start latency used by every fixture.
pub const START_LATENCY: Duration = Duration::from_millis(20);

/// Coordinator wired to an in-memory store.
pub struct Bench {
    pub store: InMemoryDocumentStore,
    pub clock: Arc<SteppingClock>,
    pub ledger: Arc<BookingLedger>,
    pub registry: Arc<MachineRegistry>,
    pub coordinator: BookingCoordinator,
}

impl Bench {
    pub fn new() -> Self {
        Self::with_latency(START_LATENCY)
    }

    pub fn with_latency(latency: Duration) -> Self {
        let store = InMemoryDocumentStore::new();
        let clock = Arc::new(stepping_clock());
        let shared: Arc<dyn DocumentStore> = Arc::new(store.clone());
        let ledger = Arc::new(BookingLedger::new(Arc::clone(&shared), clock.clone()));
        let registry = Arc::new(MachineRegistry::new(
            shared,
            Arc::clone(&ledger),
            clock.clone(),
        ));
        let coordinator =
            BookingCoordinator::new(Arc::clone(&registry), Arc::clone(&ledger), latency);
        Self {
            store,
            clock,
            ledger,
            registry,
            coordinator,
        }
    }

    /// A coordinator of another client process over the same store.
    pub fn second_client(&self) -> BookingCoordinator {
        let shared: Arc<dyn DocumentStore> = Arc::new(self.store.clone());
        let clock = Arc::new(stepping_clock());
        let ledger = Arc::new(BookingLedger::new(Arc::clone(&shared), clock.clone()));
        let registry = Arc::new(MachineRegistry::new(shared, Arc::clone(&ledger), clock));
        BookingCoordinator::new(registry, ledger, START_LATENCY)
    }

    /// Put a user profile with the given id.
    pub async fn user(&self, id: &str) -> UserId {
        put_profile(&self.store, self.clock.as_ref(), id, Role::User).await;
        UserId::from(id)
    }

    /// Put a machine document with the given id and state.
    pub async fn machine(
        &self,
        id: &str,
        status: MachineStatus,
        queue_count: Option<u32>,
        time_remaining: Option<u32>,
    ) -> MachineId {
        let clock = self.clock.as_ref();
        put_machine(&self.store, clock, id, status, queue_count, time_remaining).await;
        self.registry.refresh().await.unwrap();
        MachineId::from(id)
    }

    /// The machine as stored.
    pub async fn stored(&self, id: &MachineId) -> Machine {
        self.registry.fetch_machine_details(id).await.unwrap()
    }

    /// The user's `activeBooking` as stored.
    pub async fn pointer(&self, id: &UserId) -> Option<MachineId> {
        self.ledger.profile(id).await.unwrap().unwrap().active_booking
    }

    pub fn bookings(&self) -> usize {
        self.store.len(Collection::Bookings)
    }
}

pub async fn put_profile(store: &InMemoryDocumentStore, clock: &dyn Clock, id: &str, role: Role) {
    let user = User {
        id: UserId::from(id),
        email: format!("{id}@washq.test"),
        display_name: None,
        role,
        active_booking: None,
        created_at: clock.now(),
    };
    store
        .put(Collection::Users, id, to_document(&user).unwrap())
        .await
        .unwrap();
}

pub async fn put_machine(
    store: &InMemoryDocumentStore,
    clock: &dyn Clock,
    id: &str,
    status: MachineStatus,
    queue_count: Option<u32>,
    time_remaining: Option<u32>,
) {
    let mut machine = Machine::new(MachineId::from(id), format!("Machine {id}"), None, clock.now());
    machine.status = status;
    machine.queue_count = queue_count;
    machine.time_remaining = time_remaining;
    store
        .put(Collection::Machines, id, to_document(&machine).unwrap())
        .await
        .unwrap();
}

/// One client of a shared deployment: its own app and identity provider
/// over a store shared with other clients.
pub struct Client {
    pub app: WashqApp,
    pub identity: MockIdentityProvider,
    pub notifier: RecordingNotifier,
}

impl Client {
    pub async fn connect(store: &InMemoryDocumentStore) -> Self {
        Self::connect_with(store, Config::default().with_start_wash_latency(START_LATENCY)).await
    }

    pub async fn connect_with(store: &InMemoryDocumentStore, config: Config) -> Self {
        let identity = MockIdentityProvider::new();
        let notifier = RecordingNotifier::new();
        let app = WashqApp::new(
            config,
            Providers {
                store: Arc::new(store.clone()),
                identity: Arc::new(identity.clone()),
                notifier: Arc::new(notifier.clone()),
                decoder: Arc::new(NoopDecoder),
                clock: Arc::new(stepping_clock()),
            },
        );
        app.start().await.unwrap();
        Self {
            app,
            identity,
            notifier,
        }
    }

    /// Connect and sign in as a fresh resident.
    pub async fn resident(store: &InMemoryDocumentStore, email: &str) -> Self {
        let client = Self::connect(store).await;
        client
            .app
            .login(&Credentials::new(email, "secret-123"))
            .await
            .unwrap();
        client
    }

    /// Connect and sign in as an administrator.
    pub async fn admin(store: &InMemoryDocumentStore) -> Self {
        let client = Self::connect(store).await;
        let account = client.identity.register("admin@washq.test", "admin-secret");
        let profile = User {
            id: account.uid,
            email: account.email,
            display_name: None,
            role: Role::Admin,
            active_booking: None,
            created_at: stepping_clock().now(),
        };
        store
            .put(
                Collection::Users,
                profile.id.as_str(),
                to_document(&profile).unwrap(),
            )
            .await
            .unwrap();
        client
            .app
            .login(&Credentials::new("admin@washq.test", "admin-secret"))
            .await
            .unwrap();
        client
    }

    pub fn user_id(&self) -> UserId {
        self.app.current_user().user().unwrap().id.clone()
    }
}
