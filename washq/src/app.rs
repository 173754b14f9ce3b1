//! Application service.
//!
//! [`WashqApp`] wires the registry, coordinator, watcher, session, feedback
//! desk, QR resolver and timer together and acts on behalf of the signed-in
//! user. Every mutation ends with an update cycle that feeds the
//! notification watcher. After [`WashqApp::start`], background tasks also
//! run an update cycle on every registry change (including the wash timer's)
//! and follow the identity service.

use crate::bookings::BookingLedger;
use crate::config::Config;
use crate::coordinator::BookingCoordinator;
use crate::error::Result;
use crate::feedback::FeedbackDesk;
use crate::notifications::NotificationWatcher;
use crate::providers::{DocumentStore, IdentityProvider, Notifier};
use crate::qr::{machine_url, QrDecoder, QrResolver};
use crate::registry::MachineRegistry;
use crate::session::{Credentials, RouteDecision, SessionService, SessionState};
use crate::timer::WashTimer;
use crate::types::{
    Booking, Feedback, FeedbackSubject, Machine, MachineId, MachineStatus, Role, User, UserId,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use washq_core::environment::Clock;

/// External collaborators the app runs against.
#[derive(Clone)]
pub struct Providers {
    /// Document store.
    pub store: Arc<dyn DocumentStore>,
    /// Identity service.
    pub identity: Arc<dyn IdentityProvider>,
    /// Notification channel.
    pub notifier: Arc<dyn Notifier>,
    /// QR frame decoder.
    pub decoder: Arc<dyn QrDecoder>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// The washQ application service.
pub struct WashqApp {
    config: Config,
    session: Arc<SessionService>,
    registry: Arc<MachineRegistry>,
    coordinator: BookingCoordinator,
    cycle: UpdateCycle,
    feedback: FeedbackDesk,
    qr: QrResolver,
    timer: WashTimer,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Reloads the user's profile and hands the latest machine snapshot to the
/// watcher.
#[derive(Clone)]
struct UpdateCycle {
    session: Arc<SessionService>,
    ledger: Arc<BookingLedger>,
    registry: Arc<MachineRegistry>,
    watcher: NotificationWatcher,
}

impl WashqApp {
    /// Build the app. Call [`Self::start`] before use.
    #[must_use]
    pub fn new(config: Config, providers: Providers) -> Self {
        let Providers {
            store,
            identity,
            notifier,
            decoder,
            clock,
        } = providers;

        let ledger = Arc::new(BookingLedger::new(Arc::clone(&store), Arc::clone(&clock)));
        let registry = Arc::new(MachineRegistry::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&clock),
        ));
        let coordinator = BookingCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            config.start_wash_latency,
        );

        let session = Arc::new(SessionService::new(
            identity,
            Arc::clone(&store),
            Arc::clone(&clock),
        ));
        let cycle = UpdateCycle {
            session: Arc::clone(&session),
            ledger,
            registry: Arc::clone(&registry),
            watcher: NotificationWatcher::new(notifier),
        };

        Self {
            feedback: FeedbackDesk::new(store, clock),
            qr: QrResolver::new(Arc::clone(&registry), decoder),
            timer: WashTimer::new(Arc::clone(&registry), coordinator.clone()),
            session,
            registry,
            coordinator,
            cycle,
            config,
            background: Mutex::new(Vec::new()),
        }
    }

    /// Resolve the startup session, load the machines and start following
    /// registry and identity changes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WashqError::Persistence`] if the signed-in user's
    /// profile cannot be loaded.
    pub async fn start(&self) -> Result<SessionState> {
        let state = self.session.restore().await?;
        self.refresh().await;
        self.follow_changes();
        info!(authenticated = state.user().is_some(), "washQ started");
        Ok(state)
    }

    /// Run one update cycle: reload machines and the user's profile, then
    /// let the watcher compare snapshots.
    pub async fn refresh(&self) {
        if let Err(error) = self.registry.refresh().await {
            warn!(%error, "Machine refresh failed, keeping cached machines");
        }
        self.observe().await;
    }

    // ─── Session ────────────────────────────────────────────────────────

    /// Sign in (or sign up on first use).
    ///
    /// # Errors
    ///
    /// See [`SessionService::login`].
    pub async fn login(&self, credentials: &Credentials) -> Result<User> {
        let user = self.session.login(credentials).await?;
        self.observe().await;
        Ok(user)
    }

    /// Sign out.
    ///
    /// # Errors
    ///
    /// See [`SessionService::logout`].
    pub async fn logout(&self) -> Result<()> {
        self.session.logout().await
    }

    /// Current session state.
    #[must_use]
    pub fn current_user(&self) -> SessionState {
        self.session.current_user()
    }

    /// Session changes.
    #[must_use]
    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    /// Route guard for the current session.
    #[must_use]
    pub fn guard(&self, required: Option<Role>) -> RouteDecision {
        self.session.guard(required)
    }

    // ─── Machines ───────────────────────────────────────────────────────

    /// Machines in creation order; empty when the store is unreachable.
    pub async fn machines(&self) -> Vec<Machine> {
        self.registry.list().await
    }

    /// Machine snapshots as they change.
    #[must_use]
    pub fn subscribe_machines(&self) -> watch::Receiver<Vec<Machine>> {
        self.registry.subscribe()
    }

    /// Details of one machine, read from the store.
    ///
    /// # Errors
    ///
    /// See [`MachineRegistry::fetch_machine_details`].
    pub async fn machine(&self, machine_id: &MachineId) -> Result<Machine> {
        self.registry.fetch_machine_details(machine_id).await
    }

    /// Install a machine. Admin only.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WashqError::Auth`] when signed out, otherwise see
    /// [`MachineRegistry::create`].
    pub async fn add_machine(&self, name: &str, location: Option<&str>) -> Result<Machine> {
        let actor = self.session.require_user()?;
        let machine = self.registry.create(&actor, name, location).await?;
        self.observe().await;
        Ok(machine)
    }

    /// Change a machine's status. Admin only.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WashqError::Auth`] when signed out, otherwise see
    /// [`MachineRegistry::set_status`].
    pub async fn set_machine_status(
        &self,
        machine_id: &MachineId,
        status: MachineStatus,
    ) -> Result<Machine> {
        let actor = self.session.require_user()?;
        let machine = self.registry.set_status(&actor, machine_id, status).await?;
        self.observe().await;
        Ok(machine)
    }

    /// Remove a machine. Admin only.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WashqError::Auth`] when signed out, otherwise see
    /// [`MachineRegistry::remove`].
    pub async fn remove_machine(&self, machine_id: &MachineId) -> Result<()> {
        let actor = self.session.require_user()?;
        self.registry.remove(&actor, machine_id).await?;
        self.observe().await;
        Ok(())
    }

    /// Complete a machine back to available. Admin only.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WashqError::Auth`] when signed out,
    /// [`crate::WashqError::Forbidden`] for non-admins, otherwise see
    /// [`BookingCoordinator::complete_to_available`].
    pub async fn complete_machine(&self, machine_id: &MachineId) -> Result<Vec<UserId>> {
        self.session.require_admin()?;
        let released = self.coordinator.complete_to_available(machine_id).await?;
        self.observe().await;
        Ok(released)
    }

    // ─── Bookings ───────────────────────────────────────────────────────

    /// Book a machine for the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WashqError::Auth`] when signed out, otherwise see
    /// [`BookingCoordinator::book`].
    pub async fn book(&self, machine_id: &MachineId) -> Result<Booking> {
        let user = self.session.require_user()?;
        let booking = self.coordinator.book(&user.id, machine_id).await?;
        self.observe().await;
        Ok(booking)
    }

    /// Start the wash on the signed-in user's machine.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WashqError::Auth`] when signed out, otherwise see
    /// [`BookingCoordinator::start_wash`].
    pub async fn start_wash(&self, machine_id: &MachineId) -> Result<Machine> {
        let user = self.session.require_user()?;
        let machine = self.coordinator.start_wash(&user.id, machine_id).await?;
        self.observe().await;
        Ok(machine)
    }

    /// Leave the queue the signed-in user is in.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WashqError::Auth`] when signed out, otherwise see
    /// [`BookingCoordinator::leave_queue`].
    pub async fn leave_queue(&self) -> Result<Option<Machine>> {
        let user = self.session.require_user()?;
        let machine = self.coordinator.leave_queue(&user.id).await?;
        self.observe().await;
        Ok(machine)
    }

    /// Drop the signed-in user's booking without touching the queue count.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WashqError::Auth`] when signed out, otherwise see
    /// [`BookingCoordinator::clear_active_booking`].
    pub async fn clear_active_booking(&self) -> Result<()> {
        let user = self.session.require_user()?;
        self.coordinator.clear_active_booking(&user.id).await?;
        self.observe().await;
        Ok(())
    }

    /// The signed-in user's booking.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WashqError::Auth`] when signed out, otherwise see
    /// [`BookingCoordinator::active_booking`].
    pub async fn active_booking(&self) -> Result<Option<Booking>> {
        let user = self.session.require_user()?;
        self.coordinator.active_booking(&user.id).await
    }

    /// Whether a start is pending on the machine.
    #[must_use]
    pub fn is_starting(&self, machine_id: &MachineId) -> bool {
        self.coordinator.is_starting(machine_id)
    }

    // ─── Feedback ───────────────────────────────────────────────────────

    /// Send feedback as the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WashqError::Auth`] when signed out, otherwise see
    /// [`FeedbackDesk::submit`].
    pub async fn submit_feedback(
        &self,
        subject: FeedbackSubject,
        message: &str,
    ) -> Result<Feedback> {
        let author = self.session.require_user()?;
        self.feedback.submit(&author, subject, message).await
    }

    /// All feedback, newest first. Admin only.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WashqError::Auth`] when signed out, otherwise see
    /// [`FeedbackDesk::list`].
    pub async fn feedback(&self) -> Result<Vec<Feedback>> {
        let reader = self.session.require_user()?;
        self.feedback.list(&reader).await
    }

    // ─── QR ─────────────────────────────────────────────────────────────

    /// Resolve scanned QR text to a machine.
    ///
    /// # Errors
    ///
    /// See [`QrResolver::resolve`].
    pub async fn resolve_qr(&self, raw: &str) -> Result<Machine> {
        self.qr.resolve(raw).await
    }

    /// Decode a camera frame and resolve it.
    ///
    /// # Errors
    ///
    /// See [`QrResolver::scan`].
    pub async fn scan_frame(&self, frame: &[u8]) -> Result<Option<Machine>> {
        self.qr.scan(frame).await
    }

    /// URL to encode in a machine's QR code.
    #[must_use]
    pub fn machine_qr_url(&self, machine_id: &MachineId) -> String {
        machine_url(&self.config.qr_base_url, machine_id)
    }

    // ─── Timer ──────────────────────────────────────────────────────────

    /// Advance running washes by `elapsed_minutes`.
    ///
    /// # Errors
    ///
    /// See [`WashTimer::tick`].
    pub async fn tick(&self, elapsed_minutes: u32) -> Result<Vec<MachineId>> {
        let finished = self.timer.tick(elapsed_minutes).await?;
        self.observe().await;
        Ok(finished)
    }

    /// Run the wash timer in the background at the configured period.
    ///
    /// Its registry changes reach the watcher through the update cycles
    /// started by [`Self::start`].
    #[must_use]
    pub fn spawn_timer(&self) -> JoinHandle<()> {
        self.timer.clone().spawn(self.config.timer_tick)
    }

    /// Notifications delivered so far.
    pub async fn notifications_delivered(&self) -> u64 {
        self.cycle.watcher.delivered().await
    }

    /// Stop the background tasks and the watcher.
    pub fn shutdown(&self) {
        self.stop_background();
        self.cycle.watcher.shutdown();
    }

    async fn observe(&self) {
        self.cycle.run().await;
    }

    fn follow_changes(&self) {
        let cycle = self.cycle.clone();
        let mut changes = self.registry.subscribe();
        let registry_task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                cycle.run().await;
            }
        });
        let identity_task = self.session.follow_identity();

        self.stop_background();
        self.background().extend([registry_task, identity_task]);
    }

    fn stop_background(&self) {
        for task in self.background().drain(..) {
            task.abort();
        }
    }

    fn background(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.background
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for WashqApp {
    fn drop(&mut self) {
        self.stop_background();
    }
}

impl UpdateCycle {
    async fn run(&self) {
        let active_booking = match self.session.reload().await {
            Ok(user) => {
                self.ledger.remember(&user.id, user.active_booking.clone());
                user.active_booking
            },
            Err(error) => {
                if self.session.current_user().user().is_some() {
                    warn!(%error, "Profile reload failed");
                }
                self.session
                    .current_user()
                    .user()
                    .and_then(|user| user.active_booking.clone())
            },
        };
        let (version, machines) = self.registry.versioned_snapshot();
        if let Err(error) = self.watcher.observe(version, machines, active_booking).await {
            warn!(%error, "Watcher not accepting updates");
        }
    }
}
