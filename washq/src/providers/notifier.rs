//! User-facing notification channel.

use crate::types::{Machine, MachineId};
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::info;

/// A notification raised for the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Machine the notification is about.
    pub machine_id: MachineId,
    /// Machine display name.
    pub machine_name: String,
    /// Title line.
    pub title: String,
    /// Body text.
    pub body: String,
}

impl Notification {
    /// "Your machine is ready" for a machine that just finished.
    #[must_use]
    pub fn machine_ready(machine: &Machine) -> Self {
        Self {
            machine_id: machine.id.clone(),
            machine_name: machine.name.clone(),
            title: "Your machine is ready!".to_string(),
            body: format!("{} is now available and waiting for you.", machine.name),
        }
    }
}

/// Delivers notifications to the user.
pub trait Notifier: Send + Sync {
    /// Deliver one notification. Delivery failures are the notifier's concern.
    fn notify(&self, notification: Notification) -> BoxFuture<'_, ()>;
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            info!(
                machine_id = %notification.machine_id,
                title = %notification.title,
                body = %notification.body,
                "Notification"
            );
        })
    }
}

/// Notifier that fans notifications out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    /// Create a notifier buffering up to `capacity` undelivered notifications.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive notifications sent from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(16)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notification: Notification) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            // Nobody listening is not an error
            let _ = self.sender.send(notification);
        })
    }
}
