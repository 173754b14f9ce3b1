//! Recording notifier.

use crate::providers::notifier::{Notification, Notifier};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};

/// Notifier that keeps every notification for later inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications delivered so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Number of notifications delivered so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(notification);
            }
        })
    }
}
