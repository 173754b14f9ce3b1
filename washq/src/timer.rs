//! Wash timer.
//!
//! Counts down running washes and completes machines whose time is up.

use crate::coordinator::BookingCoordinator;
use crate::error::Result;
use crate::registry::MachineRegistry;
use crate::types::{MachineId, MachineStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Drives running washes to completion.
#[derive(Clone)]
pub struct WashTimer {
    registry: Arc<MachineRegistry>,
    coordinator: BookingCoordinator,
}

impl WashTimer {
    /// Create a timer over the registry.
    #[must_use]
    pub const fn new(registry: Arc<MachineRegistry>, coordinator: BookingCoordinator) -> Self {
        Self {
            registry,
            coordinator,
        }
    }

    /// Advance every running wash by `elapsed_minutes` and complete the
    /// machines that reach zero. Returns the completed machines.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WashqError::Persistence`] if the store fails.
    pub async fn tick(&self, elapsed_minutes: u32) -> Result<Vec<MachineId>> {
        let running: Vec<MachineId> = self
            .registry
            .refresh()
            .await?
            .into_iter()
            .filter(|m| m.status == MachineStatus::Running)
            .map(|m| m.id)
            .collect();

        let mut finished = Vec::new();
        for id in running {
            let _guard = self.registry.lock(&id).await;
            let mut machine = self.registry.load(&id).await?;
            if machine.status != MachineStatus::Running {
                continue;
            }
            if machine.advance(elapsed_minutes) {
                finished.push(id);
            }
            self.registry.save(&machine).await?;
        }

        for id in &finished {
            let released = self.coordinator.complete_to_available(id).await?;
            info!(machine_id = %id, released = released.len(), "Wash finished");
        }
        Ok(finished)
    }

    /// Tick once per `period`, one minute per tick, until the task is aborted.
    #[must_use]
    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                match self.tick(1).await {
                    Ok(finished) => debug!(finished = finished.len(), "Timer tick"),
                    Err(error) => warn!(%error, "Timer tick failed"),
                }
            }
        })
    }
}
