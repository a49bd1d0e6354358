//! Background key maintenance.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::rotation::KeyRotationService;

/// Periodically promotes staged signing keys, purges expired keys and starts
/// interval rotations. Safe to run on every node: each pass takes the
/// rotation lock per key type and re-derives what is due.
pub struct RotationScheduler {
    service: Arc<KeyRotationService>,
    tick: Duration,
}

impl RotationScheduler {
    pub fn new(service: Arc<KeyRotationService>, tick: Duration) -> Self {
        Self { service, tick }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(tick_seconds = self.tick.as_secs(), "Key rotation scheduler started");

            loop {
                tokio::select! {
                    _ = interval.tick() => self.run_once().await,
                    _ = shutdown.cancelled() => break,
                }
            }
            info!("Key rotation scheduler stopped");
        })
    }

    async fn run_once(&self) {
        match self.service.run_maintenance().await {
            Ok(changed) if changed.is_empty() => debug!("No key maintenance due"),
            Ok(changed) => info!(key_types = ?changed, "Key maintenance applied"),
            // Retried on the next tick.
            Err(e) => warn!(error = %e, retryable = e.is_retryable(), "Key maintenance failed"),
        }
    }
}
