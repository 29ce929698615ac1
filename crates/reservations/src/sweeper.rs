//! Background task that periodically expires overdue reservations.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::store::ReservationStore;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to a running sweep loop.
///
/// The loop ticks immediately, then every `interval`, calling
/// [`ReservationStore::sweep_now`]. A slow sweep delays the next tick rather
/// than triggering a burst of catch-up sweeps.
pub struct ReservationSweeper {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReservationSweeper {
    /// Starts sweeping `store` on the current tokio runtime.
    pub fn spawn(store: ReservationStore, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_ms = interval.as_millis() as u64, "reservation sweeper started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        store.sweep_now().await;
                    }
                }
            }

            tracing::info!("reservation sweeper stopped");
        });

        Self { shutdown, task }
    }

    /// Stops the loop and waits for an in-flight sweep to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "reservation sweeper task failed");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
