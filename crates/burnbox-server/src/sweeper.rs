use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::service::SecretService;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(40);

/// Interval for a configured number of seconds; anything non-positive or
/// missing falls back to [`DEFAULT_SWEEP_INTERVAL`].
pub fn sweep_interval(secs: Option<i64>) -> Duration {
    match secs {
        Some(s) if s > 0 => Duration::from_secs(s as u64),
        _ => DEFAULT_SWEEP_INTERVAL,
    }
}

/// Handle to the background sweep. Dropping it also stops the loop.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop scheduling passes and wait for the one in flight to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "sweeper task ended abnormally");
        }
    }
}

/// Spawn a task that purges expired secrets now and then every `interval`.
///
/// A failed pass is logged and the next one runs on schedule.
pub fn spawn_sweeper(service: SecretService, interval: Duration) -> SweeperHandle {
    let (tx, mut rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs_f64(), "expiration sweeper started");

        loop {
            tokio::select! {
                biased;
                _ = rx.changed() => break,
                _ = ticker.tick() => {}
            }
            // Not raced against shutdown: a started pass runs to the end.
            match service.clean_expired_secrets().await {
                Ok(removed) => debug!(removed, "sweep pass complete"),
                Err(e) => warn!(error = %e, "background sweep error"),
            }
        }

        info!("expiration sweeper stopped");
    });

    SweeperHandle { shutdown: tx, task }
}
