use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_LIVENESS_PATH: &str = "/tmp/liveness";
const DEFAULT_LIVENESS_PERIOD: Duration = Duration::from_secs(60);

/// Periodic heartbeat file for an exec-based liveness probe.
///
/// While the watch is healthy the current unix timestamp in milliseconds is
/// written to `path` every `period`, so a probe can compare the stamp against
/// the probe time and fail the pod when the heartbeat goes stale.
#[derive(Debug, Clone)]
pub struct Liveness {
    path: PathBuf,
    period: Duration,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new(DEFAULT_LIVENESS_PATH, DEFAULT_LIVENESS_PERIOD)
    }
}

impl Liveness {
    pub fn new(path: impl Into<PathBuf>, period: Duration) -> Self {
        Liveness {
            path: path.into(),
            period,
        }
    }

    pub(crate) fn spawn(self, healthy: Arc<AtomicBool>, stop: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                if !healthy.load(Ordering::Relaxed) {
                    log::debug!("Watch is unhealthy, skipping the liveness heartbeat");
                    continue;
                }

                if let Err(err) = tokio::fs::write(&self.path, unix_millis().to_string()).await {
                    log::warn!(
                        "Failed to write the liveness heartbeat to {}: {err}",
                        self.path.display()
                    );
                }
            }
        })
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
