//! Periodic expiry sweep.
//!
//! Lookups already ignore expired codes, so the sweeper is only about
//! memory: it wakes every `interval`, takes the registry lock once, and
//! drops whatever has expired.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::CodeRegistry;

/// The registry as shared between the attendance service and the sweeper.
pub type SharedRegistry = Arc<Mutex<CodeRegistry>>;

/// Handle to a running sweep task.
///
/// Dropping the handle aborts the task; [`Sweeper::stop`] shuts it down
/// cleanly and waits for it.
#[derive(Debug)]
pub struct Sweeper {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Signals the task to stop and waits until it has.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// `true` once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Spawns a task that sweeps `registry` every `interval`.
///
/// Must be called from inside a Tokio runtime. The first sweep happens
/// one `interval` after spawning.
pub fn spawn_sweeper(registry: SharedRegistry, interval: Duration) -> Sweeper {
    let (tx, mut rx) = oneshot::channel::<()>();
    // `time::interval` panics on a zero period.
    let period = interval.max(Duration::from_millis(1));

    let task = tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut rx => break,
                _ = ticker.tick() => {
                    let (swept, live) = {
                        let mut reg = registry.lock().await;
                        let swept = reg.sweep_expired();
                        (swept, reg.len())
                    };
                    if !swept.is_empty() {
                        info!(count = swept.len(), live, "expired attendance codes swept");
                        debug!(codes = ?swept, "swept codes");
                    }
                }
            }
        }
        debug!("code sweeper stopped");
    });

    Sweeper {
        shutdown: Some(tx),
        task: Some(task),
    }
}
