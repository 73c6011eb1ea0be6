/// Periodic TTL sweep.
///
/// A tokio task owned by the storage lifecycle: started on construction,
/// aborted by `shut_down` or drop. It holds only a weak reference, so a
/// dropped storage also ends the loop on the next tick.
use std::sync::{Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::Shared;
use crate::types::now_ms;

/// Shortest sweep period accepted (tokio intervals cannot be zero).
const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub(crate) struct ExpiryScheduler {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ExpiryScheduler {
    pub(crate) fn start(shared: Weak<Shared>, period: Duration, runtime: &Handle) -> Self {
        let period = period.max(MIN_INTERVAL);
        tracing::info!("storage: ttl sweep every {period:?}");
        let task = runtime.spawn(expiry_loop(shared, period));
        Self {
            task: Mutex::new(Some(task)),
        }
    }

    /// Abort the sweep task. Returns `false` if it was already stopped.
    pub(crate) fn stop(&self) -> bool {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match task {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

async fn expiry_loop(shared: Weak<Shared>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            tracing::debug!("storage dropped, ttl sweep exiting");
            return;
        };
        if shared.is_shut_down() {
            return;
        }
        let expired = shared.sweep_expired(now_ms());
        if expired > 0 {
            tracing::debug!("ttl sweep removed {expired} expired entries");
        }
    }
}
