//! Cancellable delayed callbacks
//!
//! Provides `call_out`: a one-shot callback that fires after a delay and can
//! be cancelled until it starts running. Every pending timer is tracked so
//! hosts can cancel the lot at shutdown and nothing fires post-teardown.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::debug;

/// Handle to a pending one-shot timer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    id: String,
}

impl TimerHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug)]
struct PendingTimer {
    label: String,
    /// Unix timestamp (ms) when the timer is due
    fire_at: i64,
    abort: AbortHandle,
}

/// Tracks pending one-shot timers
#[derive(Debug, Clone, Default)]
pub struct TimerManager {
    timers: Arc<Mutex<HashMap<String, PendingTimer>>>,
}

impl TimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` once after `delay`.
    ///
    /// The timer leaves the pending set right before the callback starts, so
    /// a callback may schedule its own successor without cancelling itself.
    pub fn call_out<F>(&self, label: &str, delay: Duration, callback: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = uuid::Uuid::new_v4().to_string();
        let fire_at = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let mut timers = self.timers.lock();
        let registry = self.timers.clone();
        let timer_id = id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if registry.lock().remove(&timer_id).is_none() {
                return;
            }
            callback.await;
        });

        timers.insert(
            id.clone(),
            PendingTimer {
                label: label.to_string(),
                fire_at,
                abort: task.abort_handle(),
            },
        );

        TimerHandle { id }
    }

    /// Cancel a pending timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        match self.timers.lock().remove(&handle.id) {
            Some(timer) => {
                timer.abort.abort();
                debug!("Cancelled timer {} ({})", handle.id, timer.label);
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingTimer> = self.timers.lock().drain().map(|(_, t)| t).collect();
        for timer in &drained {
            timer.abort.abort();
        }
        drained.len()
    }

    pub fn is_pending(&self, handle: &TimerHandle) -> bool {
        self.timers.lock().contains_key(&handle.id)
    }

    /// Milliseconds until the timer fires (0 if due, None if not pending)
    pub fn time_remaining_ms(&self, handle: &TimerHandle) -> Option<u64> {
        let now = chrono::Utc::now().timestamp_millis();
        self.timers
            .lock()
            .get(&handle.id)
            .map(|t| (t.fire_at - now).max(0) as u64)
    }

    pub fn pending_count(&self) -> usize {
        self.timers.lock().len()
    }
}
