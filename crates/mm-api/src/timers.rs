//! # Acceptance Timers
//!
//! One cancellable delayed action per session. Each armed timer is a tokio
//! task racing `sleep_until(deadline)` against a oneshot cancel channel.
//!
//! Entries carry a generation number. A timer that fires removes its entry
//! only if the generation still matches, so a late-firing timer never
//! removes (or runs in place of) a newer timer armed for the same session.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use mm_core::RequestId;
use mm_state::{MiddlemanRequest, RequestStatus};

struct TimerEntry {
    generation: u64,
    fire_at: DateTime<Utc>,
    cancel: oneshot::Sender<()>,
}

/// Registry of armed acceptance timers, keyed by session.
#[derive(Clone, Default)]
pub struct TimerRegistry {
    entries: Arc<Mutex<HashMap<RequestId, TimerEntry>>>,
    generations: Arc<AtomicU64>,
}

impl std::fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("armed", &self.armed_count())
            .finish()
    }
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` to run at `fire_at`. A timer already armed for `id`
    /// is cancelled first. A deadline in the past fires immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F, Fut>(&self, id: RequestId, fire_at: DateTime<Utc>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let deadline = tokio::time::Instant::now() + delay;
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        {
            let previous = self.entries.lock().insert(
                id,
                TimerEntry {
                    generation,
                    fire_at,
                    cancel: cancel_tx,
                },
            );
            if let Some(previous) = previous {
                let _ = previous.cancel.send(());
                tracing::debug!(request_id = %id, "re-armed acceptance timer");
            }
        }

        let registry = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    if registry.take_if_current(id, generation) {
                        tracing::debug!(request_id = %id, "acceptance timer fired");
                        action().await;
                    }
                }
                _ = cancel_rx => {}
            }
        });
    }

    /// Cancel the timer for `id`. Returns whether one was armed.
    pub fn cancel(&self, id: RequestId) -> bool {
        let removed = self.entries.lock().remove(&id);
        match removed {
            Some(entry) => {
                let _ = entry.cancel.send(());
                tracing::debug!(request_id = %id, "acceptance timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Re-arm timers for sessions that were awaiting acceptance when the
    /// process stopped. The deadline is `created_at + window`; sessions
    /// past it fire immediately. Returns the number of timers armed.
    pub fn rehydrate<'a, I, F, Fut>(&self, pending: I, window: Duration, on_fire: F) -> usize
    where
        I: IntoIterator<Item = &'a MiddlemanRequest>,
        F: Fn(RequestId) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut armed = 0;
        for session in pending {
            if session.status != RequestStatus::AwaitingAcceptance || session.is_resolved() {
                continue;
            }
            let id = session.id;
            let on_fire = on_fire.clone();
            self.arm(id, session.deadline(window), move || on_fire(id));
            armed += 1;
        }
        armed
    }

    pub fn armed_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_armed(&self, id: RequestId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Scheduled fire time for `id`, if armed.
    pub fn fire_at(&self, id: RequestId) -> Option<DateTime<Utc>> {
        self.entries.lock().get(&id).map(|e| e.fire_at)
    }

    fn take_if_current(&self, id: RequestId, generation: u64) -> bool {
        let mut entries = self.entries.lock();
        let current = entries.get(&id).is_some_and(|e| e.generation == generation);
        if current {
            entries.remove(&id);
        }
        current
    }
}
