//! Deduplicating queue of application keys awaiting reconciliation.
//!
//! A key sits in the queue at most once. A key added again while a worker is
//! processing it is held back until that worker calls [`WorkQueue::done`], so
//! at most one pass per key is ever in flight.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::debug;
use tokio::sync::{watch, Notify};

const BASE_RETRY_DELAY: Duration = Duration::from_millis(5);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(1000);

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        WorkQueue {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                shutdown_tx,
                shutdown_rx,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // The state is left consistent by every critical section, so a poisoned lock is still usable
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add(&self, key: &str) {
        {
            let mut state = self.state();
            if state.shutting_down || state.dirty.contains(key) {
                return;
            }
            state.dirty.insert(key.to_string());
            if state.processing.contains(key) {
                return;
            }
            state.queue.push_back(key.to_string());
        }
        self.inner.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed, unless the queue shuts down first.
    pub fn add_after(&self, key: &str, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay == Duration::from_secs(0) {
            self.add(key);
            return;
        }

        let queue = self.clone();
        let key = key.to_string();
        let mut shutdown = self.inner.shutdown_rx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => queue.add(&key),
                _ = shutdown.changed() => debug!("Dropping delayed add of '{}' on shutdown", key),
            }
        });
    }

    /// Add `key` after a delay that doubles with every consecutive failure of that key.
    pub fn add_rate_limited(&self, key: &str) {
        let delay = {
            let mut state = self.state();
            let failures = state.failures.entry(key.to_string()).or_insert(0);
            let exponent = (*failures).min(31);
            *failures += 1;
            BASE_RETRY_DELAY
                .checked_mul(1u32 << exponent)
                .map(|delay| delay.min(MAX_RETRY_DELAY))
                .unwrap_or(MAX_RETRY_DELAY)
        };
        self.add_after(key, delay);
    }

    /// Stop tracking failures of `key`, resetting its backoff.
    pub fn forget(&self, key: &str) {
        self.state().failures.remove(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.state().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Mark the pass over `key` finished, re-queueing it if it was added meanwhile.
    pub fn done(&self, key: &str) {
        let requeued = {
            let mut state = self.state();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.to_string());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        let _ = self.inner.shutdown_tx.send(true);
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}
