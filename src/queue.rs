//! Coalescing, rate-limited work queue of object keys
//!
//! Semantics follow the client-go workqueue: a key enqueued while already
//! pending collapses into the existing entry, and a key enqueued while in
//! flight is parked and re-delivered once the in-flight pass completes.
//! Reconcilers therefore may never see every intermediate state of an
//! object, only its latest.

use crate::state::ObjectId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

struct Inner {
    /// Delivery order of pending keys
    order: VecDeque<ObjectId>,
    /// Keys waiting for delivery (dedup set over `order` plus keys parked
    /// behind an in-flight pass)
    dirty: HashSet<ObjectId>,
    /// Keys currently being processed
    processing: HashSet<ObjectId>,
    /// Per-key failure counts, cleared by `forget`
    requeues: HashMap<ObjectId, u32>,
    shutting_down: bool,
}

/// Work queue with pending-set/in-flight-set deduplication and exponential
/// per-key retry delays.
pub struct WorkQueue {
    name: &'static str,
    inner: Mutex<Inner>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

impl WorkQueue {
    pub fn new(name: &'static str) -> Self {
        Self::with_delays(name, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }

    pub fn with_delays(name: &'static str, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner {
                order: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                requeues: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            base_delay,
            max_delay,
        }
    }

    /// Enqueues a key. A key already pending is not re-added; a key in
    /// flight is parked and re-delivered after its current pass finishes.
    pub fn add(&self, key: ObjectId) {
        let mut inner = self.lock();
        if inner.shutting_down || inner.dirty.contains(&key) {
            return;
        }
        inner.dirty.insert(key.clone());
        if !inner.processing.contains(&key) {
            inner.order.push_back(key);
            self.notify.notify_one();
        }
    }

    /// Re-enqueues a failed key after an exponential backoff delay.
    pub fn add_rate_limited(self: &Arc<Self>, key: ObjectId) {
        let attempts = {
            let mut inner = self.lock();
            let attempts = inner.requeues.entry(key.clone()).or_insert(0);
            *attempts += 1;
            *attempts
        };
        let delay = self.backoff(attempts);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// How many times `key` has been requeued since it last succeeded.
    pub fn num_requeues(&self, key: &ObjectId) -> u32 {
        self.lock().requeues.get(key).copied().unwrap_or(0)
    }

    /// Clears the retry count for a key that succeeded or was dropped.
    pub fn forget(&self, key: &ObjectId) {
        self.lock().requeues.remove(key);
    }

    /// Retrieves the next key, waiting until one is available. Returns
    /// `None` once the queue has been shut down and drained.
    pub async fn get(&self) -> Option<ObjectId> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(key) = inner.order.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks a delivered key as processed. If the key was re-added while in
    /// flight it goes back into delivery order.
    pub fn done(&self, key: &ObjectId) {
        let mut inner = self.lock();
        inner.processing.remove(key);
        if inner.dirty.contains(key) {
            inner.order.push_back(key.clone());
            self.notify.notify_one();
        }
        // Unblock a waiter that may need to observe drained shutdown
        if inner.shutting_down {
            self.notify.notify_waiters();
        }
    }

    /// Stops accepting new work. Already-pending keys remain deliverable so
    /// the worker can drain before exiting.
    pub fn shut_down(&self) {
        let mut inner = self.lock();
        if !inner.shutting_down {
            inner.shutting_down = true;
            tracing::debug!(queue = self.name, "work queue shutting down");
        }
        drop(inner);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(
                queue = self.name,
                "queue mutex poisoned, recovering (data is still valid)"
            );
            poisoned.into_inner()
        })
    }
}
