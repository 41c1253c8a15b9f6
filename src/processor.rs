//! Generic watch-reconcile processor, one instance per resource kind
//!
//! Consumes the reflector-backed event stream for one kind, folds change
//! notifications into the coalescing queue, and drives the kind's
//! reconciler from a single sequential worker. Payloads are never queued:
//! a key is looked up in the local replica at processing time, so a stale
//! key for a vanished object naturally takes the delete path.

use crate::error::ReconcileError;
use crate::metrics::{RECONCILE_DURATION, RECONCILIATIONS_TOTAL};
use crate::queue::WorkQueue;
use crate::reconcile::Reconcile;
use crate::state::ObjectId;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::{self, Event};
use kube::{Resource, ResourceExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watch events for one resource kind, as emitted downstream of the
/// reflector that maintains the local replica.
pub type EventStream<K> = BoxStream<'static, Result<Event<K>, watcher::Error>>;

pub struct Processor<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    kind: &'static str,
    store: Store<K>,
    queue: Arc<WorkQueue>,
    reconciler: Box<dyn Reconcile<K>>,
    synced: Arc<AtomicBool>,
    retry_budget: u32,
}

impl<K> Processor<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    pub fn new(
        kind: &'static str,
        store: Store<K>,
        reconciler: Box<dyn Reconcile<K>>,
        queue: Arc<WorkQueue>,
        retry_budget: u32,
    ) -> Self {
        Self {
            kind,
            store,
            queue,
            reconciler,
            synced: Arc::new(AtomicBool::new(false)),
            retry_budget,
        }
    }

    /// True once the initial full listing has completed. Latched: later
    /// watch disconnects are papered over by the replica and do not reset
    /// this.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    pub fn synced_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.synced)
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Folds the watch feed into the queue until cancelled or the stream
    /// ends.
    pub async fn run_feed(
        self: Arc<Self>,
        mut events: EventStream<K>,
        shutdown: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                Ok(Event::Apply(obj)) | Ok(Event::InitApply(obj)) => self.enqueue(&obj),
                Ok(Event::Delete(obj)) => self.enqueue(&obj),
                Ok(Event::Init) => debug!(kind = self.kind, "relisting"),
                Ok(Event::InitDone) => {
                    if !self.synced.swap(true, Ordering::SeqCst) {
                        info!(kind = self.kind, "initial sync complete");
                    }
                }
                Err(error) => {
                    // The watcher reconnects on its own; nothing is lost
                    warn!(kind = self.kind, %error, "watch feed disconnected");
                }
            }
        }
        debug!(kind = self.kind, "watch feed stopped");
    }

    fn enqueue(&self, obj: &K) {
        let Some(name) = obj.meta().name.clone() else {
            warn!(kind = self.kind, "dropping event for object without a name");
            return;
        };
        let namespace = obj.namespace().unwrap_or_default();
        self.queue.add(ObjectId::new(namespace, name));
    }

    /// Sequential consumer: reconciliation within one kind never overlaps
    /// itself. Exits once the queue is shut down and drained.
    pub async fn run_worker(self: Arc<Self>) {
        while let Some(key) = self.queue.get().await {
            let started = Instant::now();
            match self.reconcile(&key) {
                Ok(()) => {
                    self.queue.forget(&key);
                    RECONCILIATIONS_TOTAL
                        .with_label_values(&[self.kind, "ok"])
                        .inc();
                }
                Err(error) if self.queue.num_requeues(&key) < self.retry_budget => {
                    debug!(kind = self.kind, object = %key, %error, "reconcile failed, requeueing");
                    RECONCILIATIONS_TOTAL
                        .with_label_values(&[self.kind, "error"])
                        .inc();
                    self.queue.add_rate_limited(key.clone());
                }
                Err(error) => {
                    // Retry budget exhausted: drop the key, never the process
                    warn!(kind = self.kind, object = %key, %error, "reconcile failed, giving up");
                    RECONCILIATIONS_TOTAL
                        .with_label_values(&[self.kind, "dropped"])
                        .inc();
                    self.queue.forget(&key);
                }
            }
            RECONCILE_DURATION
                .with_label_values(&[self.kind])
                .observe(started.elapsed().as_secs_f64());
            self.queue.done(&key);
        }
        debug!(kind = self.kind, "worker stopped");
    }

    /// One reconcile pass: present in the replica drives the apply path,
    /// absent drives the delete path.
    fn reconcile(&self, key: &ObjectId) -> Result<(), ReconcileError> {
        let obj_ref = ObjectRef::new(&key.name).within(&key.namespace);
        match self.store.get(&obj_ref) {
            Some(obj) => self.reconciler.apply(&obj),
            None => self.reconciler.delete(key),
        }
    }
}
