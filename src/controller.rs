//! State aggregator: owns the three processors and gates their lifecycle
//!
//! `run` starts the watch feeds, blocks on the initial-sync barrier, then
//! starts the workers and parks until shutdown. The three resource kinds
//! proceed fully in parallel with each other; each kind reconciles
//! sequentially.

use crate::config::ControllerConfig;
use crate::processor::{EventStream, Processor};
use crate::queue::WorkQueue;
use crate::reconcile::{EndpointsReconciler, IngressReconciler, Reconcile, SecretsReconciler};
use crate::state::{SharedState, Snapshot};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Secret};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::{reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A processor paired with the watch feed that drives it.
pub struct ProcessorKit<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    pub processor: Arc<Processor<K>>,
    pub feed: EventStream<K>,
}

impl<K> ProcessorKit<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    /// Wires a reflector-backed replica for `api` to a fresh processor.
    fn watch(
        kind: &'static str,
        api: Api<K>,
        reconciler: Box<dyn Reconcile<K>>,
        config: &ControllerConfig,
    ) -> Self {
        let (store, writer) = reflector::store();
        let feed = reflector(writer, watcher(api, watcher::Config::default())).boxed();
        let queue = Arc::new(WorkQueue::with_delays(
            kind,
            Duration::from_millis(config.retry_base_ms),
            RETRY_MAX_DELAY,
        ));
        let processor = Arc::new(Processor::new(
            kind,
            store,
            reconciler,
            queue,
            config.retry_budget,
        ));
        Self { processor, feed }
    }
}

/// Cheap handle answering "has the initial listing completed for every
/// kind", used by the readiness probe and the config read path.
#[derive(Clone)]
pub struct ReadyGate {
    flags: Vec<Arc<AtomicBool>>,
}

impl ReadyGate {
    pub fn new(flags: Vec<Arc<AtomicBool>>) -> Self {
        Self { flags }
    }

    pub fn is_ready(&self) -> bool {
        self.flags.iter().all(|flag| flag.load(Ordering::SeqCst))
    }
}

struct Feeds {
    ingresses: EventStream<Ingress>,
    endpoints: EventStream<Endpoints>,
    secrets: EventStream<Secret>,
}

pub struct Controller {
    state: Arc<SharedState>,
    ingresses: Arc<Processor<Ingress>>,
    endpoints: Arc<Processor<Endpoints>>,
    secrets: Arc<Processor<Secret>>,
    feeds: Mutex<Option<Feeds>>,
    stopped: Mutex<bool>,
}

impl Controller {
    pub fn new(client: Client, config: &ControllerConfig) -> Self {
        let state = Arc::new(SharedState::new());

        let ingresses = ProcessorKit::watch(
            "ingress",
            scoped_api(&client, config),
            Box::new(IngressReconciler::new(
                Arc::clone(&state),
                config.class.clone(),
                config.selector.clone(),
            )),
            config,
        );
        let endpoints = ProcessorKit::watch(
            "endpoints",
            scoped_api(&client, config),
            Box::new(EndpointsReconciler::new(Arc::clone(&state))),
            config,
        );
        let secrets = ProcessorKit::watch(
            "secret",
            scoped_api(&client, config),
            Box::new(SecretsReconciler::new(Arc::clone(&state))),
            config,
        );

        Self::assemble(state, ingresses, endpoints, secrets)
    }

    /// Builds a controller from pre-wired processors and feeds.
    pub fn assemble(
        state: Arc<SharedState>,
        ingresses: ProcessorKit<Ingress>,
        endpoints: ProcessorKit<Endpoints>,
        secrets: ProcessorKit<Secret>,
    ) -> Self {
        Self {
            state,
            ingresses: ingresses.processor,
            endpoints: endpoints.processor,
            secrets: secrets.processor,
            feeds: Mutex::new(Some(Feeds {
                ingresses: ingresses.feed,
                endpoints: endpoints.feed,
                secrets: secrets.feed,
            })),
            stopped: Mutex::new(false),
        }
    }

    /// Runs the controller until `shutdown` is cancelled.
    ///
    /// Watch feeds start immediately; workers only start after every
    /// replica has completed its initial listing, so the first rendered
    /// configuration is built from a full picture rather than a partial
    /// one.
    pub async fn run(&self, shutdown: CancellationToken) {
        let Some(feeds) = lock_recover(&self.feeds).take() else {
            warn!("controller already running");
            return;
        };

        let mut tasks = vec![
            tokio::spawn(Arc::clone(&self.ingresses).run_feed(feeds.ingresses, shutdown.clone())),
            tokio::spawn(Arc::clone(&self.endpoints).run_feed(feeds.endpoints, shutdown.clone())),
            tokio::spawn(Arc::clone(&self.secrets).run_feed(feeds.secrets, shutdown.clone())),
        ];

        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("shutdown before initial sync");
            }
            _ = self.wait_for_sync() => {
                info!("all replicas synced, starting workers");
                tasks.push(tokio::spawn(Arc::clone(&self.ingresses).run_worker()));
                tasks.push(tokio::spawn(Arc::clone(&self.endpoints).run_worker()));
                tasks.push(tokio::spawn(Arc::clone(&self.secrets).run_worker()));
                shutdown.cancelled().await;
            }
        }

        self.stop();
        // Workers drain their queues before exiting; in-flight passes are
        // finished, not interrupted
        for task in tasks {
            let _ = task.await;
        }
        info!("controller stopped");
    }

    /// Shuts the three queues down exactly once; repeated calls are
    /// harmless.
    pub fn stop(&self) {
        let mut stopped = lock_recover(&self.stopped);
        if !*stopped {
            *stopped = true;
            self.ingresses.queue().shut_down();
            self.endpoints.queue().shut_down();
            self.secrets.queue().shut_down();
        }
    }

    /// True only once every replica reports its initial listing complete.
    /// Never resets.
    pub fn has_synced(&self) -> bool {
        self.ingresses.has_synced() && self.endpoints.has_synced() && self.secrets.has_synced()
    }

    pub fn ready_gate(&self) -> ReadyGate {
        ReadyGate::new(vec![
            self.ingresses.synced_flag(),
            self.endpoints.synced_flag(),
            self.secrets.synced_flag(),
        ])
    }

    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    async fn wait_for_sync(&self) {
        while !self.has_synced() {
            tokio::time::sleep(SYNC_POLL_INTERVAL).await;
        }
    }
}

fn scoped_api<K>(client: &Client, config: &ControllerConfig) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    match &config.namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

fn lock_recover<'a, T>(lock: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
