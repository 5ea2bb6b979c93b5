//! Enablement gate.
//!
//! The engine runs only while at least one `OpenStackLoadBalanceService`
//! exists. The gate watches that kind for the whole process lifetime and
//! starts or stops the engine on every change. A running engine owns its
//! pool index, advertisement cache, cancellation token and tasks; stopping
//! drops all of them together.

use crate::cache::AdvertisementCache;
use crate::error::ControllerError;
use crate::metrics::EngineMetrics;
use crate::node::KubeNodeLister;
use crate::pool_index::PoolIndex;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crds::{AdvKind, OpenStackLoadBalanceService, IP_ADDRESS_POOL};
use futures::StreamExt;
use kube::api::{DynamicObject, ListParams};
use kube::{Api, Client};
use kube_runtime::{watcher, WatchStreamExt};
use neutron_client::NetworkClientTrait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Starts the engine's tasks under a cancellation token.
#[async_trait::async_trait]
pub trait EngineLauncher: Send + Sync {
    /// Spawn every engine task; each must exit once `cancel` fires.
    async fn launch(&self, cancel: CancellationToken) -> Result<Vec<JoinHandle<()>>, ControllerError>;
}

/// Launches the real engine against the cluster and Neutron.
pub struct KubeEngineLauncher {
    client: Client,
    network_client: Arc<dyn NetworkClientTrait>,
    metrics: EngineMetrics,
}

impl std::fmt::Debug for KubeEngineLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEngineLauncher")
            .field("network", &self.network_client.base_url())
            .finish_non_exhaustive()
    }
}

impl KubeEngineLauncher {
    pub fn new(
        client: Client,
        network_client: Arc<dyn NetworkClientTrait>,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            client,
            network_client,
            metrics,
        }
    }

    /// Fail early when a MetalLB resource is not served by the cluster.
    async fn check_resources(&self) -> Result<(), ControllerError> {
        let resources = AdvKind::ALL
            .iter()
            .map(|kind| kind.resource())
            .chain(std::iter::once(IP_ADDRESS_POOL));
        for resource in resources {
            let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource.api_resource());
            api.list(&ListParams::default().limit(1))
                .await
                .map_err(|e| {
                    ControllerError::Watch(format!("cannot watch {}: {}", resource, e))
                })?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl EngineLauncher for KubeEngineLauncher {
    async fn launch(&self, cancel: CancellationToken) -> Result<Vec<JoinHandle<()>>, ControllerError> {
        self.check_resources().await?;

        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let reconciler = Arc::new(Reconciler::new(
            self.network_client.clone(),
            Arc::new(KubeNodeLister::new(self.client.clone())),
            Arc::new(PoolIndex::with_notifier(changes_tx)),
            Arc::new(AdvertisementCache::new()),
            self.metrics.clone(),
        ));
        let watcher = Watcher::new(reconciler.clone(), self.client.clone());

        let mut tasks = Vec::with_capacity(AdvKind::ALL.len() + 2);
        for kind in AdvKind::ALL {
            let watcher = watcher.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = watcher.watch_advertisements(kind, cancel).await {
                    error!("{} watcher failed: {}", kind, e);
                }
            }));
        }

        {
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = watcher.watch_pools(cancel).await {
                    error!("IPAddressPool watcher failed: {}", e);
                }
            }));
        }

        tasks.push(tokio::spawn(reconciler.run_pool_requeue(changes_rx, cancel)));
        Ok(tasks)
    }
}

/// A started engine.
struct RunningEngine {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Starts the engine while enablement objects exist.
pub struct LifecycleGate {
    launcher: Arc<dyn EngineLauncher>,
    running: Mutex<Option<RunningEngine>>,
    root: CancellationToken,
    metrics: EngineMetrics,
    stop_timeout: Duration,
}

impl std::fmt::Debug for LifecycleGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleGate")
            .field("running", &self.metrics.is_running())
            .finish_non_exhaustive()
    }
}

impl LifecycleGate {
    /// Creates a gate whose engines are children of `root`.
    pub fn new(
        launcher: Arc<dyn EngineLauncher>,
        metrics: EngineMetrics,
        root: CancellationToken,
    ) -> Self {
        Self {
            launcher,
            running: Mutex::new(None),
            root,
            metrics,
            stop_timeout: STOP_TIMEOUT,
        }
    }

    /// Bound on how long a stop waits for engine tasks before aborting them.
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Converge the engine state to `enablement_count`. Idempotent.
    pub async fn ensure(&self, enablement_count: usize) {
        let mut running = self.running.lock().await;

        match (enablement_count, running.is_some()) {
            (0, true) => {
                info!("No enablement objects left, stopping engine");
                if let Some(engine) = running.take() {
                    self.stop(engine).await;
                }
                self.metrics.set_running(false);
            }
            (0, false) => debug!("No enablement objects; engine stays idle"),
            (_, true) => debug!("{} enablement object(s); engine already running", enablement_count),
            (_, false) => {
                info!("{} enablement object(s), starting engine", enablement_count);
                let cancel = self.root.child_token();
                match self.launcher.launch(cancel.clone()).await {
                    Ok(tasks) => {
                        info!("Engine started with {} task(s)", tasks.len());
                        *running = Some(RunningEngine { cancel, tasks });
                        self.metrics.set_running(true);
                    }
                    Err(e) => {
                        // Left idle; the next enablement event retries
                        error!("Failed to start engine: {}", e);
                        cancel.cancel();
                    }
                }
            }
        }
    }

    async fn stop(&self, engine: RunningEngine) {
        engine.cancel.cancel();
        for mut task in engine.tasks {
            if tokio::time::timeout(self.stop_timeout, &mut task).await.is_err() {
                warn!("Engine task did not stop within {:?}, aborting", self.stop_timeout);
                task.abort();
            }
        }
        info!("Engine stopped");
    }

    /// Stop the engine if running, regardless of enablement objects.
    pub async fn shutdown(&self) {
        if let Some(engine) = self.running.lock().await.take() {
            self.stop(engine).await;
        }
        self.metrics.set_running(false);
    }

    /// Watch enablement objects until the root token is cancelled.
    ///
    /// `ready` is cancelled once the watch loop is running.
    pub async fn run(
        &self,
        api: Api<OpenStackLoadBalanceService>,
        ready: CancellationToken,
    ) -> Result<(), ControllerError> {
        info!("Starting OpenStackLoadBalanceService watcher");
        let mut stream =
            Box::pin(watcher(api.clone(), watcher::Config::default()).default_backoff());
        ready.cancel();

        loop {
            let next = tokio::select! {
                _ = self.root.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(watcher::Event::Apply(_) | watcher::Event::Delete(_) | watcher::Event::InitDone)) => {
                    match api.list(&ListParams::default()).await {
                        Ok(list) => self.ensure(list.items.len()).await,
                        Err(e) => error!("Failed to list OpenStackLoadBalanceService objects: {}", e),
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => error!("OpenStackLoadBalanceService watch error (retrying): {}", e),
                None => {
                    self.shutdown().await;
                    return Err(ControllerError::Watch(
                        "OpenStackLoadBalanceService watch stream ended".to_string(),
                    ));
                }
            }
        }

        self.shutdown().await;
        info!("OpenStackLoadBalanceService watcher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Launcher spawning one task that waits for cancellation
    #[derive(Default)]
    struct CountingLauncher {
        launches: AtomicUsize,
        stopped: Arc<AtomicUsize>,
        failing: AtomicBool,
        ignore_cancel: AtomicBool,
    }

    #[async_trait::async_trait]
    impl EngineLauncher for CountingLauncher {
        async fn launch(&self, cancel: CancellationToken) -> Result<Vec<JoinHandle<()>>, ControllerError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ControllerError::Watch("metallb CRDs missing".to_string()));
            }
            self.launches.fetch_add(1, Ordering::SeqCst);

            let stopped = self.stopped.clone();
            let ignore_cancel = self.ignore_cancel.load(Ordering::SeqCst);
            Ok(vec![tokio::spawn(async move {
                if ignore_cancel {
                    std::future::pending::<()>().await;
                }
                cancel.cancelled().await;
                stopped.fetch_add(1, Ordering::SeqCst);
            })])
        }
    }

    fn test_gate(launcher: Arc<CountingLauncher>) -> (LifecycleGate, EngineMetrics, CancellationToken) {
        let metrics = EngineMetrics::new().unwrap();
        let root = CancellationToken::new();
        let gate = LifecycleGate::new(launcher, metrics.clone(), root.clone())
            .with_stop_timeout(Duration::from_millis(100));
        (gate, metrics, root)
    }

    #[tokio::test]
    async fn test_start_stop_is_idempotent() {
        let launcher = Arc::new(CountingLauncher::default());
        let (gate, metrics, _root) = test_gate(launcher.clone());

        gate.ensure(0).await;
        assert!(!gate.is_running().await);

        gate.ensure(1).await;
        gate.ensure(2).await;
        assert!(gate.is_running().await);
        assert!(metrics.is_running());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);

        gate.ensure(0).await;
        gate.ensure(0).await;
        assert!(!gate.is_running().await);
        assert!(!metrics.is_running());
        assert_eq!(launcher.stopped.load(Ordering::SeqCst), 1);

        // A fresh engine after re-enabling
        gate.ensure(1).await;
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_launch_stays_idle() {
        let launcher = Arc::new(CountingLauncher::default());
        launcher.failing.store(true, Ordering::SeqCst);
        let (gate, metrics, _root) = test_gate(launcher.clone());

        gate.ensure(1).await;
        assert!(!gate.is_running().await);
        assert!(!metrics.is_running());

        launcher.failing.store(false, Ordering::SeqCst);
        gate.ensure(1).await;
        assert!(gate.is_running().await);
    }

    #[tokio::test]
    async fn test_root_cancel_reaches_engine() {
        let launcher = Arc::new(CountingLauncher::default());
        let (gate, _metrics, root) = test_gate(launcher.clone());

        gate.ensure(1).await;
        root.cancel();
        gate.shutdown().await;

        assert_eq!(launcher.stopped.load(Ordering::SeqCst), 1);
        assert!(!gate.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_aborts_stuck_tasks() {
        let launcher = Arc::new(CountingLauncher::default());
        launcher.ignore_cancel.store(true, Ordering::SeqCst);
        let (gate, _metrics, _root) = test_gate(launcher.clone());

        gate.ensure(1).await;
        tokio::time::timeout(Duration::from_secs(5), gate.ensure(0))
            .await
            .unwrap();

        assert!(!gate.is_running().await);
        assert_eq!(launcher.stopped.load(Ordering::SeqCst), 0);
    }
}
