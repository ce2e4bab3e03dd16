//! Skua client: a live, queryable mirror of one cluster context.
//!
//! `ClusterClient` owns a single manager task that supervises every watch
//! stream, folds their events into the cache, and debounces change
//! notifications. Getters hand out snapshot copies and never fail.

#![forbid(unsafe_code)]

mod manager;
pub mod oracle;

pub use oracle::{AllNamespaces, NamespaceOracle, StaticNamespaces};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use arc_swap::ArcSwap;
use serde_json::Value;
use skua_core::{qualified_collection, BuiltinKind, QueryError, WatchKey};
use skua_kubectl::Kubectl;
use skua_store::ResourceStore;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use manager::{Command, Manager};

/// Engine tunables. The defaults are the normative production values;
/// tests compress them.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub kubectl: Kubectl,
    /// Fixed delay before a failed or ended watcher is replaced.
    pub restart_delay: Duration,
    /// Settle window armed by first-time insertions.
    pub settle_window: Duration,
    /// Trailing quiet period restarted by every cache mutation.
    pub debounce_window: Duration,
    /// Capacity of the adapter events channel.
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let queue_capacity = std::env::var("SKUA_QUEUE_CAP")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(2048);
        Self {
            kubectl: Kubectl::new(),
            restart_delay: Duration::from_secs(5),
            settle_window: Duration::from_millis(50),
            debounce_window: Duration::from_millis(100),
            queue_capacity,
        }
    }
}

/// State shared between the manager task and the read surface.
pub(crate) struct Shared {
    store: Mutex<ResourceStore>,
    active_namespaces: ArcSwap<Vec<String>>,
    changed: watch::Sender<u64>,
    deviations: watch::Sender<u64>,
    transactions: watch::Sender<u64>,
}

impl Shared {
    fn new() -> Self {
        Self {
            store: Mutex::new(ResourceStore::new()),
            active_namespaces: ArcSwap::from_pointee(Vec::new()),
            changed: watch::channel(0).0,
            deviations: watch::channel(0).0,
            transactions: watch::channel(0).0,
        }
    }

    // Getters must not fail; a poisoned lock still yields the data.
    pub(crate) fn with_store<T>(&self, f: impl FnOnce(&ResourceStore) -> T) -> T {
        let guard = self
            .store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    pub(crate) fn with_store_mut<T>(&self, f: impl FnOnce(&mut ResourceStore) -> T) -> T {
        let mut guard = self
            .store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub(crate) fn set_active_namespaces(&self, namespaces: Vec<String>) {
        self.active_namespaces.store(Arc::new(namespaces));
    }

    pub(crate) fn fire_changed(&self) {
        metrics::counter!("skua_change_signals_total", 1);
        self.changed.send_modify(|epoch| *epoch += 1);
    }

    pub(crate) fn fire_deviations(&self) {
        self.deviations.send_modify(|epoch| *epoch += 1);
    }

    pub(crate) fn fire_transactions(&self) {
        self.transactions.send_modify(|epoch| *epoch += 1);
    }
}

/// Live mirror of one cluster context.
///
/// All watcher and cache mutation happens on the manager task this handle
/// spawns; dropping the handle aborts it.
pub struct ClusterClient {
    shared: Arc<Shared>,
    kubectl: Kubectl,
    commands: mpsc::Sender<Command>,
    manager: JoinHandle<()>,
}

impl ClusterClient {
    pub fn new(config: ClientConfig) -> Self {
        let shared = Arc::new(Shared::new());
        let (commands, commands_rx) = mpsc::channel(64);
        let kubectl = config.kubectl.clone();
        let manager = Manager::spawn(config, shared.clone(), commands.clone(), commands_rx);
        Self {
            shared,
            kubectl,
            commands,
            manager,
        }
    }

    /// Provisions the always-on watchers (custom-type registry,
    /// namespaces, persistent volumes) and, when an oracle is configured,
    /// runs the first namespaced reconciliation.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.send_and_wait(|done| Command::Bootstrap { done }).await
    }

    /// Stops every watcher and ends the manager task.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.send_and_wait(|done| Command::Shutdown { done }).await
    }

    /// (Re)configures the namespace-membership oracle and immediately
    /// recomputes the active set and the namespaced watcher set.
    pub async fn set_oracle(&self, oracle: Arc<dyn NamespaceOracle>) -> anyhow::Result<()> {
        self.send_and_wait(|done| Command::SetOracle { oracle, done })
            .await
    }

    /// Switches cluster context: runs the tool's context switch, then
    /// tears down every watcher, clears every partition, and re-runs
    /// bootstrap. The cache reads as empty until events flow again.
    pub async fn switch_context(&self, name: &str) -> anyhow::Result<()> {
        self.kubectl.use_context(name).await?;
        self.send_and_wait(|done| Command::Rebootstrap { done })
            .await
    }

    pub async fn current_context(&self) -> String {
        self.kubectl.current_context().await
    }

    pub async fn available_contexts(&self) -> Result<Vec<String>, QueryError> {
        self.kubectl.available_contexts().await
    }

    /// One-shot registry listing, bypassing the cache.
    pub async fn list_custom_resource_definitions(&self) -> Result<Vec<Value>, QueryError> {
        self.kubectl
            .list(BuiltinKind::CustomResourceDefinitions.collection(), None)
            .await
    }

    /// One-shot listing of a cluster-scoped custom collection.
    pub async fn list_cluster_custom(
        &self,
        group: &str,
        version: &str,
        plural: &str,
    ) -> Result<Vec<Value>, QueryError> {
        self.kubectl
            .list(&qualified_collection(group, version, plural), None)
            .await
    }

    /// One-shot listing of a namespaced custom collection.
    pub async fn list_namespaced_custom(
        &self,
        group: &str,
        version: &str,
        plural: &str,
        namespace: &str,
    ) -> Result<Vec<Value>, QueryError> {
        self.kubectl
            .list(&qualified_collection(group, version, plural), Some(namespace))
            .await
    }

    /// Snapshot of one built-in kind, optionally namespace-filtered.
    pub fn resources(&self, kind: BuiltinKind, namespace: Option<&str>) -> Vec<Value> {
        self.shared
            .with_store(|store| store.get_builtin(kind, namespace))
    }

    pub fn crds(&self) -> Vec<Value> {
        self.resources(BuiltinKind::CustomResourceDefinitions, None)
    }

    pub fn namespaces(&self) -> Vec<Value> {
        self.resources(BuiltinKind::Namespaces, None)
    }

    pub fn persistent_volumes(&self) -> Vec<Value> {
        self.resources(BuiltinKind::PersistentVolumes, None)
    }

    /// Snapshot of one custom type, optionally namespace-filtered.
    pub fn custom_resources(
        &self,
        group: &str,
        version: &str,
        plural: &str,
        namespace: Option<&str>,
    ) -> Vec<Value> {
        self.shared
            .with_store(|store| store.get_custom(group, version, plural, namespace))
    }

    /// Everything whose collection name starts with `prefix`, across all
    /// namespaces.
    pub fn resources_matching(&self, prefix: &str) -> Vec<Value> {
        self.shared.with_store(|store| store.get_matching(prefix))
    }

    /// Per-partition object counts, for dashboards.
    pub fn partition_counts(&self) -> Vec<(WatchKey, usize)> {
        self.shared.with_store(|store| store.partition_counts())
    }

    /// Current active namespace set (lock-free snapshot).
    pub fn active_namespaces(&self) -> Arc<Vec<String>> {
        self.shared.active_namespaces.load_full()
    }

    /// Generic "resources changed" signal: the value is an epoch counter
    /// bumped on every debounced fire.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.shared.changed.subscribe()
    }

    /// Immediate signal for deviation records.
    pub fn subscribe_deviations(&self) -> watch::Receiver<u64> {
        self.shared.deviations.subscribe()
    }

    /// Immediate signal for transaction-result records.
    pub fn subscribe_transactions(&self) -> watch::Receiver<u64> {
        self.shared.transactions.subscribe()
    }

    async fn send_and_wait(
        &self,
        make: impl FnOnce(oneshot::Sender<()>) -> Command,
    ) -> anyhow::Result<()> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(make(done))
            .await
            .map_err(|_| anyhow!("manager task stopped"))?;
        wait.await.map_err(|_| anyhow!("manager task stopped"))?;
        Ok(())
    }
}

impl Drop for ClusterClient {
    fn drop(&mut self) {
        self.manager.abort();
    }
}
