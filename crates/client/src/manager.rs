//! The watcher lifecycle manager.
//!
//! One task owns every watch stream adapter, the custom-type registry, and
//! the active namespace set. Adapters post decoded events into a single
//! channel; the manager folds them into the store, pokes the debouncers,
//! and reconciles the watcher set when the registry or the namespace list
//! changes. Nothing else mutates any of this state.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use skua_core::{
    descriptor_from_crd, fields, kinds, BuiltinKind, ResourceId, TypeDescriptor, WatchEvent,
    WatchKey,
};
use skua_kubectl::WatchStream;
use skua_store::Debounce;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::oracle::NamespaceOracle;
use crate::{ClientConfig, Shared};

/// Custom kinds whose changes also fire an immediate signal, outside the
/// debounced path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecialKind {
    Deviation,
    TransactionResult,
}

impl SpecialKind {
    fn of(desc: &TypeDescriptor) -> Option<Self> {
        match desc.kind.as_str() {
            "Deviation" => Some(SpecialKind::Deviation),
            "TransactionResult" => Some(SpecialKind::TransactionResult),
            _ => None,
        }
    }
}

/// One supervised adapter. Owned exclusively by the manager.
struct RegisteredWatcher {
    adapter: WatchStream,
    special: Option<SpecialKind>,
    restart_pending: bool,
}

/// Requests from the `ClusterClient` handle (and from delayed restart
/// tasks) to the manager task.
pub(crate) enum Command {
    Bootstrap {
        done: oneshot::Sender<()>,
    },
    Rebootstrap {
        done: oneshot::Sender<()>,
    },
    SetOracle {
        oracle: Arc<dyn NamespaceOracle>,
        done: oneshot::Sender<()>,
    },
    Restart {
        key: WatchKey,
        epoch: u64,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

pub(crate) struct Manager {
    config: ClientConfig,
    shared: Arc<Shared>,
    commands: mpsc::Receiver<Command>,
    commands_tx: mpsc::Sender<Command>,
    events: mpsc::Receiver<(WatchKey, WatchEvent)>,
    events_tx: mpsc::Sender<(WatchKey, WatchEvent)>,
    watchers: FxHashMap<WatchKey, RegisteredWatcher>,
    types: FxHashMap<String, TypeDescriptor>,
    oracle: Option<Arc<dyn NamespaceOracle>>,
    active: Vec<String>,
    /// Bumped on every teardown; restarts scheduled before a teardown
    /// carry the old value and are discarded.
    epoch: u64,
}

impl Manager {
    pub(crate) fn spawn(
        config: ClientConfig,
        shared: Arc<Shared>,
        commands_tx: mpsc::Sender<Command>,
        commands: mpsc::Receiver<Command>,
    ) -> JoinHandle<()> {
        let (events_tx, events) = mpsc::channel(config.queue_capacity);
        let manager = Manager {
            config,
            shared,
            commands,
            commands_tx,
            events,
            events_tx,
            watchers: FxHashMap::default(),
            types: FxHashMap::default(),
            oracle: None,
            active: Vec::new(),
            epoch: 0,
        };
        tokio::spawn(manager.run())
    }

    async fn run(mut self) {
        let mut settle = Debounce::settle(self.config.settle_window);
        let mut trailing = Debounce::trailing(self.config.debounce_window);
        loop {
            tokio::select! {
                maybe = self.commands.recv() => {
                    match maybe {
                        Some(command) => {
                            if self.handle_command(command).await {
                                return;
                            }
                        }
                        None => break,
                    }
                }
                maybe = self.events.recv() => {
                    if let Some((key, event)) = maybe {
                        self.handle_event(key, event, &mut settle, &mut trailing).await;
                    }
                }
                _ = settle.ready() => {
                    if settle.take() {
                        self.shared.fire_changed();
                    }
                }
                _ = trailing.ready() => {
                    if trailing.take() {
                        self.shared.fire_changed();
                    }
                }
            }
        }
        self.teardown();
    }

    /// Returns true when the manager should exit.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Bootstrap { done } => {
                self.bootstrap().await;
                let _ = done.send(());
            }
            Command::Rebootstrap { done } => {
                info!("context switched, rebuilding watcher set");
                self.teardown();
                self.bootstrap().await;
                let _ = done.send(());
            }
            Command::SetOracle { oracle, done } => {
                self.oracle = Some(oracle);
                self.refresh_active_namespaces().await;
                self.reconcile();
                let _ = done.send(());
            }
            Command::Restart { key, epoch } => self.restart_watcher(key, epoch),
            Command::Shutdown { done } => {
                self.teardown();
                let _ = done.send(());
                return true;
            }
        }
        false
    }

    async fn handle_event(
        &mut self,
        key: WatchKey,
        event: WatchEvent,
        settle: &mut Debounce,
        trailing: &mut Debounce,
    ) {
        if !self.watchers.contains_key(&key) {
            // Output buffered by a watcher stopped moments ago.
            debug!(key = %key, event = event.label(), "dropping event for retired watcher");
            return;
        }
        let (object, deleted) = match event {
            WatchEvent::Added(object) | WatchEvent::Updated(object) => (object, false),
            WatchEvent::Deleted(object) => (object, true),
            WatchEvent::Error(err) => {
                warn!(key = %key, error = %err, "watch stream error");
                self.schedule_restart(&key);
                return;
            }
            WatchEvent::Ended => {
                warn!(key = %key, "watch stream ended");
                self.schedule_restart(&key);
                return;
            }
        };
        let Some(identity) = fields::identity(&object).map(str::to_string) else {
            warn!(key = %key, "dropping object without identity");
            return;
        };
        let route = route_of(&key);
        let descriptor = match route {
            Route::Registry if !deleted => descriptor_from_crd(&object),
            _ => None,
        };
        let inserted = self.shared.with_store_mut(|store| {
            if deleted {
                store.remove(&key, &identity);
                false
            } else {
                store.upsert(&key, &identity, object)
            }
        });
        trailing.poke();
        if inserted {
            settle.poke();
        }
        if let Some(special) = self.watchers.get(&key).and_then(|w| w.special) {
            match special {
                SpecialKind::Deviation => self.shared.fire_deviations(),
                SpecialKind::TransactionResult => self.shared.fire_transactions(),
            }
        }
        match route {
            Route::Registry => self.apply_registry_change(identity, descriptor, deleted),
            Route::Namespaces => {
                self.refresh_active_namespaces().await;
                self.reconcile();
            }
            Route::Plain => {}
        }
    }

    /// Provisions the always-on watchers, then runs the first namespaced
    /// reconciliation when an oracle is configured.
    async fn bootstrap(&mut self) {
        info!(epoch = self.epoch, "bootstrapping always-on watchers");
        for kind in kinds::ALWAYS_ON_KINDS {
            self.ensure_watcher(WatchKey::builtin(*kind), None);
        }
        if self.oracle.is_some() {
            self.refresh_active_namespaces().await;
            self.reconcile();
        }
    }

    /// Stops every adapter, clears every partition, and replaces the
    /// events channel so output buffered by stopped pumps cannot reach
    /// the next epoch.
    fn teardown(&mut self) {
        for (key, mut registered) in self.watchers.drain() {
            debug!(key = %key, "stopping watcher");
            registered.adapter.stop();
        }
        self.types.clear();
        self.active.clear();
        self.shared.set_active_namespaces(Vec::new());
        self.shared.with_store_mut(|store| store.clear_all());
        self.epoch += 1;
        let (events_tx, events) = mpsc::channel(self.config.queue_capacity);
        self.events_tx = events_tx;
        self.events = events;
    }

    /// Creates and starts a watcher for `key` unless one is registered.
    /// A spawn failure still registers the entry and schedules a retry.
    fn ensure_watcher(&mut self, key: WatchKey, special: Option<SpecialKind>) {
        if self.watchers.contains_key(&key) {
            return;
        }
        let mut adapter =
            WatchStream::new(self.config.kubectl.clone(), key.clone(), self.events_tx.clone());
        let failed = match adapter.start() {
            Ok(()) => false,
            Err(err) => {
                warn!(key = %key, error = %err, "watch stream failed to start");
                true
            }
        };
        self.watchers.insert(
            key.clone(),
            RegisteredWatcher {
                adapter,
                special,
                restart_pending: false,
            },
        );
        if failed {
            self.schedule_restart(&key);
        }
    }

    /// Arms one delayed restart for `key`; requests made while one is
    /// already pending are dropped.
    fn schedule_restart(&mut self, key: &WatchKey) {
        let Some(registered) = self.watchers.get_mut(key) else {
            return;
        };
        if registered.restart_pending {
            return;
        }
        registered.restart_pending = true;
        metrics::counter!("skua_watcher_restarts_total", 1);
        debug!(key = %key, delay = ?self.config.restart_delay, "restart scheduled");
        let commands = self.commands_tx.clone();
        let key = key.clone();
        let epoch = self.epoch;
        let delay = self.config.restart_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = commands.send(Command::Restart { key, epoch }).await;
        });
    }

    /// Replaces a watcher's adapter with a fresh one. Stopped is terminal
    /// per adapter, so a restart is always a new instance.
    fn restart_watcher(&mut self, key: WatchKey, epoch: u64) {
        if epoch != self.epoch {
            debug!(key = %key, "discarding restart from a previous epoch");
            return;
        }
        let Some(registered) = self.watchers.get_mut(&key) else {
            return;
        };
        registered.restart_pending = false;
        registered.adapter.stop();
        let mut adapter =
            WatchStream::new(self.config.kubectl.clone(), key.clone(), self.events_tx.clone());
        info!(key = %key, "restarting watch stream");
        let result = adapter.start();
        registered.adapter = adapter;
        if let Err(err) = result {
            warn!(key = %key, error = %err, "watch stream failed to restart");
            self.schedule_restart(&key);
        }
    }

    /// Folds one registry event into the type registry and brings the
    /// watcher set in line with it.
    fn apply_registry_change(
        &mut self,
        identity: String,
        descriptor: Option<TypeDescriptor>,
        deleted: bool,
    ) {
        if deleted {
            if let Some(old) = self.types.remove(&identity) {
                info!(group = %old.group, plural = %old.plural, "custom type removed, retiring watchers");
                self.retire_type(&old);
            }
            return;
        }
        match descriptor {
            Some(desc) => {
                if let Some(old) = self.types.insert(identity, desc.clone()) {
                    if old != desc {
                        info!(group = %desc.group, plural = %desc.plural, "custom type changed, retiring stale watchers");
                        self.retire_type(&old);
                    }
                }
                self.provision_type(&desc);
            }
            None => {
                // Skip policy or malformed entry. A previously watched
                // type may have mutated into this state.
                if let Some(old) = self.types.remove(&identity) {
                    info!(group = %old.group, plural = %old.plural, "custom type no longer watchable, retiring watchers");
                    self.retire_type(&old);
                } else {
                    debug!(crd = %identity, "registry entry not watchable");
                }
            }
        }
    }

    fn provision_type(&mut self, desc: &TypeDescriptor) {
        let special = SpecialKind::of(desc);
        if desc.namespaced() {
            for ns in self.active.clone() {
                self.ensure_watcher(WatchKey::custom(desc, Some(ns)), special);
            }
        } else {
            self.ensure_watcher(WatchKey::custom(desc, None), special);
        }
    }

    /// Stops and removes every watcher for one custom type. Retirement
    /// empties the type's partitions but keeps them addressable.
    fn retire_type(&mut self, desc: &TypeDescriptor) {
        let resource = ResourceId::Custom {
            group: desc.group.clone(),
            version: desc.version.clone(),
            plural: desc.plural.clone(),
        };
        let keys: Vec<WatchKey> = self
            .watchers
            .keys()
            .filter(|key| key.resource == resource)
            .cloned()
            .collect();
        for key in keys {
            if let Some(mut registered) = self.watchers.remove(&key) {
                registered.adapter.stop();
            }
            self.shared.with_store_mut(|store| store.clear_partition(&key));
        }
    }

    /// Recomputes the active set through the oracle. Oracle failure keeps
    /// the previous set untouched.
    async fn refresh_active_namespaces(&mut self) {
        let Some(oracle) = self.oracle.clone() else {
            return;
        };
        let mut all: Vec<String> = self
            .shared
            .with_store(|store| store.get_all(&WatchKey::builtin(BuiltinKind::Namespaces)))
            .into_iter()
            .filter_map(|obj| fields::name(&obj).map(str::to_string))
            .collect();
        all.sort();
        match oracle.active_namespaces(&all).await {
            Ok(mut active) => {
                active.sort();
                active.dedup();
                if active != self.active {
                    info!(namespaces = ?active, "active namespace set changed");
                }
                self.shared.set_active_namespaces(active.clone());
                self.active = active;
            }
            Err(err) => {
                warn!(error = %err, "namespace oracle failed, keeping previous active set");
            }
        }
    }

    /// Provisions missing (kind, namespace) watchers for built-in kinds
    /// and namespaced custom types, then removes watchers and partitions
    /// for namespaces that left the active set.
    fn reconcile(&mut self) {
        let active = self.active.clone();
        for kind in kinds::NAMESPACED_KINDS {
            for ns in &active {
                self.ensure_watcher(WatchKey::builtin_in(*kind, ns.as_str()), None);
            }
        }
        let types: Vec<TypeDescriptor> = self.types.values().cloned().collect();
        for desc in &types {
            self.provision_type(desc);
        }
        self.cleanup_stale_namespaces();
    }

    fn cleanup_stale_namespaces(&mut self) {
        let stale: Vec<WatchKey> = self
            .watchers
            .keys()
            .filter(|key| {
                key.namespace
                    .as_ref()
                    .map_or(false, |ns| !self.active.contains(ns))
            })
            .cloned()
            .collect();
        for key in stale {
            info!(key = %key, "namespace left the active set, dropping watcher");
            if let Some(mut registered) = self.watchers.remove(&key) {
                registered.adapter.stop();
            }
            self.shared.with_store_mut(|store| store.drop_partition(&key));
        }
    }
}

#[derive(Clone, Copy)]
enum Route {
    Registry,
    Namespaces,
    Plain,
}

/// The registry and namespace partitions feed reconciliation; everything
/// else only feeds the cache.
fn route_of(key: &WatchKey) -> Route {
    match &key.resource {
        ResourceId::BuiltIn(BuiltinKind::CustomResourceDefinitions) => Route::Registry,
        ResourceId::BuiltIn(BuiltinKind::Namespaces) => Route::Namespaces,
        _ => Route::Plain,
    }
}
