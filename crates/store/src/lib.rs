//! Skua store: per-(kind, namespace) cache partitions.
//!
//! The store carries no locking of its own. Its owner serializes all
//! mutation on one control task and hands readers snapshot copies, so a
//! returned `Vec` never observes later mutation.

#![forbid(unsafe_code)]

pub mod debounce;

pub use debounce::Debounce;

use rustc_hash::FxHashMap;
use serde_json::Value;
use skua_core::{fields, BuiltinKind, ResourceId, WatchKey};

type Partition = FxHashMap<String, Value>;

/// Partitioned identity-to-object cache, addressed by watcher key.
#[derive(Debug, Default)]
pub struct ResourceStore {
    partitions: FxHashMap<WatchKey, Partition>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-or-replace by identity. Returns true on a first-time
    /// insertion into the partition.
    pub fn upsert(&mut self, key: &WatchKey, identity: &str, object: Value) -> bool {
        let partition = self.partitions.entry(key.clone()).or_default();
        partition.insert(identity.to_string(), object).is_none()
    }

    /// Removes by identity; no-op when the partition or identity is
    /// absent. Returns whether an object was removed.
    pub fn remove(&mut self, key: &WatchKey, identity: &str) -> bool {
        self.partitions
            .get_mut(key)
            .map(|partition| partition.remove(identity).is_some())
            .unwrap_or(false)
    }

    /// Snapshot of one partition; empty when absent.
    pub fn get_all(&self, key: &WatchKey) -> Vec<Value> {
        self.partitions
            .get(key)
            .map(|partition| partition.values().cloned().collect())
            .unwrap_or_default()
    }

    /// One namespace's partition of a built-in kind, or the union of all
    /// of that kind's partitions when no namespace is requested.
    pub fn get_builtin(&self, kind: BuiltinKind, namespace: Option<&str>) -> Vec<Value> {
        match namespace {
            Some(ns) => self.get_all(&WatchKey::builtin_in(kind, ns)),
            None => {
                let mut out = Vec::new();
                for (key, partition) in &self.partitions {
                    if key.resource == ResourceId::BuiltIn(kind) {
                        out.extend(partition.values().cloned());
                    }
                }
                out
            }
        }
    }

    /// Objects of one custom type. When a namespace is requested and a
    /// matching partition is not keyed by it, falls back to filtering
    /// objects by their own namespace field.
    pub fn get_custom(
        &self,
        group: &str,
        version: &str,
        plural: &str,
        namespace: Option<&str>,
    ) -> Vec<Value> {
        let mut out = Vec::new();
        for (key, partition) in &self.partitions {
            let matches_type = matches!(
                &key.resource,
                ResourceId::Custom { group: g, version: v, plural: p }
                    if g == group && v == version && p == plural
            );
            if !matches_type {
                continue;
            }
            match namespace {
                None => out.extend(partition.values().cloned()),
                Some(ns) if key.namespace.as_deref() == Some(ns) => {
                    out.extend(partition.values().cloned())
                }
                Some(ns) => out.extend(
                    partition
                        .values()
                        .filter(|obj| fields::namespace(obj) == Some(ns))
                        .cloned(),
                ),
            }
        }
        out
    }

    /// Every object whose collection name starts with `prefix`, across
    /// all namespaces.
    pub fn get_matching(&self, prefix: &str) -> Vec<Value> {
        let mut out = Vec::new();
        for (key, partition) in &self.partitions {
            if key.resource.matches_prefix(prefix) {
                out.extend(partition.values().cloned());
            }
        }
        out
    }

    /// Object counts per partition, for dashboards.
    pub fn partition_counts(&self) -> Vec<(WatchKey, usize)> {
        self.partitions
            .iter()
            .map(|(key, partition)| (key.clone(), partition.len()))
            .collect()
    }

    /// Empties a partition but keeps it addressable (watcher retirement).
    pub fn clear_partition(&mut self, key: &WatchKey) {
        if let Some(partition) = self.partitions.get_mut(key) {
            partition.clear();
        }
    }

    /// Removes a partition entirely (namespace retirement).
    pub fn drop_partition(&mut self, key: &WatchKey) {
        self.partitions.remove(key);
    }

    /// Empties every partition (context switch).
    pub fn clear_all(&mut self) {
        self.partitions.clear();
    }
}
