//! The built-in kind table driving the generic watcher registry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource kinds the engine knows how to watch without discovery.
///
/// The namespaced rows get one watcher per active namespace; the three
/// cluster rows are always-on and double as the discovery loops.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    CustomResourceDefinitions,
    Namespaces,
    PersistentVolumes,
    Pods,
    Services,
    ConfigMaps,
    Secrets,
    PersistentVolumeClaims,
    Endpoints,
    Deployments,
    ReplicaSets,
    StatefulSets,
    DaemonSets,
    Jobs,
    CronJobs,
    Ingresses,
}

/// Namespaced kinds reconciled against the active namespace set.
pub const NAMESPACED_KINDS: &[BuiltinKind] = &[
    BuiltinKind::Pods,
    BuiltinKind::Services,
    BuiltinKind::ConfigMaps,
    BuiltinKind::Secrets,
    BuiltinKind::PersistentVolumeClaims,
    BuiltinKind::Endpoints,
    BuiltinKind::Deployments,
    BuiltinKind::ReplicaSets,
    BuiltinKind::StatefulSets,
    BuiltinKind::DaemonSets,
    BuiltinKind::Jobs,
    BuiltinKind::CronJobs,
    BuiltinKind::Ingresses,
];

/// Cluster-scoped kinds watched unconditionally from bootstrap on.
pub const ALWAYS_ON_KINDS: &[BuiltinKind] = &[
    BuiltinKind::CustomResourceDefinitions,
    BuiltinKind::Namespaces,
    BuiltinKind::PersistentVolumes,
];

impl BuiltinKind {
    /// Collection name passed to the query tool.
    pub fn collection(self) -> &'static str {
        match self {
            BuiltinKind::CustomResourceDefinitions => "customresourcedefinitions",
            BuiltinKind::Namespaces => "namespaces",
            BuiltinKind::PersistentVolumes => "persistentvolumes",
            BuiltinKind::Pods => "pods",
            BuiltinKind::Services => "services",
            BuiltinKind::ConfigMaps => "configmaps",
            BuiltinKind::Secrets => "secrets",
            BuiltinKind::PersistentVolumeClaims => "persistentvolumeclaims",
            BuiltinKind::Endpoints => "endpoints",
            BuiltinKind::Deployments => "deployments",
            BuiltinKind::ReplicaSets => "replicasets",
            BuiltinKind::StatefulSets => "statefulsets",
            BuiltinKind::DaemonSets => "daemonsets",
            BuiltinKind::Jobs => "jobs",
            BuiltinKind::CronJobs => "cronjobs",
            BuiltinKind::Ingresses => "ingresses",
        }
    }

    pub fn namespaced(self) -> bool {
        !matches!(
            self,
            BuiltinKind::CustomResourceDefinitions
                | BuiltinKind::Namespaces
                | BuiltinKind::PersistentVolumes
        )
    }

    /// Parses a collection name or one of the common shorthands.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_ascii_lowercase();
        let kind = match s.as_str() {
            "customresourcedefinitions" | "crds" | "crd" => {
                BuiltinKind::CustomResourceDefinitions
            }
            "namespaces" | "ns" => BuiltinKind::Namespaces,
            "persistentvolumes" | "pv" => BuiltinKind::PersistentVolumes,
            "pods" | "pod" | "po" => BuiltinKind::Pods,
            "services" | "service" | "svc" => BuiltinKind::Services,
            "configmaps" | "configmap" | "cm" => BuiltinKind::ConfigMaps,
            "secrets" | "secret" => BuiltinKind::Secrets,
            "persistentvolumeclaims" | "pvc" => BuiltinKind::PersistentVolumeClaims,
            "endpoints" | "ep" => BuiltinKind::Endpoints,
            "deployments" | "deployment" | "deploy" => BuiltinKind::Deployments,
            "replicasets" | "replicaset" | "rs" => BuiltinKind::ReplicaSets,
            "statefulsets" | "statefulset" | "sts" => BuiltinKind::StatefulSets,
            "daemonsets" | "daemonset" | "ds" => BuiltinKind::DaemonSets,
            "jobs" | "job" => BuiltinKind::Jobs,
            "cronjobs" | "cronjob" | "cj" => BuiltinKind::CronJobs,
            "ingresses" | "ingress" | "ing" => BuiltinKind::Ingresses,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for BuiltinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_thirteen_namespaced_kinds() {
        assert_eq!(NAMESPACED_KINDS.len(), 13);
        assert!(NAMESPACED_KINDS.iter().all(|k| k.namespaced()));
        assert!(ALWAYS_ON_KINDS.iter().all(|k| !k.namespaced()));
    }

    #[test]
    fn parse_accepts_shorthands() {
        assert_eq!(BuiltinKind::parse("pods"), Some(BuiltinKind::Pods));
        assert_eq!(BuiltinKind::parse("po"), Some(BuiltinKind::Pods));
        assert_eq!(
            BuiltinKind::parse("CRDs"),
            Some(BuiltinKind::CustomResourceDefinitions)
        );
        assert_eq!(BuiltinKind::parse("widgets"), None);
    }
}
