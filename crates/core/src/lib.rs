//! Skua core types: watch events, watcher keys, and the error taxonomy.

#![forbid(unsafe_code)]

pub mod crd;
pub mod fields;
pub mod kinds;

pub use crd::{descriptor_from_crd, TypeDescriptor, TypeScope};
pub use kinds::BuiltinKind;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One decoded record from a watch stream, or a lifecycle notice from the
/// adapter that produced it.
#[derive(Debug)]
pub enum WatchEvent {
    Added(Value),
    Updated(Value),
    Deleted(Value),
    Error(WatchError),
    /// The underlying subprocess exited (cleanly or not). The adapter does
    /// not restart itself; its owner decides.
    Ended,
}

impl WatchEvent {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Updated(_) => "updated",
            WatchEvent::Deleted(_) => "deleted",
            WatchEvent::Error(_) => "error",
            WatchEvent::Ended => "ended",
        }
    }
}

/// Failures reported by a watch stream adapter while its stream is live.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("undecodable watch line `{line}`: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("watch stream reported: {0}")]
    Stream(String),
}

/// Failures reported by one-shot queries against the cluster.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("`{command}` produced unparseable output: {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// What one watcher watches: a row of the built-in kind table or a
/// discovered custom type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ResourceId {
    BuiltIn(BuiltinKind),
    Custom {
        group: String,
        version: String,
        plural: String,
    },
}

/// Fully qualified collection argument for a custom type, in the
/// `plural.version.group` form the query tool expects.
pub fn qualified_collection(group: &str, version: &str, plural: &str) -> String {
    format!("{plural}.{version}.{group}")
}

impl ResourceId {
    /// Collection argument handed to the query tool: the table name for
    /// built-in kinds, the fully qualified form for custom types.
    pub fn collection(&self) -> String {
        match self {
            ResourceId::BuiltIn(kind) => kind.collection().to_string(),
            ResourceId::Custom {
                group,
                version,
                plural,
            } => qualified_collection(group, version, plural),
        }
    }

    pub fn matches_prefix(&self, prefix: &str) -> bool {
        match self {
            ResourceId::BuiltIn(kind) => kind.collection().starts_with(prefix),
            ResourceId::Custom { plural, .. } => plural.starts_with(prefix),
        }
    }
}

/// Identifies one running watch stream and its cache partition. Equality is
/// componentwise; `namespace == None` denotes cluster scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WatchKey {
    pub resource: ResourceId,
    pub namespace: Option<String>,
}

impl WatchKey {
    pub fn builtin(kind: BuiltinKind) -> Self {
        Self {
            resource: ResourceId::BuiltIn(kind),
            namespace: None,
        }
    }

    pub fn builtin_in(kind: BuiltinKind, namespace: impl Into<String>) -> Self {
        Self {
            resource: ResourceId::BuiltIn(kind),
            namespace: Some(namespace.into()),
        }
    }

    pub fn custom(desc: &TypeDescriptor, namespace: Option<String>) -> Self {
        Self {
            resource: ResourceId::Custom {
                group: desc.group.clone(),
                version: desc.version.clone(),
                plural: desc.plural.clone(),
            },
            namespace,
        }
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}@{}", self.resource.collection(), ns),
            None => write!(f, "{}", self.resource.collection()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_collection_is_fully_qualified() {
        let id = ResourceId::Custom {
            group: "example.com".into(),
            version: "v1".into(),
            plural: "widgets".into(),
        };
        assert_eq!(id.collection(), "widgets.v1.example.com");
    }

    #[test]
    fn keys_differ_by_namespace() {
        let a = WatchKey::builtin_in(BuiltinKind::Pods, "a");
        let b = WatchKey::builtin_in(BuiltinKind::Pods, "b");
        let cluster = WatchKey::builtin(BuiltinKind::Pods);
        assert_ne!(a, b);
        assert_ne!(a, cluster);
        assert_eq!(a, WatchKey::builtin_in(BuiltinKind::Pods, "a"));
    }

    #[test]
    fn key_display_names_collection_and_namespace() {
        let key = WatchKey::builtin_in(BuiltinKind::Pods, "team-a");
        assert_eq!(key.to_string(), "pods@team-a");
        assert_eq!(
            WatchKey::builtin(BuiltinKind::Namespaces).to_string(),
            "namespaces"
        );
    }
}
