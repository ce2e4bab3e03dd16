//! Namespace-membership oracles.
//!
//! The manager asks its oracle which of the cluster's namespaces belong to
//! the active set whenever the namespace partition changes. Oracle failures
//! keep the last known good answer.

use async_trait::async_trait;

/// Decides which namespaces the engine watches namespaced kinds in.
#[async_trait]
pub trait NamespaceOracle: Send + Sync {
    /// `all` is the sorted list of namespace names currently in the cache.
    async fn active_namespaces(&self, all: &[String]) -> anyhow::Result<Vec<String>>;
}

/// Watches every namespace the cluster has.
pub struct AllNamespaces;

#[async_trait]
impl NamespaceOracle for AllNamespaces {
    async fn active_namespaces(&self, all: &[String]) -> anyhow::Result<Vec<String>> {
        Ok(all.to_vec())
    }
}

/// Fixed allowlist, intersected with the namespaces that actually exist.
pub struct StaticNamespaces(Vec<String>);

impl StaticNamespaces {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(names.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl NamespaceOracle for StaticNamespaces {
    async fn active_namespaces(&self, all: &[String]) -> anyhow::Result<Vec<String>> {
        Ok(all
            .iter()
            .filter(|ns| self.0.contains(*ns))
            .cloned()
            .collect())
    }
}
