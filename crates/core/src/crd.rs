//! Custom-type descriptors derived from registry (CRD) objects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Group suffix marking platform-internal types that are never watched.
pub const INTERNAL_GROUP_SUFFIX: &str = "k8s.io";

/// Everything the engine needs to watch one discovered custom type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub group: String,
    pub version: String,
    pub plural: String,
    /// Kind name as declared; may be empty when the entry omits it.
    pub kind: String,
    pub scope: TypeScope,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TypeScope {
    Cluster,
    Namespaced,
}

impl TypeDescriptor {
    pub fn namespaced(&self) -> bool {
        matches!(self.scope, TypeScope::Namespaced)
    }
}

/// Derives the watchable descriptor for one registry entry.
///
/// Returns `None` when the type is skipped: empty or platform-internal
/// group, no usable version, or no plural name. Version selection prefers
/// the first version flagged `served` and falls back to the first listed.
pub fn descriptor_from_crd(obj: &Value) -> Option<TypeDescriptor> {
    let spec = obj.get("spec")?;
    let group = spec.get("group").and_then(|v| v.as_str()).unwrap_or("");
    if group.is_empty() || group.ends_with(INTERNAL_GROUP_SUFFIX) {
        return None;
    }
    let versions = spec.get("versions").and_then(|v| v.as_array())?;
    let version = versions
        .iter()
        .find(|v| {
            v.get("served")
                .and_then(|s| s.as_bool())
                .unwrap_or(false)
        })
        .or_else(|| versions.first())?
        .get("name")
        .and_then(|v| v.as_str())
        .filter(|name| !name.is_empty())?;
    let names = spec.get("names")?;
    let plural = names
        .get("plural")
        .and_then(|v| v.as_str())
        .filter(|p| !p.is_empty())?;
    let kind = names
        .get("kind")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let scope = match spec.get("scope").and_then(|v| v.as_str()) {
        Some("Cluster") => TypeScope::Cluster,
        _ => TypeScope::Namespaced,
    };
    Some(TypeDescriptor {
        group: group.to_string(),
        version: version.to_string(),
        plural: plural.to_string(),
        kind,
        scope,
    })
}
