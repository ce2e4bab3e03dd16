//! Defensive accessors over semi-structured resource objects.
//!
//! Every accessor tolerates missing fields; callers decide what absence
//! means.

use serde_json::Value;

pub fn uid(obj: &Value) -> Option<&str> {
    obj.get("metadata")
        .and_then(|m| m.get("uid"))
        .and_then(|v| v.as_str())
}

pub fn name(obj: &Value) -> Option<&str> {
    obj.get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(|v| v.as_str())
}

pub fn namespace(obj: &Value) -> Option<&str> {
    obj.get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(|v| v.as_str())
}

/// Stable identity of an object within its partition: the UID when the
/// server assigned one, the name otherwise.
pub fn identity(obj: &Value) -> Option<&str> {
    uid(obj).or_else(|| name(obj))
}

pub fn kind(obj: &Value) -> Option<&str> {
    obj.get("kind").and_then(|v| v.as_str())
}

pub fn creation_timestamp(obj: &Value) -> Option<&str> {
    obj.get("metadata")
        .and_then(|m| m.get("creationTimestamp"))
        .and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_prefers_uid() {
        let obj = json!({"metadata": {"uid": "u1", "name": "web"}});
        assert_eq!(identity(&obj), Some("u1"));
    }

    #[test]
    fn identity_falls_back_to_name() {
        let obj = json!({"metadata": {"name": "web"}});
        assert_eq!(identity(&obj), Some("web"));
    }

    #[test]
    fn accessors_tolerate_absence() {
        let obj = json!({"spec": {}});
        assert_eq!(identity(&obj), None);
        assert_eq!(namespace(&obj), None);
        assert_eq!(kind(&obj), None);
        assert_eq!(creation_timestamp(&json!(null)), None);
    }
}
