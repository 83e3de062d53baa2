use serde::Deserialize;

use super::{Metadata, ObjectMeta};

/// An object of a kind that is not known at compile time.
///
/// Everything except the standard metadata is kept as raw JSON. Objects
/// missing `metadata.name` decode fine but cannot be keyed by a store, which
/// surfaces as `InvalidObject` at insertion time rather than a decode error.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DynamicObject {
    /// The version of the schema the object adheres to, e.g.
    /// "networking.k8s.io/v1".
    #[serde(default, rename = "apiVersion")]
    pub api_version: String,

    /// The kind of the object, e.g. "Ingress".
    #[serde(default)]
    pub kind: String,

    /// Standard object's metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// All remaining fields, untyped.
    #[serde(flatten)]
    pub data: serde_json::Value,
}

impl Metadata for DynamicObject {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_keeps_unknown_fields() {
        let data = r#"{
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "app-config", "namespace": "default" },
            "data": { "retention": "7d" }
        }"#;

        let object = serde_json::from_str::<DynamicObject>(data).unwrap();
        assert_eq!(object.kind, "ConfigMap");
        assert_eq!(object.metadata.name, "app-config");
        assert_eq!(object.data["data"]["retention"], "7d");
    }

    #[test]
    fn decode_without_name() {
        let object = serde_json::from_str::<DynamicObject>(r#"{"kind": "List"}"#).unwrap();
        assert!(object.metadata.name.is_empty());
    }
}
