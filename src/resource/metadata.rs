use std::collections::BTreeMap;

use serde::Deserialize;

/// ObjectMeta is metadata that all persisted resources must have.
///
/// Fields which are absent on the wire decode to their empty values, so
/// consumers can read them without unwrapping.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ObjectMeta {
    /// Name must be unique within a namespace.
    ///
    /// More info: https://kubernetes.io/docs/concepts/overview/working-with-objects/names#names
    #[serde(default)]
    pub name: String,

    /// Namespace defines the space within which each name must be unique.
    /// An empty namespace is equivalent to the "default" namespace, but
    /// "default" is the canonical representation. Resources which are not
    /// namespaced leave this empty.
    #[serde(default)]
    pub namespace: String,

    /// An opaque value that represents the internal version of this object
    /// that can be used by clients to determine when objects have changed.
    /// May be used for optimistic concurrency, change detection, and the
    /// watch operation on a resource or set of resources.
    #[serde(default, rename = "resourceVersion")]
    pub resource_version: String,

    /// UID is the unique in time and space value for this object.
    #[serde(default)]
    pub uid: String,

    /// Map of string keys and values that can be used to organize and
    /// categorize (scope and select) objects.
    ///
    /// More info: https://kubernetes.io/docs/concepts/overview/working-with-objects/labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Annotations is an unstructured key value map stored with a resource
    /// that may be set by external tools.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// ListMeta describes metadata that synthetic resources must have, including
/// lists.
#[derive(Debug, Default, Deserialize)]
pub struct ListMeta {
    /// The resource version of the collection, used to resume a watch where
    /// the list left off.
    #[serde(default, rename = "resourceVersion")]
    pub resource_version: Option<String>,

    /// A token to retrieve the next page of a chunked list. Empty or absent
    /// when the list is complete.
    #[serde(default)]
    pub r#continue: Option<String>,
}
