mod cache;
mod lister;

pub use cache::Cache;
pub use lister::Lister;

use super::resource::Metadata;

/// The index every default-constructed [`Cache`] carries, mapping a
/// namespace to the objects inside it.
pub const NAMESPACE_INDEX: &str = "namespace";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A key or index function could not derive its output from an object.
    /// This is always a defect in the object (or in the caller's choice of
    /// functions), never a transient condition, so it is surfaced to the
    /// mutating call and nothing is retried.
    #[error("invalid object, {0}")]
    InvalidObject(String),
}

/// Derives the stable store key of an object.
pub type KeyFn<T> = Box<dyn Fn(&T) -> Result<String, Error> + Send + Sync>;

/// Derives zero or more index values from an object.
pub type IndexFn<T> = Box<dyn Fn(&T) -> Result<Vec<String>, Error> + Send + Sync>;

/// The conventional key of an object: `<namespace>/<name>`, or the bare name
/// for objects without a namespace.
pub fn object_key<T: Metadata>(object: &T) -> Result<String, Error> {
    let metadata = object.metadata();
    if metadata.name.is_empty() {
        return Err(Error::InvalidObject("object has no name".into()));
    }

    if metadata.namespace.is_empty() {
        Ok(metadata.name.clone())
    } else {
        Ok(format!("{}/{}", metadata.namespace, metadata.name))
    }
}

/// The index function behind [`NAMESPACE_INDEX`].
pub fn namespace_index<T: Metadata>(object: &T) -> Result<Vec<String>, Error> {
    Ok(vec![object.metadata().namespace.clone()])
}

/// The contract of an object container keyed by a [`KeyFn`].
///
/// `add` and `update` resolve to the same upsert; deleting an absent object
/// is a no-op; `list` and `list_keys` are point-in-time snapshots, not live
/// views. A reflector drives any `Store` through `update`, `delete` and
/// `replace`.
pub trait Store<T> {
    fn add(&self, object: T) -> Result<(), Error>;

    fn update(&self, object: T) -> Result<(), Error>;

    fn delete(&self, object: &T) -> Result<(), Error>;

    fn list(&self) -> Vec<T>;

    fn list_keys(&self) -> Vec<String>;

    fn get(&self, object: &T) -> Result<Option<T>, Error>;

    fn get_by_key(&self, key: &str) -> Option<T>;

    /// Atomically discard the current content and rebuild it from `objects`.
    /// The resource version is bookkeeping for the caller; the store does
    /// not interpret it.
    fn replace(&self, objects: Vec<T>, resource_version: &str) -> Result<(), Error>;

    /// Hook for periodic re-delivery to downstream consumers. Stores hold
    /// no timers; this does nothing unless an implementation says otherwise.
    fn resync(&self) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ObjectMeta, Pod};

    fn pod(namespace: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn namespaced_key() {
        let key = object_key(&pod("default", "echo")).unwrap();
        assert_eq!(key, "default/echo");
    }

    #[test]
    fn cluster_scoped_key() {
        let key = object_key(&pod("", "node-1")).unwrap();
        assert_eq!(key, "node-1");
    }

    #[test]
    fn nameless_object_is_invalid() {
        assert!(object_key(&pod("default", "")).is_err());
    }
}
