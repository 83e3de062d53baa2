use super::{Cache, NAMESPACE_INDEX, Store};

/// A read-only, namespace-scoped view over a [`Cache`].
///
/// Listers own no state beyond their scope; rebinding to another namespace
/// is a cheap clone sharing the same backing cache.
pub struct Lister<T> {
    cache: Cache<T>,
    namespace: Option<String>,
}

impl<T: Clone + 'static> Lister<T> {
    /// A view over all namespaces.
    pub fn new(cache: Cache<T>) -> Self {
        Lister {
            cache,
            namespace: None,
        }
    }

    /// Rebind the view to a single namespace.
    pub fn namespaced(&self, namespace: impl Into<String>) -> Self {
        Lister {
            cache: self.cache.clone(),
            namespace: Some(namespace.into()),
        }
    }

    /// Rebind the view back to all namespaces.
    pub fn all(&self) -> Self {
        Lister {
            cache: self.cache.clone(),
            namespace: None,
        }
    }

    /// The objects within the view's scope.
    pub fn list(&self) -> Vec<T> {
        match &self.namespace {
            None => self.cache.list(),
            Some(namespace) => self.cache.by_index(NAMESPACE_INDEX, namespace),
        }
    }

    /// Look an object up by name. Outside a namespace scope, the name is
    /// taken to be the full store key.
    pub fn get(&self, name: &str) -> Option<T> {
        match &self.namespace {
            None => self.cache.get_by_key(name),
            Some(namespace) => self.cache.get_by_key(&format!("{namespace}/{name}")),
        }
    }
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
    fn scoped_listing() {
        let cache = Cache::new();
        cache.add(pod("default", "echo")).unwrap();
        cache.add(pod("default", "relay")).unwrap();
        cache.add(pod("jobs", "sweeper")).unwrap();

        let lister = Lister::new(cache);
        assert_eq!(lister.list().len(), 3);
        assert_eq!(lister.namespaced("default").list().len(), 2);
        assert_eq!(lister.namespaced("jobs").list().len(), 1);
        assert!(lister.namespaced("empty").list().is_empty());
    }

    #[test]
    fn scoped_get_builds_the_key() {
        let cache = Cache::new();
        cache.add(pod("default", "echo")).unwrap();

        let lister = Lister::new(cache);
        assert!(lister.namespaced("default").get("echo").is_some());
        assert!(lister.namespaced("jobs").get("echo").is_none());

        // unscoped lookups take the full key
        assert!(lister.get("default/echo").is_some());
        assert!(lister.get("echo").is_none());
    }

    #[test]
    fn rebinding_shares_the_cache() {
        let cache = Cache::new();
        let scoped = Lister::new(cache.clone()).namespaced("default");

        cache.add(pod("default", "late")).unwrap();
        assert_eq!(scoped.list().len(), 1);
        assert_eq!(scoped.all().list().len(), 1);
    }
}
