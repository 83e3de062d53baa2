use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use super::{Error, IndexFn, KeyFn, NAMESPACE_INDEX, Store, namespace_index, object_key};
use crate::resource::Metadata;

/// One named index: an extracted value mapped to the keys of the objects
/// exhibiting it.
type ValueSets = HashMap<String, BTreeSet<String>>;

struct Inner<T> {
    key_fn: KeyFn<T>,
    items: HashMap<String, T>,
    indexers: HashMap<String, IndexFn<T>>,
    indices: HashMap<String, ValueSets>,
}

/// A thread-safe object store with named secondary indices.
///
/// One mutex guards the items and every index together, so readers always
/// observe a state in which the indices agree exactly with the items. All
/// operations are synchronous and never perform I/O under the lock; clones
/// of a `Cache` share the same underlying store.
pub struct Cache<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Cache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Metadata + 'static> Default for Cache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Metadata + 'static> Cache<T> {
    /// A cache keyed by `<namespace>/<name>` and indexed by namespace.
    pub fn new() -> Self {
        let mut indexers: HashMap<String, IndexFn<T>> = HashMap::new();
        indexers.insert(NAMESPACE_INDEX.to_string(), Box::new(namespace_index::<T>));

        Self::with_key_fn(object_key::<T>, indexers)
    }
}

impl<T: 'static> Cache<T> {
    /// A cache with a caller supplied key function and set of indexers.
    pub fn with_key_fn(
        key_fn: impl Fn(&T) -> Result<String, Error> + Send + Sync + 'static,
        indexers: HashMap<String, IndexFn<T>>,
    ) -> Self {
        let indices = indexers
            .keys()
            .map(|name| (name.clone(), ValueSets::default()))
            .collect();

        Cache {
            inner: Arc::new(Mutex::new(Inner {
                key_fn: Box::new(key_fn),
                items: HashMap::new(),
                indexers,
                indices,
            })),
        }
    }

    /// Registers additional named index functions.
    ///
    /// A new index starts empty and is only populated by subsequent
    /// mutations; existing objects are not indexed retroactively. A name
    /// that is already registered has its function replaced and its index
    /// data reset.
    pub fn add_indexers(&self, indexers: HashMap<String, IndexFn<T>>) {
        let mut guard = self.inner.lock().unwrap();

        for (name, index_fn) in indexers {
            guard.indices.insert(name.clone(), ValueSets::default());
            guard.indexers.insert(name, index_fn);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().items.is_empty()
    }

    fn upsert(&self, object: T) -> Result<(), Error> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        let key = (inner.key_fn)(&object)?;

        // Derive every index delta before touching anything, so a failing
        // index function cannot leave partial state behind.
        let previous = inner.items.get(&key);
        let mut deltas = Vec::with_capacity(inner.indexers.len());
        for (name, index_fn) in &inner.indexers {
            let fresh = index_fn(&object)?.into_iter().collect::<BTreeSet<_>>();
            let stale = match previous {
                Some(previous) => index_fn(previous)?.into_iter().collect(),
                None => BTreeSet::new(),
            };

            deltas.push((name.clone(), stale, fresh));
        }

        inner.items.insert(key.clone(), object);

        for (name, stale, fresh) in deltas {
            // unchanged value sets leave the index alone, which subsumes
            // the common case of a single unchanged value
            if stale == fresh {
                continue;
            }

            let index = inner.indices.entry(name).or_default();
            for value in stale.difference(&fresh) {
                if let Some(keys) = index.get_mut(value) {
                    keys.remove(&key);
                    if keys.is_empty() {
                        index.remove(value);
                    }
                }
            }
            for value in fresh.difference(&stale) {
                index
                    .entry(value.clone())
                    .or_default()
                    .insert(key.clone());
            }
        }

        Ok(())
    }

    fn remove(&self, object: &T) -> Result<(), Error> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        let key = (inner.key_fn)(object)?;
        let Some(existing) = inner.items.get(&key) else {
            // deleting what we never stored is not an error
            return Ok(());
        };

        let mut removals = Vec::with_capacity(inner.indexers.len());
        for (name, index_fn) in &inner.indexers {
            removals.push((name.clone(), index_fn(existing)?));
        }

        inner.items.remove(&key);

        for (name, values) in removals {
            let Some(index) = inner.indices.get_mut(&name) else {
                continue;
            };

            for value in values {
                if let Some(keys) = index.get_mut(&value) {
                    keys.remove(&key);
                    if keys.is_empty() {
                        index.remove(&value);
                    }
                }
            }
        }

        Ok(())
    }
}

impl<T: Clone> Cache<T> {
    /// All objects sharing any index value with `probe` under the named
    /// index, de-duplicated. Unknown index names yield an empty result.
    pub fn index(&self, index_name: &str, probe: &T) -> Result<Vec<T>, Error> {
        let guard = self.inner.lock().unwrap();

        let Some(index_fn) = guard.indexers.get(index_name) else {
            return Ok(Vec::new());
        };
        let values = index_fn(probe)?;
        let Some(index) = guard.indices.get(index_name) else {
            return Ok(Vec::new());
        };

        let mut keys = BTreeSet::new();
        for value in values {
            if let Some(set) = index.get(&value) {
                keys.extend(set.iter().cloned());
            }
        }

        Ok(keys
            .iter()
            .filter_map(|key| guard.items.get(key).cloned())
            .collect())
    }

    /// The keys of the objects carrying `value` under the named index.
    pub fn index_keys(&self, index_name: &str, value: &str) -> Vec<String> {
        let guard = self.inner.lock().unwrap();

        guard
            .indices
            .get(index_name)
            .and_then(|index| index.get(value))
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The objects carrying `value` under the named index. Unknown index
    /// names and values yield an empty result.
    pub fn by_index(&self, index_name: &str, value: &str) -> Vec<T> {
        let guard = self.inner.lock().unwrap();

        guard
            .indices
            .get(index_name)
            .and_then(|index| index.get(value))
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| guard.items.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<T: Clone + 'static> Store<T> for Cache<T> {
    fn add(&self, object: T) -> Result<(), Error> {
        self.upsert(object)
    }

    fn update(&self, object: T) -> Result<(), Error> {
        self.upsert(object)
    }

    fn delete(&self, object: &T) -> Result<(), Error> {
        self.remove(object)
    }

    fn list(&self) -> Vec<T> {
        let guard = self.inner.lock().unwrap();
        guard.items.values().cloned().collect()
    }

    fn list_keys(&self) -> Vec<String> {
        let guard = self.inner.lock().unwrap();
        guard.items.keys().cloned().collect()
    }

    fn get(&self, object: &T) -> Result<Option<T>, Error> {
        let guard = self.inner.lock().unwrap();
        let key = (guard.key_fn)(object)?;
        Ok(guard.items.get(&key).cloned())
    }

    fn get_by_key(&self, key: &str) -> Option<T> {
        let guard = self.inner.lock().unwrap();
        guard.items.get(key).cloned()
    }

    fn replace(&self, objects: Vec<T>, _resource_version: &str) -> Result<(), Error> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        // Build the replacement state on the side; the swap at the end is
        // the only mutation, so a bad object leaves the store untouched.
        let mut items = HashMap::with_capacity(objects.len());
        for object in objects {
            let key = (inner.key_fn)(&object)?;
            items.insert(key, object);
        }

        let mut indices: HashMap<String, ValueSets> = inner
            .indexers
            .keys()
            .map(|name| (name.clone(), ValueSets::default()))
            .collect();
        for (key, object) in &items {
            for (name, index_fn) in &inner.indexers {
                for value in index_fn(object)? {
                    indices
                        .entry(name.clone())
                        .or_default()
                        .entry(value)
                        .or_default()
                        .insert(key.clone());
                }
            }
        }

        inner.items = items;
        inner.indices = indices;

        Ok(())
    }

    fn resync(&self) -> Result<(), Error> {
        Ok(())
    }
}
