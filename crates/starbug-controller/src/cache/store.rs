use crate::error::{ControllerError, Result};
use parking_lot::RwLock;
use starbug_core::Resource;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

/// Name of the index every store carries
pub const NAMESPACE_INDEX: &str = "namespace";

/// Computes the index values of an object
pub type IndexFunc<K> = Arc<dyn Fn(&K) -> Vec<String> + Send + Sync>;

/// A change applied to the store, as seen by event handlers
#[derive(Debug, Clone)]
pub enum StoreChange<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
}

struct StoreInner<K> {
    items: BTreeMap<String, Arc<K>>,
    // index name -> index value -> object keys
    indices: HashMap<String, HashMap<String, BTreeSet<String>>>,
}

/// Thread-safe, indexed local copy of a resource collection.
///
/// Objects are keyed by `namespace/name` and handed out as shared snapshots;
/// callers must clone before mutating.
pub struct Store<K> {
    indexers: HashMap<String, IndexFunc<K>>,
    inner: RwLock<StoreInner<K>>,
}

impl<K: Resource> Default for Store<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Resource> Store<K> {
    /// Create a store with only the namespace index
    pub fn new() -> Self {
        Self::with_indexers(Vec::new())
    }

    /// Create a store with additional named indexers
    pub fn with_indexers(indexers: Vec<(String, IndexFunc<K>)>) -> Self {
        let mut map: HashMap<String, IndexFunc<K>> = HashMap::new();
        map.insert(
            NAMESPACE_INDEX.to_string(),
            Arc::new(|obj: &K| vec![obj.namespace().to_string()]),
        );
        map.extend(indexers);

        let indices = map.keys().map(|name| (name.clone(), HashMap::new())).collect();

        Self {
            indexers: map,
            inner: RwLock::new(StoreInner {
                items: BTreeMap::new(),
                indices,
            }),
        }
    }

    /// Insert or replace an object, returning the previous snapshot
    pub fn add(&self, obj: impl Into<Arc<K>>) -> Result<Option<Arc<K>>> {
        let obj = obj.into();
        let key = obj.object_key()?;
        let mut inner = self.inner.write();
        Ok(self.insert_locked(&mut inner, key, obj))
    }

    /// Same as [`Store::add`]
    pub fn update(&self, obj: impl Into<Arc<K>>) -> Result<Option<Arc<K>>> {
        self.add(obj)
    }

    /// Remove an object, returning the removed snapshot
    pub fn delete(&self, obj: &K) -> Result<Option<Arc<K>>> {
        let key = obj.object_key()?;
        Ok(self.delete_by_key(&key))
    }

    /// Remove an object by key
    pub fn delete_by_key(&self, key: &str) -> Option<Arc<K>> {
        let mut inner = self.inner.write();
        self.remove_locked(&mut inner, key)
    }

    /// Look up an object by key
    pub fn get_by_key(&self, key: &str) -> Option<Arc<K>> {
        self.inner.read().items.get(key).cloned()
    }

    /// All objects, ordered by key
    pub fn list(&self) -> Vec<Arc<K>> {
        self.inner.read().items.values().cloned().collect()
    }

    /// All keys, ordered
    pub fn list_keys(&self) -> Vec<String> {
        self.inner.read().items.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }

    /// Objects whose index `index_name` contains `value`
    pub fn by_index(&self, index_name: &str, value: &str) -> Result<Vec<Arc<K>>> {
        let inner = self.inner.read();
        let index = inner
            .indices
            .get(index_name)
            .ok_or_else(|| ControllerError::unknown_index(index_name))?;

        Ok(index
            .get(value)
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| inner.items.get(k).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Atomically swap the whole content for `items`.
    ///
    /// Returns what changed: objects new to the store, objects already present
    /// (always reported as updates) and objects that disappeared.
    pub fn replace(&self, items: Vec<K>) -> Vec<StoreChange<K>> {
        let mut incoming = BTreeMap::new();
        for obj in items {
            match obj.object_key() {
                Ok(key) => {
                    incoming.insert(key, Arc::new(obj));
                }
                Err(e) => warn!("Dropping listed object without identity: {}", e),
            }
        }

        let mut inner = self.inner.write();
        let mut changes = Vec::with_capacity(incoming.len());

        let vanished: Vec<String> = inner
            .items
            .keys()
            .filter(|k| !incoming.contains_key(*k))
            .cloned()
            .collect();
        for key in vanished {
            if let Some(old) = self.remove_locked(&mut inner, &key) {
                changes.push(StoreChange::Deleted(old));
            }
        }

        for (key, obj) in incoming {
            match self.insert_locked(&mut inner, key, obj.clone()) {
                Some(old) => changes.push(StoreChange::Updated { old, new: obj }),
                None => changes.push(StoreChange::Added(obj)),
            }
        }

        changes
    }

    fn insert_locked(&self, inner: &mut StoreInner<K>, key: String, obj: Arc<K>) -> Option<Arc<K>> {
        let old = inner.items.insert(key.clone(), obj.clone());
        if let Some(old) = &old {
            self.unindex_locked(inner, &key, old);
        }
        for (name, func) in &self.indexers {
            let index = inner.indices.entry(name.clone()).or_default();
            for value in func(&obj) {
                index.entry(value).or_default().insert(key.clone());
            }
        }
        old
    }

    fn remove_locked(&self, inner: &mut StoreInner<K>, key: &str) -> Option<Arc<K>> {
        let old = inner.items.remove(key)?;
        self.unindex_locked(inner, key, &old);
        Some(old)
    }

    fn unindex_locked(&self, inner: &mut StoreInner<K>, key: &str, obj: &K) {
        for (name, func) in &self.indexers {
            let Some(index) = inner.indices.get_mut(name) else {
                continue;
            };
            for value in func(obj) {
                if let Some(keys) = index.get_mut(&value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        index.remove(&value);
                    }
                }
            }
        }
    }
}
