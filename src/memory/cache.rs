use std::{collections::HashMap, path::Path, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::PersistenceError,
    memory::store::MapStore,
    model::{fingerprint::WindowFingerprint, ui_map::UiMap},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Fingerprints kept in memory in front of the database.
    #[serde(default = "default_hot_capacity")]
    pub hot_capacity: usize,

    /// Retired maps kept per fingerprint.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            hot_capacity: default_hot_capacity(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_db_path() -> String { "data/ui_memory.db".to_string() }
fn default_hot_capacity() -> usize { 32 }
fn default_history_limit() -> usize { 5 }

/// Fingerprint-keyed map cache: a small in-memory layer over `MapStore`.
///
/// Operations on one fingerprint are serialized by a per-key lock; distinct
/// fingerprints never wait on each other except for the brief hot-layer and
/// database locks.
pub struct UiMemory {
    store: MapStore,
    hot: Mutex<HashMap<WindowFingerprint, Arc<UiMap>>>,
    hot_capacity: usize,
    keys: Mutex<HashMap<WindowFingerprint, Arc<Mutex<()>>>>,
}

impl UiMemory {
    pub fn new(store: MapStore, hot_capacity: usize) -> Self {
        UiMemory {
            store,
            hot: Mutex::new(HashMap::new()),
            hot_capacity,
            keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn open(config: &StorageConfig) -> Result<Self, PersistenceError> {
        let store = MapStore::open(Path::new(&config.db_path), config.history_limit)?;
        Ok(Self::new(store, config.hot_capacity))
    }

    pub fn in_memory(config: &StorageConfig) -> Result<Self, PersistenceError> {
        let store = MapStore::open_in_memory(config.history_limit)?;
        Ok(Self::new(store, config.hot_capacity))
    }

    pub fn store(&self) -> &MapStore {
        &self.store
    }

    /// Run `f` while holding the lock for `fingerprint`. The lock entry is
    /// dropped again once no other caller holds or waits on it.
    fn with_key<T>(&self, fingerprint: &WindowFingerprint, f: impl FnOnce() -> T) -> T {
        let key = self
            .keys
            .lock()
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = key.lock();
            f()
        };

        let mut keys = self.keys.lock();
        drop(key);
        if keys.get(fingerprint).is_some_and(|k| Arc::strong_count(k) == 1) {
            keys.remove(fingerprint);
        }
        result
    }

    /// Fingerprints with a live per-key lock.
    pub fn locked_keys(&self) -> usize {
        self.keys.lock().len()
    }

    /// Most recently stored map for `fingerprint`, if any.
    pub fn get(&self, fingerprint: &WindowFingerprint) -> Result<Option<Arc<UiMap>>, PersistenceError> {
        self.with_key(fingerprint, || {
            if let Some(map) = self.hot.lock().get(fingerprint) {
                debug!(fingerprint = %fingerprint, "cache hit (memory)");
                return Ok(Some(map.clone()));
            }

            match self.store.load(fingerprint)? {
                Some(map) => {
                    debug!(fingerprint = %fingerprint, "cache hit (store)");
                    let map = Arc::new(map);
                    self.remember(map.clone());
                    Ok(Some(map))
                }
                None => {
                    debug!(fingerprint = %fingerprint, "cache miss");
                    Ok(None)
                }
            }
        })
    }

    /// Store `map`, superseding any earlier map for its fingerprint. The hot
    /// layer is only updated once the store accepted the write.
    pub fn put(&self, map: UiMap) -> Result<Arc<UiMap>, PersistenceError> {
        let fingerprint = map.fingerprint().clone();
        self.with_key(&fingerprint, || {
            self.store.upsert(&map)?;
            let map = Arc::new(map);
            self.remember(map.clone());
            Ok(map)
        })
    }

    /// Drop the live map for `fingerprint`; the next request rescans.
    pub fn invalidate(&self, fingerprint: &WindowFingerprint) -> Result<bool, PersistenceError> {
        self.with_key(fingerprint, || {
            let in_memory = self.hot.lock().remove(fingerprint).is_some();
            let stored = self.store.retire(fingerprint, "invalidated")?;
            debug!(fingerprint = %fingerprint, in_memory, stored, "invalidated map");
            Ok(in_memory || stored)
        })
    }

    fn remember(&self, map: Arc<UiMap>) {
        if self.hot_capacity == 0 {
            return;
        }
        let mut hot = self.hot.lock();
        hot.insert(map.fingerprint().clone(), map);

        while hot.len() > self.hot_capacity {
            let oldest = hot
                .iter()
                .min_by(|a, b| a.1.built_at().cmp(&b.1.built_at()).then_with(|| a.0.cmp(b.0)))
                .map(|(fp, _)| fp.clone());
            match oldest {
                Some(fp) => {
                    hot.remove(&fp);
                }
                None => break,
            }
        }
    }
}
