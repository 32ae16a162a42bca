//! Local persistence
//!
//! A small key-value backend (browser LocalStorage on wasm, in-memory
//! elsewhere) under typed, versioned repositories. Each repository owns one
//! key and stores `{"version": N, "data": ...}`. Blobs written before the
//! envelope existed are migrated in place on first load.
//!
//! Reads never fail: an absent, unparseable or future-versioned blob reads as
//! the type's default, with a warning in the log.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use crate::stores::cashu::errors::{CashuResult, CashuWalletError};

// =============================================================================
// Storage Keys
// =============================================================================

pub const STORAGE_KEY_PROOFS: &str = "cashu_proofs";
pub const STORAGE_KEY_INVOICES: &str = "cashu_invoices";
pub const STORAGE_KEY_TRANSACTIONS: &str = "cashu_transactions";
pub const STORAGE_KEY_SETTINGS: &str = "settlement_settings";
pub const STORAGE_KEY_API_KEYS: &str = "api_keys";
pub const STORAGE_KEY_RELAY_LIST: &str = "cached_relay_list";

// =============================================================================
// Key-Value Backends
// =============================================================================

/// Raw string storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> CashuResult<()>;
    fn remove(&self, key: &str);
}

/// In-memory backend for native builds and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> CashuResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }
}

/// Browser LocalStorage backend
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStorageStore;

#[cfg(target_arch = "wasm32")]
impl KeyValueStore for LocalStorageStore {
    fn get(&self, key: &str) -> Option<String> {
        use gloo_storage::{LocalStorage, Storage};
        LocalStorage::get::<String>(key).ok()
    }

    fn set(&self, key: &str, value: &str) -> CashuResult<()> {
        use gloo_storage::{LocalStorage, Storage};
        LocalStorage::set(key, value)
            .map_err(|e| CashuWalletError::Persistence(format!("LocalStorage write {}: {}", key, e)))
    }

    fn remove(&self, key: &str) {
        use gloo_storage::{LocalStorage, Storage};
        LocalStorage::delete(key);
    }
}

/// Default backend for the current target
pub fn default_store() -> Arc<dyn KeyValueStore> {
    #[cfg(target_arch = "wasm32")]
    {
        Arc::new(LocalStorageStore)
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        Arc::new(MemoryStore::new())
    }
}

// =============================================================================
// Typed Repository
// =============================================================================

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    data: T,
}

/// Upgrade hook for an older envelope version: `(from_version, data) -> data`
pub type Migration = fn(u32, serde_json::Value) -> serde_json::Value;

/// One entity persisted under one key
pub struct Repository<T> {
    store: Arc<dyn KeyValueStore>,
    key: &'static str,
    version: u32,
    migrate: Option<Migration>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            key: self.key,
            version: self.version,
            migrate: self.migrate,
            _marker: PhantomData,
        }
    }
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(store: Arc<dyn KeyValueStore>, key: &'static str, version: u32) -> Self {
        Self {
            store,
            key,
            version,
            migrate: None,
            _marker: PhantomData,
        }
    }

    pub fn with_migration(mut self, migrate: Migration) -> Self {
        self.migrate = Some(migrate);
        self
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Whether anything is stored under this key
    pub fn has_data(&self) -> bool {
        self.store.get(self.key).is_some()
    }

    /// Load the entity, treating absence or corruption as empty
    pub fn load(&self) -> T {
        let Some(raw) = self.store.get(self.key) else {
            return T::default();
        };

        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Stored {} is not valid JSON, treating as empty: {}", self.key, e);
                return T::default();
            }
        };

        match Self::split_envelope(value) {
            Ok((version, data)) => self.load_versioned(version, data),
            Err(legacy) => self.load_legacy(legacy),
        }
    }

    /// Replace the stored entity
    pub fn save(&self, value: &T) -> CashuResult<()> {
        let envelope = Envelope {
            version: self.version,
            data: value,
        };
        let json = serde_json::to_string(&envelope)
            .map_err(|e| CashuWalletError::Persistence(format!("serialize {}: {}", self.key, e)))?;
        self.store.set(self.key, &json)
    }

    pub fn clear(&self) {
        self.store.remove(self.key);
    }

    fn split_envelope(value: serde_json::Value) -> Result<(u32, serde_json::Value), serde_json::Value> {
        match value {
            serde_json::Value::Object(mut map)
                if map.len() == 2 && map.contains_key("data") && map.contains_key("version") =>
            {
                let version = map
                    .get("version")
                    .and_then(|v| v.as_u64())
                    .and_then(|v| u32::try_from(v).ok());
                match (version, map.remove("data")) {
                    (Some(version), Some(data)) => Ok((version, data)),
                    (_, data) => {
                        if let Some(data) = data {
                            map.insert("data".to_string(), data);
                        }
                        Err(serde_json::Value::Object(map))
                    }
                }
            }
            other => Err(other),
        }
    }

    fn load_versioned(&self, version: u32, data: serde_json::Value) -> T {
        if version > self.version {
            log::warn!(
                "Stored {} has schema v{} newer than supported v{}, treating as empty",
                self.key,
                version,
                self.version
            );
            return T::default();
        }

        let data = match (version < self.version, self.migrate) {
            (true, Some(migrate)) => {
                log::info!("Migrating {} from v{} to v{}", self.key, version, self.version);
                migrate(version, data)
            }
            _ => data,
        };

        match serde_json::from_value::<T>(data) {
            Ok(value) => {
                if version < self.version {
                    if let Err(e) = self.save(&value) {
                        log::warn!("Failed to persist migrated {}: {}", self.key, e);
                    }
                }
                value
            }
            Err(e) => {
                log::warn!("Stored {} failed to parse, treating as empty: {}", self.key, e);
                T::default()
            }
        }
    }

    fn load_legacy(&self, raw: serde_json::Value) -> T {
        match serde_json::from_value::<T>(raw) {
            Ok(value) => {
                log::info!("Migrating legacy {} blob into v{} envelope", self.key, self.version);
                if let Err(e) = self.save(&value) {
                    log::warn!("Failed to persist migrated {}: {}", self.key, e);
                }
                value
            }
            Err(e) => {
                log::warn!("Stored {} failed to parse, treating as empty: {}", self.key, e);
                T::default()
            }
        }
    }
}
