//! Inference API keys
//!
//! Keys handed out by nodes against a funded balance. Kept locally, or on
//! relays through the api-keys sync channel when sync is on. With sync every
//! change is fetch-modify-publish against the newest cloud list.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::stores::cashu::errors::{CashuResult, CashuWalletError};
use crate::stores::cloud_sync::{
    bootstrap, BootstrapOutcome, EncryptedSnapshotChannel, LocalCopy, Snapshot, SyncContext,
    API_KEYS_D_TAG,
};
use crate::stores::local_store::{KeyValueStore, Repository, STORAGE_KEY_API_KEYS};

pub const API_KEYS_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_sats: Option<u64>,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mint_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
}

impl ApiKeyRecord {
    pub fn new(key: impl Into<String>, created_at: u64) -> Self {
        Self {
            key: key.into(),
            label: None,
            balance_sats: None,
            created_at,
            mint_url: None,
            invoice_id: None,
        }
    }

    /// Key prefix safe for display
    pub fn masked(&self) -> String {
        let prefix: String = self.key.chars().take(8).collect();
        format!("{}…", prefix)
    }
}

/// Local copy, cleared once migrated to the cloud
#[derive(Clone)]
struct LocalApiKeys {
    repo: Repository<Vec<ApiKeyRecord>>,
}

impl LocalCopy<Vec<ApiKeyRecord>> for LocalApiKeys {
    fn load_local(&self) -> Vec<ApiKeyRecord> {
        self.repo.load()
    }

    fn adopt_cloud(&self, snapshot: Snapshot<Vec<ApiKeyRecord>>) -> CashuResult<()> {
        log::info!(
            "Using {} API keys from snapshot {}",
            snapshot.data.len(),
            snapshot.event_id
        );
        // keys added while offline stay local until merged into the cloud list
        let local_only: Vec<ApiKeyRecord> = self
            .repo
            .load()
            .into_iter()
            .filter(|k| !snapshot.data.iter().any(|c| c.key == k.key))
            .collect();
        if local_only.is_empty() {
            self.repo.clear();
        } else {
            log::warn!(
                "{} API keys exist only on this device, merging into snapshot {}",
                local_only.len(),
                snapshot.event_id
            );
            self.repo.save(&local_only)?;
        }
        Ok(())
    }

    fn migrated(&self, event_id: &str) {
        log::info!("Local API keys migrated to snapshot {}, clearing local copy", event_id);
        self.repo.clear();
    }
}

#[derive(Clone)]
pub struct ApiKeyStore {
    local: LocalApiKeys,
    channel: Option<EncryptedSnapshotChannel<Vec<ApiKeyRecord>>>,
}

impl ApiKeyStore {
    pub fn new(store: Arc<dyn KeyValueStore>, sync: Option<SyncContext>) -> Self {
        Self {
            local: LocalApiKeys {
                repo: Repository::new(store, STORAGE_KEY_API_KEYS, API_KEYS_VERSION),
            },
            channel: sync.map(|ctx| EncryptedSnapshotChannel::new(ctx, API_KEYS_D_TAG)),
        }
    }

    pub fn is_synced(&self) -> bool {
        self.channel.is_some()
    }

    /// Reconcile with the cloud at session start
    pub async fn bootstrap(&self) -> BootstrapOutcome {
        let Some(channel) = &self.channel else {
            return BootstrapOutcome::KeptLocal;
        };
        let outcome = bootstrap(channel, &self.local).await;
        if matches!(outcome, BootstrapOutcome::AdoptedCloud { .. }) {
            let local_only = self.local.load_local();
            if !local_only.is_empty() {
                if let Err(e) = self.modify(move |keys| merge_missing(keys, local_only)).await {
                    log::warn!("Merging local API keys into the cloud list failed: {}", e);
                }
            }
        }
        outcome
    }

    /// Current list: the newest cloud snapshot when synced, else local
    pub async fn list(&self) -> Vec<ApiKeyRecord> {
        let Some(channel) = &self.channel else {
            return self.local.load_local();
        };
        match channel.fetch_latest().await {
            Ok(Some(snapshot)) => snapshot.data,
            Ok(None) => self.local.load_local(),
            Err(e) => {
                log::warn!("API key fetch failed, using local list: {}", e);
                self.local.load_local()
            }
        }
    }

    pub async fn add(&self, record: ApiKeyRecord) -> CashuResult<Vec<ApiKeyRecord>> {
        if record.key.trim().is_empty() {
            return Err(CashuWalletError::InvalidToken {
                reason: "API key is empty".to_string(),
            });
        }
        self.modify(move |keys| {
            match keys.iter_mut().find(|k| k.key == record.key) {
                Some(existing) => *existing = record,
                None => keys.push(record),
            }
        })
        .await
    }

    pub async fn remove(&self, key: &str) -> CashuResult<Vec<ApiKeyRecord>> {
        let key = key.to_string();
        self.modify(move |keys| keys.retain(|k| k.key != key)).await
    }

    /// Record the balance a node reported for `key`
    pub async fn set_balance(&self, key: &str, balance_sats: u64) -> CashuResult<Vec<ApiKeyRecord>> {
        let key = key.to_string();
        self.modify(move |keys| {
            if let Some(record) = keys.iter_mut().find(|k| k.key == key) {
                record.balance_sats = Some(balance_sats);
            }
        })
        .await
    }

    async fn modify<F>(&self, f: F) -> CashuResult<Vec<ApiKeyRecord>>
    where
        F: FnOnce(&mut Vec<ApiKeyRecord>),
    {
        let Some(channel) = &self.channel else {
            let mut keys = self.local.load_local();
            f(&mut keys);
            self.local.repo.save(&keys)?;
            return Ok(keys);
        };

        let (mut keys, from_cloud) = match channel.fetch_latest().await {
            Ok(Some(snapshot)) => (snapshot.data, true),
            Ok(None) => (self.local.load_local(), true),
            Err(e) => {
                log::warn!("API key fetch failed, changing local list only: {}", e);
                (self.local.load_local(), false)
            }
        };
        f(&mut keys);

        if from_cloud {
            match channel.publish(&keys).await {
                Ok(report) if report.any_accepted() => {
                    self.local.repo.clear();
                    return Ok(keys);
                }
                Ok(_) => log::warn!("No relay accepted API key list, keeping it locally"),
                Err(e) => log::warn!("API key publish failed, keeping list locally: {}", e),
            }
        }
        self.local.repo.save(&keys)?;
        Ok(keys)
    }
}

/// Append records whose key is not already in `keys`
fn merge_missing(keys: &mut Vec<ApiKeyRecord>, extra: Vec<ApiKeyRecord>) {
    for record in extra {
        if !keys.iter().any(|k| k.key == record.key) {
            keys.push(record);
        }
    }
}
