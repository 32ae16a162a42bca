//! Engine settings
//!
//! Persisted locally through a versioned repository. Missing fields fall back
//! to their defaults so older blobs keep loading as fields are added.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::stores::cashu::errors::CashuResult;
use crate::stores::local_store::{KeyValueStore, Repository, STORAGE_KEY_SETTINGS};

/// Public mint used when nothing else can fund a request
pub const DEFAULT_FALLBACK_MINT: &str = "https://mint.minibits.cash/Bitcoin";

/// Current settings schema version
pub const SETTINGS_VERSION: u32 = 2;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Mint tried first when funding from balance
    pub preferred_mint: Option<String>,
    pub fallback_mint: String,
    /// Inference node base URL for the Lightning invoice endpoints
    pub node_url: Option<String>,
    pub sync_enabled: bool,
    /// Relays from the cached application config
    pub relays: Vec<String>,

    pub mint_quote_poll_secs: u64,
    pub node_invoice_poll_secs: u64,
    pub node_invoice_max_attempts: u32,
    pub countdown_tick_secs: u64,

    pub relay_fetch_timeout_secs: u64,
    pub http_timeout_secs: u64,
    /// Base delay before a failed invoice check is retried
    pub retry_backoff_secs: u64,

    pub version: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            preferred_mint: None,
            fallback_mint: DEFAULT_FALLBACK_MINT.to_string(),
            node_url: None,
            sync_enabled: false,
            relays: Vec::new(),
            mint_quote_poll_secs: 3,
            node_invoice_poll_secs: 5,
            node_invoice_max_attempts: 60,
            countdown_tick_secs: 1,
            relay_fetch_timeout_secs: 6,
            http_timeout_secs: 10,
            retry_backoff_secs: 30,
            version: SETTINGS_VERSION,
        }
    }
}

impl EngineSettings {
    /// Delay before the next retry after `retry_count` consecutive failures (capped at an hour)
    pub fn retry_delay_secs(&self, retry_count: u32) -> u64 {
        let exp = retry_count.saturating_sub(1).min(16);
        self.retry_backoff_secs
            .saturating_mul(1u64 << exp)
            .min(3600)
    }
}

/// Settings persisted under their own key
#[derive(Clone)]
pub struct SettingsStore {
    repo: Repository<EngineSettings>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            repo: Repository::new(store, STORAGE_KEY_SETTINGS, SETTINGS_VERSION),
        }
    }

    pub fn load(&self) -> EngineSettings {
        let mut settings = self.repo.load();
        settings.version = SETTINGS_VERSION;
        settings
    }

    pub fn save(&self, settings: &EngineSettings) -> CashuResult<()> {
        log::debug!("Saving engine settings (sync_enabled={})", settings.sync_enabled);
        self.repo.save(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::local_store::MemoryStore;

    #[test]
    fn test_defaults() {
        let s = EngineSettings::default();
        assert_eq!(s.mint_quote_poll_secs, 3);
        assert_eq!(s.node_invoice_poll_secs, 5);
        assert_eq!(s.node_invoice_max_attempts, 60);
        assert_eq!(s.relay_fetch_timeout_secs, 6);
        assert_eq!(s.fallback_mint, DEFAULT_FALLBACK_MINT);
    }

    #[test]
    fn test_partial_blob_fills_defaults() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store
            .set(STORAGE_KEY_SETTINGS, r#"{"preferred_mint":"https://m.example","sync_enabled":true}"#)
            .unwrap();

        let settings = SettingsStore::new(store).load();
        assert_eq!(settings.preferred_mint.as_deref(), Some("https://m.example"));
        assert!(settings.sync_enabled);
        assert_eq!(settings.mint_quote_poll_secs, 3);
    }

    #[test]
    fn test_retry_delay_backs_off() {
        let s = EngineSettings::default();
        assert_eq!(s.retry_delay_secs(1), 30);
        assert_eq!(s.retry_delay_secs(2), 60);
        assert_eq!(s.retry_delay_secs(3), 120);
        assert_eq!(s.retry_delay_secs(40), 3600);
    }
}
