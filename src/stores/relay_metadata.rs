//! Relay set for the sync channels
//!
//! Relays come from three places: the cached application config, the user's
//! cached relay list, and the built-in defaults. The working set is their
//! union, restricted to websocket URLs.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::stores::cashu::errors::CashuResult;
use crate::stores::local_store::{KeyValueStore, Repository, STORAGE_KEY_RELAY_LIST};
use crate::stores::nostr_client::DEFAULT_RELAYS;

pub const RELAY_LIST_VERSION: u32 = 1;

/// Configuration for a single relay with read/write permissions
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    pub url: String,
    #[serde(default = "default_true")]
    pub read: bool,
    #[serde(default = "default_true")]
    pub write: bool,
}

fn default_true() -> bool {
    true
}

impl RelayConfig {
    pub fn read_write(url: &str) -> Self {
        Self {
            url: url.to_string(),
            read: true,
            write: true,
        }
    }
}

pub fn default_relays() -> Vec<String> {
    DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect()
}

fn is_websocket_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    (lower.starts_with("wss://") || lower.starts_with("ws://"))
        && url::Url::parse(url)
            .map(|u| u.host_str().is_some())
            .unwrap_or(false)
}

fn normalize_relay_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Union of configured, cached and default relays.
///
/// Order is preserved (config first), duplicates and non-websocket URLs are
/// dropped. Falls back to the defaults when nothing usable remains.
pub fn resolve_relays(configured: &[String], cached: &[RelayConfig]) -> Vec<String> {
    let mut seen = HashSet::new();
    let candidates = configured
        .iter()
        .cloned()
        .chain(cached.iter().map(|r| r.url.clone()))
        .chain(default_relays());

    let resolved: Vec<String> = candidates
        .map(|url| normalize_relay_url(&url))
        .filter(|url| is_websocket_url(url))
        .filter(|url| seen.insert(url.to_lowercase()))
        .collect();

    if resolved.is_empty() {
        log::warn!("No usable relays configured, using defaults");
        return default_relays();
    }
    resolved
}

/// The user's relay list as last fetched, cached locally
#[derive(Clone)]
pub struct RelayListCache {
    repo: Repository<Vec<RelayConfig>>,
}

impl RelayListCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            repo: Repository::new(store, STORAGE_KEY_RELAY_LIST, RELAY_LIST_VERSION),
        }
    }

    pub fn load(&self) -> Vec<RelayConfig> {
        self.repo.load()
    }

    pub fn save(&self, relays: &[RelayConfig]) -> CashuResult<()> {
        self.repo.save(&relays.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::local_store::MemoryStore;

    #[test]
    fn test_union_dedups_and_filters() {
        let configured = vec![
            "wss://relay.example.com/".to_string(),
            "https://not-a-relay.example.com".to_string(),
        ];
        let cached = vec![
            RelayConfig::read_write("wss://relay.example.com"),
            RelayConfig::read_write("wss://nos.lol"),
        ];

        let relays = resolve_relays(&configured, &cached);
        assert_eq!(relays[0], "wss://relay.example.com");
        assert_eq!(relays.iter().filter(|r| *r == "wss://nos.lol").count(), 1);
        assert!(!relays.iter().any(|r| r.starts_with("https://")));
        assert!(relays.contains(&"wss://relay.damus.io".to_string()));
    }

    #[test]
    fn test_empty_inputs_use_defaults() {
        assert_eq!(resolve_relays(&[], &[]), default_relays());
    }

    #[test]
    fn test_cache_roundtrip_and_corruption() {
        let store = Arc::new(MemoryStore::new());
        let cache = RelayListCache::new(store.clone());
        cache.save(&[RelayConfig::read_write("wss://a.example")]).unwrap();
        assert_eq!(cache.load().len(), 1);

        store.set(STORAGE_KEY_RELAY_LIST, "%%%").unwrap();
        assert!(cache.load().is_empty());
    }
}
