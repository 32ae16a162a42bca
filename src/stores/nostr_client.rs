//! Relay transport
//!
//! The sync channels talk to relays through [`RelayTransport`] so the
//! snapshot logic can run against an in-memory relay in tests.
//! [`NostrRelayTransport`] is the nostr-sdk backed implementation.

use async_trait::async_trait;
use nostr_sdk::{Client, Event, Filter, RelayUrl};
use std::time::Duration;

use crate::stores::cashu::errors::{CashuResult, CashuWalletError};

/// Default relays to connect to
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.snort.social",
    "wss://nostr.wine",
    "wss://relay.nostr.band",
];

/// Per-relay outcome of a broadcast
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub event_id: String,
    pub success: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl PublishReport {
    pub fn any_accepted(&self) -> bool {
        !self.success.is_empty()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait RelayTransport: Send + Sync {
    async fn fetch_events(
        &self,
        relays: &[String],
        filter: Filter,
        timeout: Duration,
    ) -> CashuResult<Vec<Event>>;

    async fn publish(&self, relays: &[String], event: Event) -> CashuResult<PublishReport>;
}

fn parse_relays(relays: &[String]) -> Vec<RelayUrl> {
    relays
        .iter()
        .filter_map(|r| match RelayUrl::parse(r) {
            Ok(url) => Some(url),
            Err(e) => {
                log::debug!("Skipping relay {}: {}", r, e);
                None
            }
        })
        .collect()
}

// =============================================================================
// nostr-sdk Transport
// =============================================================================

pub struct NostrRelayTransport {
    client: Client,
}

impl Default for NostrRelayTransport {
    fn default() -> Self {
        Self::new(Client::builder().build())
    }
}

impl NostrRelayTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Add any relays the pool does not know yet and connect
    async fn ensure_relays(&self, relays: &[RelayUrl]) {
        for relay in relays {
            if let Err(e) = self.client.add_relay(relay.as_str()).await {
                log::debug!("Could not add relay {}: {}", relay, e);
            }
        }
        self.client.connect().await;
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl RelayTransport for NostrRelayTransport {
    async fn fetch_events(
        &self,
        relays: &[String],
        filter: Filter,
        timeout: Duration,
    ) -> CashuResult<Vec<Event>> {
        let urls = parse_relays(relays);
        if urls.is_empty() {
            return Err(CashuWalletError::Sync("no usable relays".to_string()));
        }
        self.ensure_relays(&urls).await;

        let events = self
            .client
            .fetch_events_from(urls, filter, timeout)
            .await
            .map_err(|e| CashuWalletError::Sync(format!("Failed to fetch events: {}", e)))?;
        Ok(events.into_iter().collect())
    }

    async fn publish(&self, relays: &[String], event: Event) -> CashuResult<PublishReport> {
        let urls = parse_relays(relays);
        if urls.is_empty() {
            return Err(CashuWalletError::Sync("no usable relays".to_string()));
        }
        self.ensure_relays(&urls).await;

        let output = self
            .client
            .send_event_to(urls, &event)
            .await
            .map_err(|e| CashuWalletError::Sync(format!("Failed to publish: {}", e)))?;

        Ok(PublishReport {
            event_id: event.id.to_hex(),
            success: output.success.iter().map(|u| u.to_string()).collect(),
            failed: output
                .failed
                .iter()
                .map(|(u, e)| (u.to_string(), e.to_string()))
                .collect(),
        })
    }
}

// =============================================================================
// In-memory relay for tests
// =============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_relays_skips_invalid() {
        let relays = vec![
            "wss://relay.damus.io".to_string(),
            "not a relay".to_string(),
        ];
        assert_eq!(parse_relays(&relays).len(), 1);
    }

    #[test]
    fn test_publish_report() {
        let report = PublishReport {
            event_id: "abc".to_string(),
            success: vec![],
            failed: vec![("wss://nos.lol".to_string(), "timeout".to_string())],
        };
        assert!(!report.any_accepted());
    }
}
