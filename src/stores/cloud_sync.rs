//! Cross-device sync
//!
//! State is mirrored to relays as NIP-78 app-data events (kind 30078), one
//! parameterized replaceable event per channel, NIP-44 encrypted to the
//! user's own key. Resolution is last-write-wins: the newest snapshot
//! replaces local state wholesale, so two devices publishing from stale
//! state can lose the earlier update.

use nostr_sdk::signer::NostrSigner;
use nostr_sdk::{Event, EventBuilder, Filter, Kind, Tag};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::stores::cashu::errors::{CashuResult, CashuWalletError};
use crate::stores::cashu::ledger::ProofLedger;
use crate::stores::cashu::types::Proof;
use crate::stores::nostr_client::{PublishReport, RelayTransport};

/// NIP-78 kind for arbitrary custom app data
pub const APP_DATA_KIND: u16 = 30078;

pub const PROOFS_D_TAG: &str = "ecash-settlement/proofs";
pub const API_KEYS_D_TAG: &str = "ecash-settlement/api-keys";

const FETCH_LIMIT: usize = 50;

// =============================================================================
// Channel
// =============================================================================

/// Everything a channel needs to reach the user's relays
#[derive(Clone)]
pub struct SyncContext {
    pub transport: Arc<dyn RelayTransport>,
    pub signer: Arc<dyn NostrSigner>,
    pub relays: Vec<String>,
    pub fetch_timeout: Duration,
}

/// State that can be mirrored through a channel
pub trait SnapshotState: Serialize + DeserializeOwned + Send + Sync {
    fn is_empty(&self) -> bool;
}

impl<T> SnapshotState for Vec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn is_empty(&self) -> bool {
        <[T]>::is_empty(self)
    }
}

/// A decrypted snapshot and the event it came from
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub data: T,
    pub event_id: String,
    pub created_at: u64,
}

fn has_identifier(event: &Event, d_tag: &str) -> bool {
    event.tags.iter().any(|tag| {
        let slice = tag.as_slice();
        slice.first().map(|s| s.as_str()) == Some("d") && slice.get(1).map(|s| s.as_str()) == Some(d_tag)
    })
}

/// Newest event by `created_at`, ties going to the lexicographically largest id
pub fn select_latest<'a, I>(events: I) -> Option<&'a Event>
where
    I: IntoIterator<Item = &'a Event>,
{
    events.into_iter().max_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.to_hex().cmp(&b.id.to_hex()))
    })
}

/// One encrypted, self-addressed snapshot stream identified by a d-tag
pub struct EncryptedSnapshotChannel<T> {
    ctx: SyncContext,
    d_tag: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for EncryptedSnapshotChannel<T> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            d_tag: self.d_tag,
            _marker: PhantomData,
        }
    }
}

impl<T: SnapshotState> EncryptedSnapshotChannel<T> {
    pub fn new(ctx: SyncContext, d_tag: &'static str) -> Self {
        Self {
            ctx,
            d_tag,
            _marker: PhantomData,
        }
    }

    pub fn d_tag(&self) -> &'static str {
        self.d_tag
    }

    /// Fetch the newest snapshot.
    ///
    /// Relay failures are errors; an event that fails to decrypt or parse
    /// reads as no snapshot.
    pub async fn fetch_latest(&self) -> CashuResult<Option<Snapshot<T>>> {
        let pubkey = self
            .ctx
            .signer
            .get_public_key()
            .await
            .map_err(|e| CashuWalletError::Sync(format!("signer: {}", e)))?;

        let filter = Filter::new()
            .author(pubkey)
            .kind(Kind::from(APP_DATA_KIND))
            .identifier(self.d_tag)
            .limit(FETCH_LIMIT);

        let events = self
            .ctx
            .transport
            .fetch_events(&self.ctx.relays, filter, self.ctx.fetch_timeout)
            .await?;

        let candidates: Vec<&Event> = events
            .iter()
            .filter(|e| {
                e.pubkey == pubkey && e.kind == Kind::from(APP_DATA_KIND) && has_identifier(e, self.d_tag)
            })
            .collect();

        let Some(event) = select_latest(candidates) else {
            log::info!("No {} snapshot on relays", self.d_tag);
            return Ok(None);
        };

        match self.decode(event).await {
            Ok(data) => {
                log::info!(
                    "Fetched {} snapshot {} (created_at {})",
                    self.d_tag,
                    event.id.to_hex(),
                    event.created_at.as_secs()
                );
                Ok(Some(Snapshot {
                    data,
                    event_id: event.id.to_hex(),
                    created_at: event.created_at.as_secs(),
                }))
            }
            Err(e) => {
                log::warn!("Ignoring unreadable {} snapshot {}: {}", self.d_tag, event.id, e);
                Ok(None)
            }
        }
    }

    async fn decode(&self, event: &Event) -> CashuResult<T> {
        let plaintext = self
            .ctx
            .signer
            .nip44_decrypt(&event.pubkey, &event.content)
            .await
            .map_err(|e| CashuWalletError::Sync(format!("decrypt: {}", e)))?;
        serde_json::from_str(&plaintext).map_err(|e| CashuWalletError::Sync(format!("parse: {}", e)))
    }

    /// Encrypt `data` to self and broadcast it. Per-relay failures are logged.
    pub async fn publish(&self, data: &T) -> CashuResult<PublishReport> {
        let signer = &self.ctx.signer;
        let pubkey = signer
            .get_public_key()
            .await
            .map_err(|e| CashuWalletError::Sync(format!("signer: {}", e)))?;

        let json = serde_json::to_string(data)
            .map_err(|e| CashuWalletError::Sync(format!("serialize: {}", e)))?;
        let encrypted = signer
            .nip44_encrypt(&pubkey, &json)
            .await
            .map_err(|e| CashuWalletError::Sync(format!("encrypt: {}", e)))?;

        let unsigned = EventBuilder::new(Kind::from(APP_DATA_KIND), encrypted)
            .tag(Tag::identifier(self.d_tag))
            .build(pubkey);
        let event = signer
            .sign_event(unsigned)
            .await
            .map_err(|e| CashuWalletError::Sync(format!("sign: {}", e)))?;

        let report = self.ctx.transport.publish(&self.ctx.relays, event).await?;
        for (relay, error) in &report.failed {
            log::warn!("Relay {} rejected {} snapshot: {}", relay, self.d_tag, error);
        }
        if report.any_accepted() {
            log::info!(
                "Published {} snapshot {} to {} relays",
                self.d_tag,
                report.event_id,
                report.success.len()
            );
        } else {
            log::warn!("No relay accepted {} snapshot {}", self.d_tag, report.event_id);
        }
        Ok(report)
    }
}

// =============================================================================
// Bootstrap
// =============================================================================

/// The device-local side of a synced entity
pub trait LocalCopy<T>: Send + Sync {
    fn load_local(&self) -> T;

    /// Replace local state with a cloud snapshot
    fn adopt_cloud(&self, snapshot: Snapshot<T>) -> CashuResult<()>;

    /// Called once local state has been published as the first cloud snapshot
    fn migrated(&self, event_id: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Cloud snapshot replaced local state
    AdoptedCloud { event_id: String },
    /// Cloud was empty; local state became the first snapshot
    MigratedLocal { event_id: String },
    /// Nothing anywhere
    Empty,
    /// Sync unavailable or failed; local state stays in use
    KeptLocal,
}

/// Reconcile local state with the cloud at session start.
///
/// A non-empty cloud snapshot wins. An empty cloud is seeded once from local
/// state. Any sync failure leaves local state in charge.
pub async fn bootstrap<T: SnapshotState>(
    channel: &EncryptedSnapshotChannel<T>,
    local: &dyn LocalCopy<T>,
) -> BootstrapOutcome {
    let cloud = match channel.fetch_latest().await {
        Ok(cloud) => cloud,
        Err(e) => {
            log::warn!("Sync fetch for {} failed, using local state: {}", channel.d_tag(), e);
            return BootstrapOutcome::KeptLocal;
        }
    };

    if let Some(snapshot) = cloud.filter(|s| !s.data.is_empty()) {
        let event_id = snapshot.event_id.clone();
        return match local.adopt_cloud(snapshot) {
            Ok(()) => BootstrapOutcome::AdoptedCloud { event_id },
            Err(e) => {
                log::error!("Failed to apply {} snapshot {}: {}", channel.d_tag(), event_id, e);
                BootstrapOutcome::KeptLocal
            }
        };
    }

    let local_data = local.load_local();
    if local_data.is_empty() {
        return BootstrapOutcome::Empty;
    }

    match channel.publish(&local_data).await {
        Ok(report) if report.any_accepted() => {
            local.migrated(&report.event_id);
            BootstrapOutcome::MigratedLocal {
                event_id: report.event_id,
            }
        }
        Ok(_) => BootstrapOutcome::KeptLocal,
        Err(e) => {
            log::warn!("Sync migration for {} failed, keeping local: {}", channel.d_tag(), e);
            BootstrapOutcome::KeptLocal
        }
    }
}

// =============================================================================
// Proof Snapshot
// =============================================================================

/// Proofs arriving from a snapshot are stamped with its event id
impl LocalCopy<Vec<Proof>> for ProofLedger {
    fn load_local(&self) -> Vec<Proof> {
        self.read()
    }

    fn adopt_cloud(&self, snapshot: Snapshot<Vec<Proof>>) -> CashuResult<()> {
        let proofs = stamp(snapshot.data, &snapshot.event_id);
        log::info!(
            "Replacing local ledger with {} proofs from snapshot {}",
            proofs.len(),
            snapshot.event_id
        );
        self.write(&proofs)
    }

    /// The ledger stays the working copy; only provenance changes
    fn migrated(&self, event_id: &str) {
        let proofs = stamp(self.read(), event_id);
        if let Err(e) = self.write(&proofs) {
            log::warn!("Failed to stamp ledger with snapshot {}: {}", event_id, e);
        }
    }
}

fn stamp(proofs: Vec<Proof>, event_id: &str) -> Vec<Proof> {
    proofs
        .into_iter()
        .map(|mut p| {
            p.event_id = Some(event_id.to_string());
            p
        })
        .collect()
}

/// Mirrors the proof ledger
#[derive(Clone)]
pub struct ProofSync {
    channel: EncryptedSnapshotChannel<Vec<Proof>>,
}

impl ProofSync {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            channel: EncryptedSnapshotChannel::new(ctx, PROOFS_D_TAG),
        }
    }

    pub fn channel(&self) -> &EncryptedSnapshotChannel<Vec<Proof>> {
        &self.channel
    }

    pub async fn bootstrap(&self, ledger: &ProofLedger) -> BootstrapOutcome {
        bootstrap(&self.channel, ledger).await
    }

    /// Republish the whole ledger. Failures are logged, never returned.
    pub async fn publish_ledger(&self, ledger: &ProofLedger) {
        let proofs = ledger.read();
        if let Err(e) = self.channel.publish(&proofs).await {
            log::warn!("Proof snapshot publish failed: {}", e);
        }
    }
}
