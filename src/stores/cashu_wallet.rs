//! Wallet session
//!
//! [`WalletSession`] owns everything a settlement operation needs: the proof
//! ledger, the invoice list, the transaction history, the open mint sessions
//! and the per-mint locks. Callers build one per identity and pass it by
//! reference; there is no process-wide wallet state.

use nostr_sdk::signer::NostrSigner;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::stores::api_keys::ApiKeyStore;
use crate::stores::cashu::errors::CashuResult;
use crate::stores::cashu::history::TransactionHistory;
use crate::stores::cashu::ledger::ProofLedger;
use crate::stores::cashu::locks::{MintLocks, MintOperationGuard};
use crate::stores::cashu::mint_client::{MintConnectorFactory, MintSession};
use crate::stores::cashu::quotes::InvoiceStore;
use crate::stores::cashu::recovery::{check_pending_invoices, SweepSummary};
use crate::stores::cashu::types::{InvoiceRecord, TransactionRecord};
use crate::stores::cashu::utils::normalize_mint_url;
use crate::stores::cashu_cdk_bridge::CdkMintFactory;
use crate::stores::cloud_sync::{BootstrapOutcome, ProofSync, SyncContext};
use crate::stores::local_store::{default_store, KeyValueStore};
use crate::stores::nostr_client::{NostrRelayTransport, RelayTransport};
use crate::stores::relay_metadata::{resolve_relays, RelayListCache};
use crate::stores::settings_store::{EngineSettings, SettingsStore};

// =============================================================================
// Builder
// =============================================================================

#[derive(Default)]
pub struct WalletSessionBuilder {
    store: Option<Arc<dyn KeyValueStore>>,
    factory: Option<Arc<dyn MintConnectorFactory>>,
    settings: Option<EngineSettings>,
    transport: Option<Arc<dyn RelayTransport>>,
    signer: Option<Arc<dyn NostrSigner>>,
}

impl WalletSessionBuilder {
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn factory(mut self, factory: Arc<dyn MintConnectorFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Use these settings instead of the persisted ones
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Sign and encrypt snapshots with `signer`. Only honored when the
    /// settings have sync enabled.
    pub fn signer(mut self, signer: Arc<dyn NostrSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Relay transport for sync; defaults to a fresh nostr-sdk client
    pub fn transport(mut self, transport: Arc<dyn RelayTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> WalletSession {
        let store = self.store.unwrap_or_else(default_store);
        let settings = self
            .settings
            .unwrap_or_else(|| SettingsStore::new(store.clone()).load());
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(CdkMintFactory::new(settings.http_timeout_secs)));

        let sync = match self.signer {
            Some(signer) if settings.sync_enabled => {
                let relays = resolve_relays(&settings.relays, &RelayListCache::new(store.clone()).load());
                log::info!("Sync enabled over {} relays", relays.len());
                Some(SyncContext {
                    transport: self
                        .transport
                        .unwrap_or_else(|| Arc::new(NostrRelayTransport::default())),
                    signer,
                    relays,
                    fetch_timeout: Duration::from_secs(settings.relay_fetch_timeout_secs),
                })
            }
            Some(_) => {
                log::debug!("Signer given but sync is disabled in settings");
                None
            }
            None => None,
        };

        WalletSession {
            ledger: ProofLedger::new(store.clone()),
            invoices: InvoiceStore::new(store.clone()),
            history: TransactionHistory::new(store.clone()),
            api_keys: ApiKeyStore::new(store, sync.clone()),
            proof_sync: sync.map(ProofSync::new),
            settings,
            factory,
            locks: MintLocks::new(),
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Outcome of reconciling both sync channels and resuming quotes at start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    pub proofs: BootstrapOutcome,
    pub api_keys: BootstrapOutcome,
    pub recovery: SweepSummary,
}

pub struct WalletSession {
    ledger: ProofLedger,
    invoices: InvoiceStore,
    history: TransactionHistory,
    api_keys: ApiKeyStore,
    proof_sync: Option<ProofSync>,
    settings: EngineSettings,
    factory: Arc<dyn MintConnectorFactory>,
    locks: MintLocks,
    sessions: Mutex<HashMap<String, MintSession>>,
}

impl WalletSession {
    pub fn builder() -> WalletSessionBuilder {
        WalletSessionBuilder::default()
    }

    /// Reconcile local state with the cloud, then resume outstanding quotes
    pub async fn start(&self) -> SessionStart {
        let proofs = match &self.proof_sync {
            Some(sync) => sync.bootstrap(&self.ledger).await,
            None => BootstrapOutcome::KeptLocal,
        };
        let api_keys = self.api_keys.bootstrap().await;
        log::info!(
            "Wallet session started: proofs {:?}, api keys {:?}, balance {} sats",
            proofs,
            api_keys,
            self.ledger.balance_sats()
        );
        let recovery = check_pending_invoices(self).await;
        SessionStart {
            proofs,
            api_keys,
            recovery,
        }
    }

    pub fn ledger(&self) -> &ProofLedger {
        &self.ledger
    }

    pub fn invoice_store(&self) -> &InvoiceStore {
        &self.invoices
    }

    pub fn transaction_history(&self) -> &TransactionHistory {
        &self.history
    }

    pub fn api_keys(&self) -> &ApiKeyStore {
        &self.api_keys
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn is_synced(&self) -> bool {
        self.proof_sync.is_some()
    }

    /// Unit-negotiated session for a mint, opened once and reused
    pub async fn open_mint(&self, mint_url: &str) -> CashuResult<MintSession> {
        let key = normalize_mint_url(mint_url);
        if let Some(session) = self.cached_session(&key) {
            return Ok(session);
        }

        let session = MintSession::open(self.factory.as_ref(), &key).await?;
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, session.clone());
        Ok(session)
    }

    fn cached_session(&self, key: &str) -> Option<MintSession> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Exclusive access to one mint's slice of the ledger
    pub async fn lock_mint(&self, mint_url: &str) -> MintOperationGuard {
        self.locks.acquire(mint_url).await
    }

    /// Republish the proof snapshot after the ledger changed
    pub async fn after_ledger_mutation(&self) {
        if let Some(sync) = &self.proof_sync {
            sync.publish_ledger(&self.ledger).await;
        }
    }

    // =========================================================================
    // Read Model
    // =========================================================================

    pub fn balance_sats(&self) -> u64 {
        self.ledger.balance_sats()
    }

    pub fn balances_by_mint(&self) -> Vec<(String, u64)> {
        self.ledger.balances_by_mint()
    }

    /// Transaction history, most recent first
    pub fn history(&self) -> Vec<TransactionRecord> {
        let mut records = self.history.list();
        records.reverse();
        records
    }

    pub fn invoices(&self) -> Vec<InvoiceRecord> {
        self.invoices.list()
    }

    pub fn pending_invoices(&self) -> Vec<InvoiceRecord> {
        self.invoices.list_pending()
    }
}
