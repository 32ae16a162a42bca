//! CDK-backed mint connector
//!
//! Each connector owns one CDK [`Wallet`] over its own [`ScratchDatabase`].
//! The proof ledger stays the source of truth: before a spend the connector
//! loads exactly the proofs it was handed into the scratch store, runs the
//! CDK operation, then reads back what CDK left unspent.

use async_trait::async_trait;
use cdk::amount::{Amount, SplitTarget};
use cdk::mint_url::MintUrl;
use cdk::nuts::{MeltQuoteState, MintQuoteState, PaymentMethod, State};
use cdk::types::ProofInfo;
use cdk::wallet::{ReceiveOptions, SendKind, SendOptions};
use cdk::Wallet;
use cdk::cdk_database::WalletDatabase;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::stores::cashu::errors::{CashuResult, CashuWalletError};
use crate::stores::cashu::mint_client::{MintConnector, MintConnectorFactory};
use crate::stores::cashu::token::{from_cdk_proof, to_cdk_proof, to_cdk_unit};
use crate::stores::cashu::types::{
    KeysetSummary, MeltQuoteResponse, MeltResponse, MintQuoteResponse, MintUnit, Proof,
    QuoteState, SendPartition,
};
use crate::stores::cashu::utils::normalize_mint_url;
use crate::stores::cashu_memory_db::ScratchDatabase;
use crate::utils::time::with_timeout;

/// Default timeout for keyset discovery, in seconds
pub const KEYSET_FETCH_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// State Mapping
// =============================================================================

fn map_mint_state(state: MintQuoteState) -> QuoteState {
    match state {
        MintQuoteState::Unpaid => QuoteState::Unpaid,
        MintQuoteState::Paid => QuoteState::Paid,
        MintQuoteState::Issued => QuoteState::Issued,
    }
}

fn map_melt_state(state: MeltQuoteState) -> QuoteState {
    match state {
        MeltQuoteState::Paid => QuoteState::Paid,
        MeltQuoteState::Pending => QuoteState::Pending,
        _ => QuoteState::Unpaid,
    }
}

fn expiry_opt(expiry: u64) -> Option<u64> {
    (expiry > 0).then_some(expiry)
}

fn parse_mint_url(mint_url: &str) -> CashuResult<MintUrl> {
    mint_url
        .parse()
        .map_err(|_| CashuWalletError::InvalidMintUrl {
            url: mint_url.to_string(),
        })
}

/// Fresh seed for a connector's throwaway CDK wallet.
///
/// Proofs never live in CDK past one operation, so nothing is derived from it.
fn random_seed() -> [u8; 64] {
    let mut seed = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut seed);
    seed
}

fn build_wallet(
    mint_url: &str,
    unit: MintUnit,
    db: Arc<ScratchDatabase>,
) -> CashuResult<Wallet> {
    Wallet::new(mint_url, to_cdk_unit(unit), db, random_seed(), None).map_err(CashuWalletError::from)
}

// =============================================================================
// Connector
// =============================================================================

pub struct CdkMintConnector {
    mint_url: String,
    parsed_url: MintUrl,
    unit: MintUnit,
    wallet: Wallet,
    db: Arc<ScratchDatabase>,
    /// Serializes operations that load proofs into the scratch store
    op_lock: Mutex<()>,
}

impl CdkMintConnector {
    pub fn new(mint_url: &str, unit: MintUnit) -> CashuResult<Self> {
        let mint_url = normalize_mint_url(mint_url);
        let parsed_url = parse_mint_url(&mint_url)?;
        let db = Arc::new(ScratchDatabase::new());
        let wallet = build_wallet(&mint_url, unit, db.clone())?;

        Ok(Self {
            mint_url,
            parsed_url,
            unit,
            wallet,
            db,
            op_lock: Mutex::new(()),
        })
    }

    /// Load exactly `proofs` into the scratch store
    async fn load_proofs(&self, proofs: &[Proof]) -> CashuResult<()> {
        let infos = proofs
            .iter()
            .map(|p| {
                let proof = to_cdk_proof(p)?;
                ProofInfo::new(
                    proof,
                    self.parsed_url.clone(),
                    State::Unspent,
                    to_cdk_unit(self.unit),
                )
                .map_err(|e| CashuWalletError::InvalidToken {
                    reason: format!("proof {}: {}", p.short_secret(), e),
                })
            })
            .collect::<CashuResult<Vec<_>>>()?;

        log::debug!("Loaded {} proofs into scratch store for {}", infos.len(), self.mint_url);
        self.db.reset_proofs(infos).await;
        Ok(())
    }

    async fn unspent(&self) -> Vec<Proof> {
        self.db
            .unspent_proofs()
            .await
            .iter()
            .map(|p| from_cdk_proof(p, &self.mint_url, self.unit))
            .collect()
    }

    /// CDK refuses to mint against a quote it has not stored, which happens
    /// when the quote was created before a reload.
    async fn ensure_mint_quote(&self, amount: u64, quote_id: &str) -> CashuResult<()> {
        let known = self
            .db
            .get_mint_quote(quote_id)
            .await
            .map_err(|e| CashuWalletError::Persistence(e.to_string()))?;
        if known.is_some() {
            return Ok(());
        }

        let status = self.wallet.mint_quote_state(quote_id).await?;
        let quote = cdk::wallet::MintQuote::new(
            quote_id.to_string(),
            self.parsed_url.clone(),
            PaymentMethod::Bolt11,
            Some(Amount::from(amount)),
            to_cdk_unit(self.unit),
            String::new(),
            status.expiry.unwrap_or(0),
            None,
        );
        self.db
            .add_mint_quote(quote)
            .await
            .map_err(|e| CashuWalletError::Persistence(e.to_string()))?;
        log::info!("Restored mint quote {} into scratch store", quote_id);
        Ok(())
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl MintConnector for CdkMintConnector {
    fn mint_url(&self) -> &str {
        &self.mint_url
    }

    fn unit(&self) -> MintUnit {
        self.unit
    }

    async fn create_mint_quote(&self, amount: u64) -> CashuResult<MintQuoteResponse> {
        let quote = self.wallet.mint_quote(Amount::from(amount), None).await?;
        log::info!("Created mint quote {} for {} {}", quote.id, amount, self.unit);

        Ok(MintQuoteResponse {
            quote_id: quote.id,
            request: quote.request,
            amount: quote.amount.map(u64::from),
            state: QuoteState::Unpaid,
            expiry: expiry_opt(quote.expiry),
        })
    }

    async fn check_mint_quote(&self, quote_id: &str) -> CashuResult<MintQuoteResponse> {
        let status = self.wallet.mint_quote_state(quote_id).await?;
        Ok(MintQuoteResponse {
            quote_id: quote_id.to_string(),
            request: String::new(),
            amount: status.amount.map(u64::from),
            state: map_mint_state(status.state),
            expiry: status.expiry.and_then(expiry_opt),
        })
    }

    async fn mint_proofs(&self, amount: u64, quote_id: &str) -> CashuResult<Vec<Proof>> {
        let _op = self.op_lock.lock().await;
        self.load_proofs(&[]).await?;
        self.ensure_mint_quote(amount, quote_id).await?;

        let proofs = self
            .wallet
            .mint(quote_id, SplitTarget::default(), None)
            .await?;

        Ok(proofs
            .iter()
            .map(|p| from_cdk_proof(p, &self.mint_url, self.unit))
            .collect())
    }

    async fn create_melt_quote(&self, bolt11: &str) -> CashuResult<MeltQuoteResponse> {
        let quote = self.wallet.melt_quote(bolt11.to_string(), None).await?;
        Ok(MeltQuoteResponse {
            quote_id: quote.id,
            request: quote.request,
            amount: u64::from(quote.amount),
            fee_reserve: u64::from(quote.fee_reserve),
            state: QuoteState::Unpaid,
            expiry: expiry_opt(quote.expiry),
        })
    }

    async fn check_melt_quote(&self, quote_id: &str) -> CashuResult<MeltQuoteResponse> {
        let status = self.wallet.melt_quote_status(quote_id).await?;
        Ok(MeltQuoteResponse {
            quote_id: quote_id.to_string(),
            request: status.request.unwrap_or_default(),
            amount: u64::from(status.amount),
            fee_reserve: u64::from(status.fee_reserve),
            state: map_melt_state(status.state),
            expiry: expiry_opt(status.expiry),
        })
    }

    async fn melt_proofs(
        &self,
        quote: &MeltQuoteResponse,
        proofs: Vec<Proof>,
    ) -> CashuResult<MeltResponse> {
        let _op = self.op_lock.lock().await;

        let known = self
            .db
            .get_melt_quote(&quote.quote_id)
            .await
            .map_err(|e| CashuWalletError::Persistence(e.to_string()))?;
        if known.is_none() {
            return Err(CashuWalletError::QuoteNotFound {
                quote_id: quote.quote_id.clone(),
            });
        }

        self.load_proofs(&proofs).await?;
        let melted = self.wallet.melt(&quote.quote_id).await?;
        let change = self.unspent().await;

        log::info!(
            "Melted quote {} at {}: state={:?}, fee_paid={}, change proofs={}",
            quote.quote_id,
            self.mint_url,
            melted.state,
            u64::from(melted.fee_paid),
            change.len()
        );

        Ok(MeltResponse {
            paid: melted.state == MeltQuoteState::Paid,
            preimage: melted.preimage,
            change,
            fee_paid: u64::from(melted.fee_paid),
        })
    }

    async fn send(
        &self,
        amount: u64,
        proofs: Vec<Proof>,
        include_fees: bool,
    ) -> CashuResult<SendPartition> {
        let _op = self.op_lock.lock().await;
        self.load_proofs(&proofs).await?;

        let prepared = self
            .wallet
            .prepare_send(
                Amount::from(amount),
                SendOptions {
                    include_fee: include_fees,
                    send_kind: SendKind::OnlineExact,
                    ..Default::default()
                },
            )
            .await?;
        log::debug!(
            "Prepared send of {} {} at {} (fee {})",
            amount,
            self.unit,
            self.mint_url,
            u64::from(prepared.fee())
        );

        let token = prepared.confirm(None).await?;
        let keysets = self.wallet.get_mint_keysets().await?;
        let send = token
            .proofs(&keysets)
            .map_err(|e| CashuWalletError::mint(e.to_string()))?
            .iter()
            .map(|p| from_cdk_proof(p, &self.mint_url, self.unit))
            .collect();
        let keep = self.unspent().await;

        Ok(SendPartition { send, keep })
    }

    async fn receive(&self, token: &str) -> CashuResult<Vec<Proof>> {
        let _op = self.op_lock.lock().await;
        self.load_proofs(&[]).await?;

        let amount = self.wallet.receive(token, ReceiveOptions::default()).await?;
        let received = self.unspent().await;
        log::info!(
            "Received {} {} at {} as {} proofs",
            u64::from(amount),
            self.unit,
            self.mint_url,
            received.len()
        );
        Ok(received)
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Opens and caches one [`CdkMintConnector`] per mint and unit
pub struct CdkMintFactory {
    connectors: Mutex<HashMap<(String, MintUnit), Arc<CdkMintConnector>>>,
    timeout_secs: u64,
}

impl Default for CdkMintFactory {
    fn default() -> Self {
        Self::new(KEYSET_FETCH_TIMEOUT_SECS)
    }
}

impl CdkMintFactory {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            connectors: Mutex::new(HashMap::new()),
            timeout_secs,
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl MintConnectorFactory for CdkMintFactory {
    async fn fetch_keysets(&self, mint_url: &str) -> CashuResult<Vec<KeysetSummary>> {
        let mint_url = normalize_mint_url(mint_url);
        let probe = build_wallet(&mint_url, MintUnit::Sat, Arc::new(ScratchDatabase::new()))?;

        let keysets = with_timeout(self.timeout_secs, probe.get_mint_keysets())
            .await
            .ok_or_else(|| {
                CashuWalletError::Timeout(format!("keysets from {} after {}s", mint_url, self.timeout_secs))
            })??;

        Ok(keysets
            .into_iter()
            .map(|k| KeysetSummary {
                id: k.id.to_string(),
                unit: k.unit.to_string(),
                active: k.active,
                input_fee_ppk: k.input_fee_ppk,
            })
            .collect())
    }

    async fn connect(&self, mint_url: &str, unit: MintUnit) -> CashuResult<Arc<dyn MintConnector>> {
        let key = (normalize_mint_url(mint_url), unit);
        let mut connectors = self.connectors.lock().await;

        if let Some(existing) = connectors.get(&key) {
            return Ok(existing.clone());
        }

        let connector = Arc::new(CdkMintConnector::new(&key.0, unit)?);
        log::info!("Created CDK connector for {} ({})", key.0, unit);
        connectors.insert(key, connector.clone());
        Ok(connector)
    }
}
