//! Mint Client Adapter
//!
//! A [`MintConnector`] speaks the Cashu protocol to one mint in one unit.
//! [`MintSession::open`] picks that unit from the mint's active keysets
//! (msat preferred over sat) and wraps the connector so callers always work
//! in satoshis.
//!
//! Connectors classify every failure into a
//! [`MintErrorKind`](super::errors::MintErrorKind) before returning it.

use async_trait::async_trait;
use std::sync::Arc;

use super::errors::{CashuResult, CashuWalletError};
use super::types::{
    KeysetSummary, MeltQuoteResponse, MeltResponse, MintQuoteResponse, MintUnit, Proof,
    SendPartition,
};
use super::utils::normalize_mint_url;

// =============================================================================
// Connector Traits
// =============================================================================

/// Protocol primitives against one mint, in one unit
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait MintConnector: Send + Sync {
    fn mint_url(&self) -> &str;

    fn unit(&self) -> MintUnit;

    /// Request a deposit invoice for `amount` (in the connector's unit)
    async fn create_mint_quote(&self, amount: u64) -> CashuResult<MintQuoteResponse>;

    async fn check_mint_quote(&self, quote_id: &str) -> CashuResult<MintQuoteResponse>;

    /// Claim proofs for a paid quote
    async fn mint_proofs(&self, amount: u64, quote_id: &str) -> CashuResult<Vec<Proof>>;

    async fn create_melt_quote(&self, bolt11: &str) -> CashuResult<MeltQuoteResponse>;

    async fn check_melt_quote(&self, quote_id: &str) -> CashuResult<MeltQuoteResponse>;

    /// Redeem `proofs` to pay the quote's invoice
    async fn melt_proofs(
        &self,
        quote: &MeltQuoteResponse,
        proofs: Vec<Proof>,
    ) -> CashuResult<MeltResponse>;

    /// Split `proofs` into exactly `amount` to send and change to keep
    async fn send(
        &self,
        amount: u64,
        proofs: Vec<Proof>,
        include_fees: bool,
    ) -> CashuResult<SendPartition>;

    /// Swap a token's proofs for fresh ones owned by this wallet
    async fn receive(&self, token: &str) -> CashuResult<Vec<Proof>>;
}

/// Opens connectors by mint URL
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait MintConnectorFactory: Send + Sync {
    async fn fetch_keysets(&self, mint_url: &str) -> CashuResult<Vec<KeysetSummary>>;

    async fn connect(&self, mint_url: &str, unit: MintUnit) -> CashuResult<Arc<dyn MintConnector>>;
}

// =============================================================================
// Unit Negotiation
// =============================================================================

/// Pick the accounting unit from a mint's keysets.
///
/// Only active keysets count. Returns the unit and the first active keyset in it.
pub fn negotiate_unit(
    mint_url: &str,
    keysets: &[KeysetSummary],
) -> CashuResult<(MintUnit, String)> {
    let active: Vec<&KeysetSummary> = keysets.iter().filter(|k| k.active).collect();

    for unit in [MintUnit::Msat, MintUnit::Sat] {
        if let Some(keyset) = active
            .iter()
            .find(|k| MintUnit::parse(&k.unit) == Some(unit))
        {
            return Ok((unit, keyset.id.clone()));
        }
    }

    let mut advertised: Vec<String> = keysets
        .iter()
        .map(|k| {
            if k.active {
                k.unit.clone()
            } else {
                format!("{} (inactive)", k.unit)
            }
        })
        .collect();
    advertised.sort();
    advertised.dedup();

    Err(CashuWalletError::NoEligibleUnit {
        mint_url: mint_url.to_string(),
        advertised,
    })
}

// =============================================================================
// Session
// =============================================================================

/// An open, unit-negotiated connection to one mint
#[derive(Clone)]
pub struct MintSession {
    pub client: Arc<dyn MintConnector>,
    pub unit: MintUnit,
    pub preferred_keyset_id: String,
}

impl MintSession {
    pub async fn open(factory: &dyn MintConnectorFactory, mint_url: &str) -> CashuResult<Self> {
        let mint_url = normalize_mint_url(mint_url);
        let keysets = factory.fetch_keysets(&mint_url).await?;
        let (unit, preferred_keyset_id) = negotiate_unit(&mint_url, &keysets)?;
        log::info!(
            "Opened mint {} in unit {} (keyset {})",
            mint_url,
            unit,
            preferred_keyset_id
        );

        let client = factory.connect(&mint_url, unit).await?;
        Ok(Self {
            client,
            unit,
            preferred_keyset_id,
        })
    }

    pub fn mint_url(&self) -> &str {
        self.client.mint_url()
    }

    /// Satoshis expressed in this mint's unit
    pub fn to_unit(&self, sats: u64) -> u64 {
        self.unit.from_sats(sats)
    }

    pub fn to_sats(&self, amount: u64) -> u64 {
        self.unit.to_sats(amount)
    }

    /// Send with fees included, retrying once without fees when the mint
    /// reports the inputs as insufficient or already spent.
    ///
    /// Keep proofs inherit the mint and the sync provenance of the inputs.
    pub async fn send_with_fee_fallback(
        &self,
        amount: u64,
        proofs: Vec<Proof>,
    ) -> CashuResult<SendPartition> {
        let provenance = proofs.iter().find_map(|p| p.event_id.clone());

        let partition = match self.client.send(amount, proofs.clone(), true).await {
            Ok(partition) => partition,
            Err(e) if e.mint_kind().map(|k| k.allows_fee_fallback()).unwrap_or(false) => {
                log::warn!(
                    "Fee-inclusive send of {} {} at {} failed ({}), retrying without fees",
                    amount,
                    self.unit,
                    self.mint_url(),
                    e
                );
                self.client.send(amount, proofs, false).await?
            }
            Err(e) => return Err(e),
        };

        let mint_url = normalize_mint_url(self.mint_url());
        let keep = partition
            .keep
            .into_iter()
            .map(|mut p| {
                p.mint_url = mint_url.clone();
                p.unit = self.unit;
                if p.event_id.is_none() {
                    p.event_id = provenance.clone();
                }
                p
            })
            .collect();

        Ok(SendPartition {
            send: partition.send,
            keep,
        })
    }
}
