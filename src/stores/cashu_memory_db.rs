//! Scratch database for the CDK wallet
//!
//! The ledger owns proofs; CDK only needs somewhere to hold them for the
//! length of one swap, send, melt or receive. Each connector injects the
//! proofs it is about to use, runs the CDK operation, then reads back what
//! is left unspent.

use async_trait::async_trait;
use cdk::mint_url::MintUrl;
use cdk::nuts::{CurrencyUnit, Id, KeySet, KeySetInfo, Keys, MintInfo, PublicKey, SpendingConditions, State};
use cdk::types::ProofInfo;
use cdk_common::wallet::{
    MeltQuote, MintQuote as WalletMintQuote, Transaction, TransactionDirection, TransactionId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use cdk::cdk_database::{Error, WalletDatabase as Database};

#[derive(Debug, Clone, Default)]
pub struct ScratchDatabase {
    proofs: Arc<RwLock<Vec<ProofInfo>>>,
    mints: Arc<RwLock<HashMap<MintUrl, Option<MintInfo>>>>,
    keysets: Arc<RwLock<HashMap<MintUrl, Vec<KeySetInfo>>>>,
    keyset_by_id: Arc<RwLock<HashMap<Id, KeySetInfo>>>,
    keys: Arc<RwLock<HashMap<Id, Keys>>>,
    mint_quotes: Arc<RwLock<HashMap<String, WalletMintQuote>>>,
    melt_quotes: Arc<RwLock<HashMap<String, MeltQuote>>>,
    transactions: Arc<RwLock<HashMap<[u8; 32], Transaction>>>,
    keyset_counters: Arc<RwLock<HashMap<Id, u32>>>,
}

impl ScratchDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every held proof with `proofs`
    pub async fn reset_proofs(&self, proofs: Vec<ProofInfo>) {
        let mut stored = self.proofs.write().await;
        *stored = proofs;
    }

    /// Proofs CDK still considers unspent
    pub async fn unspent_proofs(&self) -> Vec<cdk::nuts::Proof> {
        self.proofs
            .read()
            .await
            .iter()
            .filter(|p| p.state == State::Unspent)
            .map(|p| p.proof.clone())
            .collect()
    }
}

fn matches_filter(
    info: &ProofInfo,
    mint_url: &Option<MintUrl>,
    unit: &Option<CurrencyUnit>,
    state: &Option<Vec<State>>,
    spending_conditions: &Option<Vec<SpendingConditions>>,
) -> bool {
    if let Some(url) = mint_url {
        if &info.mint_url != url {
            return false;
        }
    }
    if let Some(unit) = unit {
        if &info.unit != unit {
            return false;
        }
    }
    if let Some(states) = state {
        if !states.contains(&info.state) {
            return false;
        }
    }
    if let Some(conditions) = spending_conditions {
        match &info.spending_condition {
            Some(condition) if conditions.contains(condition) => {}
            _ => return false,
        }
    }
    true
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Database for ScratchDatabase {
    type Err = Error;

    // Mint methods
    async fn add_mint(&self, mint_url: MintUrl, mint_info: Option<MintInfo>) -> Result<(), Error> {
        self.mints.write().await.insert(mint_url, mint_info);
        Ok(())
    }

    async fn remove_mint(&self, mint_url: MintUrl) -> Result<(), Error> {
        self.mints.write().await.remove(&mint_url);
        Ok(())
    }

    async fn get_mint(&self, mint_url: MintUrl) -> Result<Option<MintInfo>, Error> {
        Ok(self.mints.read().await.get(&mint_url).cloned().flatten())
    }

    async fn get_mints(&self) -> Result<HashMap<MintUrl, Option<MintInfo>>, Error> {
        Ok(self.mints.read().await.clone())
    }

    async fn update_mint_url(&self, old_mint_url: MintUrl, new_mint_url: MintUrl) -> Result<(), Error> {
        let mut mints = self.mints.write().await;
        if let Some(info) = mints.remove(&old_mint_url) {
            mints.insert(new_mint_url, info);
        }
        Ok(())
    }

    // Keyset methods
    async fn add_mint_keysets(&self, mint_url: MintUrl, keysets: Vec<KeySetInfo>) -> Result<(), Error> {
        let mut all_keysets = self.keysets.write().await;
        let mut by_id = self.keyset_by_id.write().await;

        let entry = all_keysets.entry(mint_url).or_default();
        for keyset in keysets {
            by_id.insert(keyset.id.clone(), keyset.clone());
            match entry.iter_mut().find(|k| k.id == keyset.id) {
                Some(existing) => *existing = keyset,
                None => entry.push(keyset),
            }
        }
        Ok(())
    }

    async fn get_mint_keysets(&self, mint_url: MintUrl) -> Result<Option<Vec<KeySetInfo>>, Error> {
        Ok(self.keysets.read().await.get(&mint_url).cloned())
    }

    async fn get_keyset_by_id(&self, keyset_id: &Id) -> Result<Option<KeySetInfo>, Error> {
        Ok(self.keyset_by_id.read().await.get(keyset_id).cloned())
    }

    // Mint quote methods
    async fn add_mint_quote(&self, quote: WalletMintQuote) -> Result<(), Error> {
        self.mint_quotes.write().await.insert(quote.id.clone(), quote);
        Ok(())
    }

    async fn get_mint_quote(&self, quote_id: &str) -> Result<Option<WalletMintQuote>, Error> {
        Ok(self.mint_quotes.read().await.get(quote_id).cloned())
    }

    async fn get_mint_quotes(&self) -> Result<Vec<WalletMintQuote>, Error> {
        Ok(self.mint_quotes.read().await.values().cloned().collect())
    }

    async fn remove_mint_quote(&self, quote_id: &str) -> Result<(), Error> {
        self.mint_quotes.write().await.remove(quote_id);
        Ok(())
    }

    // Melt quote methods
    async fn add_melt_quote(&self, quote: MeltQuote) -> Result<(), Error> {
        self.melt_quotes.write().await.insert(quote.id.clone(), quote);
        Ok(())
    }

    async fn get_melt_quote(&self, quote_id: &str) -> Result<Option<MeltQuote>, Error> {
        Ok(self.melt_quotes.read().await.get(quote_id).cloned())
    }

    async fn get_melt_quotes(&self) -> Result<Vec<MeltQuote>, Error> {
        Ok(self.melt_quotes.read().await.values().cloned().collect())
    }

    async fn remove_melt_quote(&self, quote_id: &str) -> Result<(), Error> {
        self.melt_quotes.write().await.remove(quote_id);
        Ok(())
    }

    // Keys methods
    async fn add_keys(&self, keyset: KeySet) -> Result<(), Error> {
        self.keys.write().await.insert(keyset.id.clone(), keyset.keys);
        Ok(())
    }

    async fn get_keys(&self, id: &Id) -> Result<Option<Keys>, Error> {
        Ok(self.keys.read().await.get(id).cloned())
    }

    async fn remove_keys(&self, id: &Id) -> Result<(), Error> {
        self.keys.write().await.remove(id);
        Ok(())
    }

    // Proof methods
    async fn update_proofs(&self, add_proofs: Vec<ProofInfo>, remove_ys: Vec<PublicKey>) -> Result<(), Error> {
        let mut stored = self.proofs.write().await;
        stored.retain(|p| !remove_ys.contains(&p.y));
        for info in add_proofs {
            match stored.iter_mut().find(|p| p.y == info.y) {
                Some(existing) => *existing = info,
                None => stored.push(info),
            }
        }
        Ok(())
    }

    async fn get_proofs(
        &self,
        mint_url: Option<MintUrl>,
        unit: Option<CurrencyUnit>,
        state: Option<Vec<State>>,
        spending_conditions: Option<Vec<SpendingConditions>>,
    ) -> Result<Vec<ProofInfo>, Error> {
        let stored = self.proofs.read().await;
        Ok(stored
            .iter()
            .filter(|p| matches_filter(p, &mint_url, &unit, &state, &spending_conditions))
            .cloned()
            .collect())
    }

    async fn update_proofs_state(&self, ys: Vec<PublicKey>, state: State) -> Result<(), Error> {
        let mut stored = self.proofs.write().await;
        for info in stored.iter_mut().filter(|p| ys.contains(&p.y)) {
            info.state = state;
        }
        Ok(())
    }

    async fn increment_keyset_counter(&self, keyset_id: &Id, count: u32) -> Result<u32, Error> {
        let mut counters = self.keyset_counters.write().await;
        let current = counters.entry(keyset_id.clone()).or_insert(0);
        *current += count;
        Ok(*current)
    }

    // Transaction methods
    async fn add_transaction(&self, transaction: Transaction) -> Result<(), Error> {
        let id_bytes = *transaction.id().as_bytes();
        self.transactions.write().await.insert(id_bytes, transaction);
        Ok(())
    }

    async fn get_transaction(&self, transaction_id: TransactionId) -> Result<Option<Transaction>, Error> {
        Ok(self.transactions.read().await.get(transaction_id.as_bytes()).cloned())
    }

    async fn list_transactions(
        &self,
        mint_url: Option<MintUrl>,
        direction: Option<TransactionDirection>,
        unit: Option<CurrencyUnit>,
    ) -> Result<Vec<Transaction>, Error> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .filter(|t| mint_url.as_ref().map(|u| &t.mint_url == u).unwrap_or(true))
            .filter(|t| direction.as_ref().map(|d| &t.direction == d).unwrap_or(true))
            .filter(|t| unit.as_ref().map(|u| &t.unit == u).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn remove_transaction(&self, transaction_id: TransactionId) -> Result<(), Error> {
        self.transactions.write().await.remove(transaction_id.as_bytes());
        Ok(())
    }
}
