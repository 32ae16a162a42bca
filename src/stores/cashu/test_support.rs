//! In-process fakes for mints used by the wallet tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::errors::{CashuResult, CashuWalletError, MintErrorKind};
use super::mint_client::{MintConnector, MintConnectorFactory};
use super::token::decode_token;
use super::types::{
    KeysetSummary, MeltQuoteResponse, MeltResponse, MintQuoteResponse, MintUnit, Proof,
    QuoteState, SendPartition,
};
use super::utils::normalize_mint_url;
use crate::utils::time::now_secs;

/// secp256k1 generator, a valid compressed point for fake signatures
pub const GENERATOR_HEX: &str =
    "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

pub const FAKE_KEYSET_ID: &str = "009a1f293253e41e";

pub fn keyset(id: &str, unit: &str, active: bool) -> KeysetSummary {
    KeysetSummary {
        id: id.to_string(),
        unit: unit.to_string(),
        active,
        input_fee_ppk: 0,
    }
}

/// A well-formed sat proof at `mint`
pub fn proof_at(mint: &str, secret: &str, amount: u64) -> Proof {
    Proof {
        id: FAKE_KEYSET_ID.to_string(),
        amount,
        secret: secret.to_string(),
        c: GENERATOR_HEX.to_string(),
        mint_url: normalize_mint_url(mint),
        unit: MintUnit::Sat,
        event_id: None,
    }
}

/// Split an amount into power-of-two denominations
pub fn split_amount(amount: u64) -> Vec<u64> {
    (0..64)
        .map(|bit| 1u64 << bit)
        .filter(|d| amount & d != 0)
        .collect()
}

// =============================================================================
// Fake Mint
// =============================================================================

#[derive(Default)]
struct FakeMintState {
    counter: u64,
    keysets: Vec<KeysetSummary>,
    spent: HashSet<String>,
    mint_quotes: HashMap<String, (u64, QuoteState)>,
    melt_quotes: HashMap<String, MeltQuoteResponse>,
    melt_pricing: (u64, u64),
    fail_next_send: Option<MintErrorKind>,
    fail_mint_proofs: Option<CashuWalletError>,
    fail_check_melt: bool,
    melt_checks_left: Option<usize>,
    fail_check_mint: bool,
    send_calls: Vec<bool>,
    melt_calls: usize,
    mint_calls: usize,
}

/// A scriptable in-memory mint
#[derive(Clone)]
pub struct FakeMint {
    url: String,
    unit: MintUnit,
    state: Arc<Mutex<FakeMintState>>,
}

impl FakeMint {
    pub fn new(url: &str, unit: MintUnit) -> Self {
        let state = FakeMintState {
            keysets: vec![keyset(FAKE_KEYSET_ID, unit.as_str(), true)],
            melt_pricing: (100, 2),
            ..Default::default()
        };
        Self {
            url: normalize_mint_url(url),
            unit,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_keysets(&self, keysets: Vec<KeysetSummary>) {
        self.state.lock().unwrap().keysets = keysets;
    }

    /// Fresh unspent proofs with the given amounts
    pub fn issue(&self, amounts: &[u64]) -> Vec<Proof> {
        let mut state = self.state.lock().unwrap();
        self.issue_locked(&mut state, amounts)
    }

    fn issue_locked(&self, state: &mut FakeMintState, amounts: &[u64]) -> Vec<Proof> {
        amounts
            .iter()
            .map(|amount| {
                state.counter += 1;
                Proof {
                    id: FAKE_KEYSET_ID.to_string(),
                    amount: *amount,
                    secret: format!("{}#{:08}", self.url, state.counter),
                    c: GENERATOR_HEX.to_string(),
                    mint_url: self.url.clone(),
                    unit: self.unit,
                    event_id: None,
                }
            })
            .collect()
    }

    fn issue_split(&self, state: &mut FakeMintState, amount: u64) -> Vec<Proof> {
        self.issue_locked(state, &split_amount(amount))
    }

    /// Mark a mint quote as paid by the payer
    pub fn pay_quote(&self, quote_id: &str) {
        if let Some(q) = self.state.lock().unwrap().mint_quotes.get_mut(quote_id) {
            q.1 = QuoteState::Paid;
        }
    }

    pub fn set_melt_pricing(&self, amount: u64, fee_reserve: u64) {
        self.state.lock().unwrap().melt_pricing = (amount, fee_reserve);
    }

    pub fn fail_next_send(&self, kind: MintErrorKind) {
        self.state.lock().unwrap().fail_next_send = Some(kind);
    }

    pub fn fail_next_mint(&self, err: CashuWalletError) {
        self.state.lock().unwrap().fail_mint_proofs = Some(err);
    }

    pub fn fail_melt_checks(&self, fail: bool) {
        self.state.lock().unwrap().fail_check_melt = fail;
    }

    /// Let `n` more melt checks through, then fail every one after
    pub fn fail_melt_checks_after(&self, n: usize) {
        self.state.lock().unwrap().melt_checks_left = Some(n);
    }

    pub fn fail_mint_checks(&self, fail: bool) {
        self.state.lock().unwrap().fail_check_mint = fail;
    }

    /// `include_fees` flag of every send call, in order
    pub fn send_calls(&self) -> Vec<bool> {
        self.state.lock().unwrap().send_calls.clone()
    }

    pub fn melt_calls(&self) -> usize {
        self.state.lock().unwrap().melt_calls
    }

    pub fn mint_calls(&self) -> usize {
        self.state.lock().unwrap().mint_calls
    }

    fn spend(state: &mut FakeMintState, proofs: &[Proof]) -> CashuResult<u64> {
        if proofs.iter().any(|p| state.spent.contains(&p.secret)) {
            return Err(CashuWalletError::Mint {
                kind: MintErrorKind::AlreadySpent,
                message: "Token already spent".to_string(),
            });
        }
        for p in proofs {
            state.spent.insert(p.secret.clone());
        }
        Ok(proofs.iter().map(|p| p.amount).sum())
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl MintConnector for FakeMint {
    fn mint_url(&self) -> &str {
        &self.url
    }

    fn unit(&self) -> MintUnit {
        self.unit
    }

    async fn create_mint_quote(&self, amount: u64) -> CashuResult<MintQuoteResponse> {
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let quote_id = format!("mq-{}", state.counter);
        state
            .mint_quotes
            .insert(quote_id.clone(), (amount, QuoteState::Unpaid));
        Ok(MintQuoteResponse {
            quote_id,
            request: format!("lnbc{}n1fake", amount),
            amount: Some(amount),
            state: QuoteState::Unpaid,
            expiry: Some(now_secs() + 600),
        })
    }

    async fn check_mint_quote(&self, quote_id: &str) -> CashuResult<MintQuoteResponse> {
        let state = self.state.lock().unwrap();
        if state.fail_check_mint {
            return Err(CashuWalletError::Network("connection refused".to_string()));
        }
        let (amount, quote_state) = state
            .mint_quotes
            .get(quote_id)
            .cloned()
            .ok_or_else(|| CashuWalletError::mint("Unknown quote"))?;
        Ok(MintQuoteResponse {
            quote_id: quote_id.to_string(),
            request: format!("lnbc{}n1fake", amount),
            amount: Some(amount),
            state: quote_state,
            expiry: Some(now_secs() + 600),
        })
    }

    async fn mint_proofs(&self, amount: u64, quote_id: &str) -> CashuResult<Vec<Proof>> {
        let mut state = self.state.lock().unwrap();
        state.mint_calls += 1;
        if let Some(err) = state.fail_mint_proofs.take() {
            return Err(err);
        }
        let quote_state = state
            .mint_quotes
            .get(quote_id)
            .map(|q| q.1)
            .ok_or_else(|| CashuWalletError::mint("Unknown quote"))?;
        match quote_state {
            QuoteState::Paid => {
                state
                    .mint_quotes
                    .insert(quote_id.to_string(), (amount, QuoteState::Issued));
                Ok(self.issue_split(&mut state, amount))
            }
            QuoteState::Issued => Err(CashuWalletError::Mint {
                kind: MintErrorKind::AlreadyIssued,
                message: "Quote already issued".to_string(),
            }),
            _ => Err(CashuWalletError::Mint {
                kind: MintErrorKind::QuoteNotPaid,
                message: "Quote not paid".to_string(),
            }),
        }
    }

    async fn create_melt_quote(&self, bolt11: &str) -> CashuResult<MeltQuoteResponse> {
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let (amount, fee_reserve) = state.melt_pricing;
        let quote = MeltQuoteResponse {
            quote_id: format!("melt-{}", state.counter),
            request: bolt11.to_string(),
            amount,
            fee_reserve,
            state: QuoteState::Unpaid,
            expiry: Some(now_secs() + 600),
        };
        state.melt_quotes.insert(quote.quote_id.clone(), quote.clone());
        Ok(quote)
    }

    async fn check_melt_quote(&self, quote_id: &str) -> CashuResult<MeltQuoteResponse> {
        let mut state = self.state.lock().unwrap();
        let exhausted = match state.melt_checks_left.as_mut() {
            Some(0) => true,
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        };
        if state.fail_check_melt || exhausted {
            return Err(CashuWalletError::Network("timeout".to_string()));
        }
        state
            .melt_quotes
            .get(quote_id)
            .cloned()
            .ok_or_else(|| CashuWalletError::mint("Unknown quote"))
    }

    async fn melt_proofs(
        &self,
        quote: &MeltQuoteResponse,
        proofs: Vec<Proof>,
    ) -> CashuResult<MeltResponse> {
        let mut state = self.state.lock().unwrap();
        state.melt_calls += 1;
        let total: u64 = proofs.iter().map(|p| p.amount).sum();
        if total < quote.total_debit() {
            return Err(CashuWalletError::Mint {
                kind: MintErrorKind::InsufficientFunds,
                message: "Insufficient inputs for melt".to_string(),
            });
        }
        Self::spend(&mut state, &proofs)?;

        // half the reserve is actually spent on routing
        let fee_paid = quote.fee_reserve / 2;
        let change = self.issue_split(&mut state, total - quote.amount - fee_paid);
        if let Some(q) = state.melt_quotes.get_mut(&quote.quote_id) {
            q.state = QuoteState::Paid;
        }
        Ok(MeltResponse {
            paid: true,
            preimage: Some("00".repeat(32)),
            change,
            fee_paid,
        })
    }

    async fn send(
        &self,
        amount: u64,
        proofs: Vec<Proof>,
        include_fees: bool,
    ) -> CashuResult<SendPartition> {
        let mut state = self.state.lock().unwrap();
        state.send_calls.push(include_fees);
        if let Some(kind) = state.fail_next_send.take() {
            return Err(CashuWalletError::Mint {
                kind,
                message: format!("send rejected: {}", kind),
            });
        }
        let total: u64 = proofs.iter().map(|p| p.amount).sum();
        if total < amount {
            return Err(CashuWalletError::Mint {
                kind: MintErrorKind::InsufficientFunds,
                message: "Insufficient funds".to_string(),
            });
        }
        Self::spend(&mut state, &proofs)?;
        let send = self.issue_split(&mut state, amount);
        let keep = self.issue_split(&mut state, total - amount);
        Ok(SendPartition { send, keep })
    }

    async fn receive(&self, token: &str) -> CashuResult<Vec<Proof>> {
        let decoded = decode_token(token)?;
        if decoded.mint_url != self.url {
            return Err(CashuWalletError::mint("Token is from another mint"));
        }
        let mut state = self.state.lock().unwrap();
        let total = Self::spend(&mut state, &decoded.proofs)?;
        Ok(self.issue_split(&mut state, total))
    }
}

// =============================================================================
// Fake Factory
// =============================================================================

#[derive(Default, Clone)]
pub struct FakeMintFactory {
    mints: Arc<Mutex<HashMap<String, FakeMint>>>,
    offline: Arc<Mutex<HashSet<String>>>,
}

impl FakeMintFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mint(&self, mint: FakeMint) {
        self.mints
            .lock()
            .unwrap()
            .insert(mint.url().to_string(), mint);
    }

    pub fn set_offline(&self, url: &str, offline: bool) {
        let url = normalize_mint_url(url);
        let mut set = self.offline.lock().unwrap();
        if offline {
            set.insert(url);
        } else {
            set.remove(&url);
        }
    }

    fn lookup(&self, url: &str) -> CashuResult<FakeMint> {
        let url = normalize_mint_url(url);
        if self.offline.lock().unwrap().contains(&url) {
            return Err(CashuWalletError::Network(format!("{} unreachable", url)));
        }
        self.mints
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .ok_or_else(|| CashuWalletError::Network(format!("{} unreachable", url)))
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl MintConnectorFactory for FakeMintFactory {
    async fn fetch_keysets(&self, mint_url: &str) -> CashuResult<Vec<KeysetSummary>> {
        let mint = self.lookup(mint_url)?;
        let keysets = mint.state.lock().unwrap().keysets.clone();
        Ok(keysets)
    }

    async fn connect(&self, mint_url: &str, _unit: MintUnit) -> CashuResult<Arc<dyn MintConnector>> {
        Ok(Arc::new(self.lookup(mint_url)?))
    }
}
