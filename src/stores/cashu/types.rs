//! Cashu wallet data types
//!
//! Proofs, quotes (invoices), transaction records and the mint-facing
//! request/response shapes shared by the connector implementations.

use serde::{Deserialize, Serialize};

// =============================================================================
// Accounting Unit
// =============================================================================

/// Accounting unit negotiated with a mint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MintUnit {
    #[default]
    Sat,
    Msat,
}

impl MintUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            MintUnit::Sat => "sat",
            MintUnit::Msat => "msat",
        }
    }

    /// Parse a unit string as advertised by a mint keyset
    pub fn parse(unit: &str) -> Option<Self> {
        match unit.trim().to_lowercase().as_str() {
            "sat" => Some(MintUnit::Sat),
            "msat" => Some(MintUnit::Msat),
            _ => None,
        }
    }

    /// Express a satoshi amount in this unit
    pub fn from_sats(&self, sats: u64) -> u64 {
        match self {
            MintUnit::Sat => sats,
            MintUnit::Msat => sats.saturating_mul(1000),
        }
    }

    /// Convert an amount in this unit to whole satoshis (floored)
    pub fn to_sats(&self, amount: u64) -> u64 {
        match self {
            MintUnit::Sat => amount,
            MintUnit::Msat => amount / 1000,
        }
    }

    /// Whole satoshis needed to cover `amount` in this unit (rounded up)
    pub fn to_sats_ceil(&self, amount: u64) -> u64 {
        match self {
            MintUnit::Sat => amount,
            MintUnit::Msat => amount.div_ceil(1000),
        }
    }
}

impl std::fmt::Display for MintUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Proofs
// =============================================================================

/// A bearer ecash proof held in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    /// Keyset id
    pub id: String,
    /// Amount in the mint's accounting unit
    pub amount: u64,
    #[serde(default)]
    pub secret: String,
    /// Unblinded signature
    #[serde(rename = "C")]
    pub c: String,
    #[serde(default)]
    pub mint_url: String,
    #[serde(default)]
    pub unit: MintUnit,
    /// Id of the sync snapshot event this proof arrived in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Identity of a proof for set-difference operations
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProofIdentity {
    Secret(String),
    Signature { id: String, amount: u64, c: String },
}

impl Proof {
    pub fn identity(&self) -> ProofIdentity {
        if self.secret.is_empty() {
            ProofIdentity::Signature {
                id: self.id.clone(),
                amount: self.amount,
                c: self.c.clone(),
            }
        } else {
            ProofIdentity::Secret(self.secret.clone())
        }
    }

    /// Value of this proof in whole satoshis
    pub fn sats(&self) -> u64 {
        self.unit.to_sats(self.amount)
    }

    /// Secret prefix safe for logging
    pub fn short_secret(&self) -> &str {
        let end = self
            .secret
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.secret.len());
        &self.secret[..end]
    }
}

/// Sum of proof amounts in their native unit
pub fn total_amount(proofs: &[Proof]) -> u64 {
    proofs.iter().map(|p| p.amount).sum()
}

/// Value of a proof set in whole satoshis.
///
/// Amounts are summed per unit before converting, so msat change split
/// across many small proofs is not lost to per-proof flooring.
pub fn total_sats<'a, I>(proofs: I) -> u64
where
    I: IntoIterator<Item = &'a Proof>,
{
    let (sat, msat) = proofs
        .into_iter()
        .fold((0u64, 0u64), |(sat, msat), p| match p.unit {
            MintUnit::Sat => (sat.saturating_add(p.amount), msat),
            MintUnit::Msat => (sat, msat.saturating_add(p.amount)),
        });
    sat.saturating_add(MintUnit::Msat.to_sats(msat))
}

/// Result of a mint-side send: proofs to hand over and change to keep
#[derive(Debug, Clone, Default)]
pub struct SendPartition {
    pub send: Vec<Proof>,
    pub keep: Vec<Proof>,
}

// =============================================================================
// Quotes / Invoices
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteKind {
    Mint,
    Melt,
}

/// Lifecycle state of a quote
///
/// `Paid` is the mint's view of settlement; `Issued` marks that this client
/// finished minting (or melting) against the quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteState {
    Unpaid,
    Pending,
    Paid,
    Issued,
    Expired,
}

impl QuoteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteState::Unpaid => "UNPAID",
            QuoteState::Pending => "PENDING",
            QuoteState::Paid => "PAID",
            QuoteState::Issued => "ISSUED",
            QuoteState::Expired => "EXPIRED",
        }
    }

    /// Settled at the mint, proofs may be claimed
    pub fn is_settled(&self) -> bool {
        matches!(self, QuoteState::Paid | QuoteState::Issued)
    }
}

impl std::fmt::Display for QuoteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted record of one Lightning operation against a mint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRecord {
    pub quote_id: String,
    #[serde(rename = "type")]
    pub kind: QuoteKind,
    pub mint_url: String,
    pub payment_request: String,
    /// Amount in satoshis
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_reserve: Option<u64>,
    pub state: QuoteState,
    pub created_at: u64,
    pub checked_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<u64>,
}

impl InvoiceRecord {
    /// Locally fully processed or settled; the recovery sweep skips these
    pub fn is_done(&self) -> bool {
        matches!(self.state, QuoteState::Issued | QuoteState::Paid)
            && !(self.kind == QuoteKind::Mint && self.state == QuoteState::Paid)
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    /// Amount plus fee reserve, in satoshis
    pub fn total_debit(&self) -> u64 {
        self.amount.saturating_add(self.fee_reserve.unwrap_or(0))
    }
}

// =============================================================================
// Transaction History
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Mint,
    Send,
    Import,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Success,
    Failed,
}

/// Append-only audit entry shown in the wallet history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Amount in satoshis
    pub amount: u64,
    pub timestamp: u64,
    pub status: TransactionStatus,
    pub message: String,
    /// Ledger balance in satoshis after the mutation
    pub balance: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_id: Option<String>,
}

// =============================================================================
// Mint Protocol Shapes
// =============================================================================

/// Keyset as advertised by a mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysetSummary {
    pub id: String,
    pub unit: String,
    pub active: bool,
    pub input_fee_ppk: u64,
}

/// Mint quote as reported by the mint
#[derive(Debug, Clone, PartialEq)]
pub struct MintQuoteResponse {
    pub quote_id: String,
    pub request: String,
    /// Amount in the mint's unit, when the mint echoes it
    pub amount: Option<u64>,
    pub state: QuoteState,
    pub expiry: Option<u64>,
}

/// Melt quote as reported by the mint
#[derive(Debug, Clone, PartialEq)]
pub struct MeltQuoteResponse {
    pub quote_id: String,
    pub request: String,
    /// Amount in the mint's unit
    pub amount: u64,
    /// Fee reserve in the mint's unit
    pub fee_reserve: u64,
    pub state: QuoteState,
    pub expiry: Option<u64>,
}

impl MeltQuoteResponse {
    /// The real debit of paying this quote
    pub fn total_debit(&self) -> u64 {
        self.amount.saturating_add(self.fee_reserve)
    }
}

/// Outcome of melting proofs
#[derive(Debug, Clone, Default)]
pub struct MeltResponse {
    pub paid: bool,
    pub preimage: Option<String>,
    pub change: Vec<Proof>,
    pub fee_paid: u64,
}
