//! Cashu ecash settlement
//!
//! This module implements the wallet side of paying inference nodes with
//! Cashu ecash. It provides:
//! - The proof ledger and its per-mint balances
//! - Mint access through a connector trait, with unit negotiation
//! - Lightning deposits (mint quotes) and withdrawals (melt quotes)
//! - Token send and receive
//! - Recovery of interrupted quotes and a poller for outstanding ones
//! - Funding a node payment from whichever mint can cover it

pub mod types;
pub mod errors;
pub mod utils;
pub mod ledger;
pub mod locks;
pub mod mint_client;
pub mod mint_mgmt;
pub mod token;
pub mod history;
pub mod quotes;
pub mod lightning;
pub mod recovery;
pub mod send;
pub mod receive;
pub mod scheduler;

#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use types::*;
pub use errors::{CashuResult, CashuWalletError, ErrorCategory, MintErrorKind};

pub use ledger::ProofLedger;
pub use mint_client::{MintConnector, MintConnectorFactory, MintSession};
pub use token::{decode_token, encode_token, get_token_info, is_token, DecodedToken, TokenInfo};
pub use quotes::{format_expiry, is_quote_expired, time_until_expiry, ExpiryStatus, InvoiceStore};
pub use history::TransactionHistory;
pub use lightning::{
    advance_mint_quote,
    create_melt_quote,
    create_mint_quote,
    pay_melt_quote,
    refresh_melt_quote,
    AdvanceOutcome,
    MeltOutcome,
};
pub use recovery::{check_pending_invoices, SweepSummary};
pub use send::{send_token, SentToken};
pub use receive::{receive_token, ReceivedToken};
pub use mint_mgmt::{fund_from_balance, funding_candidates};
pub use scheduler::{InvoicePoller, MintQuotePoll, NodeInvoicePoll, PollPhase, PollProgress, PollStatus, PollTarget};
