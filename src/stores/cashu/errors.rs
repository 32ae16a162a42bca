//! Cashu wallet error types
//!
//! Every failure is sorted into one of five categories (user input, mint
//! protocol, network, sync, persistence). Mint failures are classified into a
//! [`MintErrorKind`] at the connector boundary so the quote and send logic can
//! branch on kinds instead of mint wording.

use cdk::Error as CdkError;
use std::fmt;

// =============================================================================
// NUT Error Codes (NUT-00)
// =============================================================================

/// Subset of NUT error codes the settlement engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NutErrorCode {
    TokenAlreadySpent = 11001,
    TokenPending = 11002,
    TransactionUnbalanced = 11003,
    UnsupportedUnit = 11004,
    MintingDisabled = 11005,
    QuoteNotPaid = 11006,
    QuoteExpired = 11007,
    QuotePending = 11008,
    /// Outputs already signed, i.e. the quote was minted before
    BlindedMessageAlreadySigned = 11009,
    LightningError = 20001,
    InvoiceAlreadyPaid = 20002,
    /// Mint quote already issued
    QuoteAlreadyIssued = 20005,
    Unknown = 65535,
}

impl NutErrorCode {
    pub fn from_code(code: u16) -> Self {
        match code {
            11001 => Self::TokenAlreadySpent,
            11002 => Self::TokenPending,
            11003 => Self::TransactionUnbalanced,
            11004 => Self::UnsupportedUnit,
            11005 => Self::MintingDisabled,
            11006 => Self::QuoteNotPaid,
            11007 => Self::QuoteExpired,
            11008 => Self::QuotePending,
            11009 => Self::BlindedMessageAlreadySigned,
            20001 => Self::LightningError,
            20002 => Self::InvoiceAlreadyPaid,
            20005 => Self::QuoteAlreadyIssued,
            _ => Self::Unknown,
        }
    }

    pub fn code(&self) -> u16 {
        *self as u16
    }
}

impl fmt::Display for NutErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TokenAlreadySpent => "Token already spent",
            Self::TokenPending => "Token pending",
            Self::TransactionUnbalanced => "Transaction unbalanced",
            Self::UnsupportedUnit => "Unsupported unit",
            Self::MintingDisabled => "Minting disabled",
            Self::QuoteNotPaid => "Quote not paid",
            Self::QuoteExpired => "Quote expired",
            Self::QuotePending => "Quote pending",
            Self::BlindedMessageAlreadySigned => "Blinded message already signed",
            Self::LightningError => "Lightning error",
            Self::InvoiceAlreadyPaid => "Invoice already paid",
            Self::QuoteAlreadyIssued => "Quote already issued",
            Self::Unknown => "Unknown error",
        };
        write!(f, "{} ({})", label, self.code())
    }
}

// =============================================================================
// Mint Error Classification
// =============================================================================

/// Classified mint failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MintErrorKind {
    /// Quote was minted in a previous attempt
    AlreadyIssued,
    /// Input proofs were spent already
    AlreadySpent,
    InsufficientFunds,
    QuoteNotPaid,
    QuoteExpired,
    QuotePending,
    UnsupportedUnit,
    Other,
}

impl MintErrorKind {
    /// Classify a mint failure from its NUT code, falling back to the message text.
    ///
    /// This is the only place in the crate where mint wording is inspected.
    pub fn classify(code: Option<u16>, message: &str) -> Self {
        if let Some(code) = code {
            match NutErrorCode::from_code(code) {
                NutErrorCode::TokenAlreadySpent => return Self::AlreadySpent,
                NutErrorCode::BlindedMessageAlreadySigned
                | NutErrorCode::QuoteAlreadyIssued => return Self::AlreadyIssued,
                NutErrorCode::QuoteNotPaid => return Self::QuoteNotPaid,
                NutErrorCode::QuoteExpired => return Self::QuoteExpired,
                NutErrorCode::QuotePending | NutErrorCode::TokenPending => {
                    return Self::QuotePending
                }
                NutErrorCode::UnsupportedUnit => return Self::UnsupportedUnit,
                NutErrorCode::TransactionUnbalanced => return Self::InsufficientFunds,
                _ => {}
            }
        }

        let msg = message.to_lowercase();
        if msg.contains("already issued")
            || msg.contains("already minted")
            || msg.contains("outputs have already been signed")
            || msg.contains("already signed")
        {
            Self::AlreadyIssued
        } else if msg.contains("already spent") || msg.contains("already redeemed") {
            Self::AlreadySpent
        } else if msg.contains("insufficient") || msg.contains("not enough") {
            Self::InsufficientFunds
        } else if msg.contains("not paid") || msg.contains("unpaid") {
            Self::QuoteNotPaid
        } else if msg.contains("expired") {
            Self::QuoteExpired
        } else if msg.contains("pending") {
            Self::QuotePending
        } else if msg.contains("unsupported unit") || msg.contains("unit not supported") {
            Self::UnsupportedUnit
        } else {
            Self::Other
        }
    }

    /// Failures that mean the work was already done by an earlier attempt
    pub fn is_already_processed(&self) -> bool {
        matches!(self, Self::AlreadyIssued | Self::AlreadySpent)
    }

    /// Failures for which a send is retried without fee inclusion
    pub fn allows_fee_fallback(&self) -> bool {
        matches!(self, Self::InsufficientFunds | Self::AlreadySpent)
    }
}

impl fmt::Display for MintErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlreadyIssued => "already issued",
            Self::AlreadySpent => "already spent",
            Self::InsufficientFunds => "insufficient funds",
            Self::QuoteNotPaid => "quote not paid",
            Self::QuoteExpired => "quote expired",
            Self::QuotePending => "quote pending",
            Self::UnsupportedUnit => "unsupported unit",
            Self::Other => "mint error",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Wallet Error
// =============================================================================

/// Error category used for propagation decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    UserInput,
    MintProtocol,
    Network,
    Sync,
    Persistence,
}

/// Cashu wallet error type
#[derive(Debug)]
pub enum CashuWalletError {
    // ==========================================================================
    // User Input Errors
    // ==========================================================================
    InvalidAmount { reason: String },
    InvalidToken { reason: String },
    InvalidMintUrl { url: String },
    InvalidInvoice { reason: String },
    QuoteNotFound { quote_id: String },
    InsufficientFunds { mint_url: String, available: u64, required: u64 },
    /// No candidate mint can cover the amount on its own
    NoFundingMint { requested: u64, best: Option<(String, u64)> },

    // ==========================================================================
    // Mint Protocol Errors
    // ==========================================================================
    NoEligibleUnit { mint_url: String, advertised: Vec<String> },
    Mint { kind: MintErrorKind, message: String },

    // ==========================================================================
    // Network Errors
    // ==========================================================================
    Network(String),
    Timeout(String),

    // ==========================================================================
    // Sync Errors
    // ==========================================================================
    Sync(String),

    // ==========================================================================
    // Persistence Errors
    // ==========================================================================
    Persistence(String),
}

impl CashuWalletError {
    /// Build a mint error, classifying its message
    pub fn mint(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = MintErrorKind::classify(None, &message);
        Self::Mint { kind, message }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidAmount { .. }
            | Self::InvalidToken { .. }
            | Self::InvalidMintUrl { .. }
            | Self::InvalidInvoice { .. }
            | Self::QuoteNotFound { .. }
            | Self::InsufficientFunds { .. }
            | Self::NoFundingMint { .. } => ErrorCategory::UserInput,
            Self::NoEligibleUnit { .. } | Self::Mint { .. } => ErrorCategory::MintProtocol,
            Self::Network(_) | Self::Timeout(_) => ErrorCategory::Network,
            Self::Sync(_) => ErrorCategory::Sync,
            Self::Persistence(_) => ErrorCategory::Persistence,
        }
    }

    /// Mint error kind, if this is a classified mint failure
    pub fn mint_kind(&self) -> Option<MintErrorKind> {
        match self {
            Self::Mint { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Transient failures worth retrying on the next poll
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Mint { kind, .. } => {
                matches!(kind, MintErrorKind::QuotePending | MintErrorKind::Other)
            }
            _ => false,
        }
    }

    /// Short human-readable message for display
    pub fn user_message(&self) -> String {
        match self {
            Self::Mint { message, .. } if !message.trim().is_empty() => message.clone(),
            Self::Mint { kind, .. } => format!("Mint rejected the request: {}", kind),
            Self::Network(_) | Self::Timeout(_) => {
                "Could not reach the mint. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for CashuWalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAmount { reason } => write!(f, "Invalid amount: {}", reason),
            Self::InvalidToken { reason } => write!(f, "Invalid token: {}", reason),
            Self::InvalidMintUrl { url } => write!(f, "Invalid mint URL: {}", url),
            Self::InvalidInvoice { reason } => write!(f, "Invalid Lightning invoice: {}", reason),
            Self::QuoteNotFound { quote_id } => write!(f, "Quote not found: {}", quote_id),
            Self::InsufficientFunds { mint_url, available, required } => write!(
                f,
                "Insufficient funds at {}: available={}, required={}",
                mint_url, available, required
            ),
            Self::NoFundingMint { requested, best: Some((mint, balance)) } => write!(
                f,
                "No single mint can cover {} sats; the largest balance is {} sats at {}",
                requested, balance, mint
            ),
            Self::NoFundingMint { requested, best: None } => write!(
                f,
                "No mint holds a balance to cover {} sats; deposit to a mint first",
                requested
            ),
            Self::NoEligibleUnit { mint_url, advertised } => write!(
                f,
                "Mint {} has no active sat or msat keyset (advertised units: [{}])",
                mint_url,
                advertised.join(", ")
            ),
            Self::Mint { kind, message } => write!(f, "Mint error ({}): {}", kind, message),
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Self::Sync(msg) => write!(f, "Sync error: {}", msg),
            Self::Persistence(msg) => write!(f, "Persistence error: {}", msg),
        }
    }
}

impl std::error::Error for CashuWalletError {}

impl From<CdkError> for CashuWalletError {
    fn from(err: CdkError) -> Self {
        let message = err.to_string();
        let kind = match &err {
            CdkError::TokenAlreadySpent => MintErrorKind::AlreadySpent,
            CdkError::TokenPending => MintErrorKind::QuotePending,
            CdkError::InsufficientFunds => MintErrorKind::InsufficientFunds,
            CdkError::UnsupportedUnit => MintErrorKind::UnsupportedUnit,
            CdkError::RequestAlreadyPaid => MintErrorKind::AlreadyIssued,
            CdkError::IssuedQuote => MintErrorKind::AlreadyIssued,
            CdkError::UnpaidQuote => MintErrorKind::QuoteNotPaid,
            CdkError::PendingQuote => MintErrorKind::QuotePending,
            _ => MintErrorKind::classify(None, &message),
        };
        Self::Mint { kind, message }
    }
}

impl From<reqwest::Error> for CashuWalletError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Result type alias for cashu wallet operations
pub type CashuResult<T> = Result<T, CashuWalletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_prefers_code() {
        assert_eq!(
            MintErrorKind::classify(Some(11001), "whatever"),
            MintErrorKind::AlreadySpent
        );
        assert_eq!(
            MintErrorKind::classify(Some(20005), ""),
            MintErrorKind::AlreadyIssued
        );
        assert_eq!(
            MintErrorKind::classify(Some(11007), "already issued"),
            MintErrorKind::QuoteExpired
        );
    }

    #[test]
    fn test_cdk_quote_errors_map_by_variant() {
        let issued = CashuWalletError::from(CdkError::IssuedQuote);
        assert_eq!(issued.mint_kind(), Some(MintErrorKind::AlreadyIssued));
        assert!(issued.mint_kind().unwrap().is_already_processed());

        assert_eq!(
            CashuWalletError::from(CdkError::UnpaidQuote).mint_kind(),
            Some(MintErrorKind::QuoteNotPaid)
        );
        assert_eq!(
            CashuWalletError::from(CdkError::PendingQuote).mint_kind(),
            Some(MintErrorKind::QuotePending)
        );
    }

    #[test]
    fn test_classify_message_fallback() {
        assert_eq!(
            MintErrorKind::classify(None, "Quote already issued"),
            MintErrorKind::AlreadyIssued
        );
        assert_eq!(
            MintErrorKind::classify(None, "tokens already minted"),
            MintErrorKind::AlreadyIssued
        );
        assert_eq!(
            MintErrorKind::classify(None, "Token already spent"),
            MintErrorKind::AlreadySpent
        );
        assert_eq!(
            MintErrorKind::classify(None, "Insufficient balance"),
            MintErrorKind::InsufficientFunds
        );
        assert_eq!(MintErrorKind::classify(None, "boom"), MintErrorKind::Other);
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            CashuWalletError::InvalidAmount { reason: "0".into() }.category(),
            ErrorCategory::UserInput
        );
        assert_eq!(
            CashuWalletError::mint("Token already spent").category(),
            ErrorCategory::MintProtocol
        );
        assert!(CashuWalletError::Timeout("x".into()).is_retryable());
        assert!(!CashuWalletError::mint("already spent").is_retryable());
    }

    #[test]
    fn test_no_funding_mint_is_actionable() {
        let err = CashuWalletError::NoFundingMint {
            requested: 1000,
            best: Some(("https://b.example".to_string(), 700)),
        };
        let msg = err.to_string();
        assert!(msg.contains("1000"));
        assert!(msg.contains("700"));
        assert!(msg.contains("https://b.example"));
    }

    #[test]
    fn test_no_eligible_unit_lists_units() {
        let err = CashuWalletError::NoEligibleUnit {
            mint_url: "https://m".to_string(),
            advertised: vec!["usd".to_string(), "eur".to_string()],
        };
        assert!(err.to_string().contains("usd, eur"));
    }
}
