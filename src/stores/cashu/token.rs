//! Token Utilities
//!
//! Encoding and decoding of Cashu token strings (V3 `cashuA` and V4 `cashuB`)
//! between the ledger's [`Proof`] records and CDK's token types.

use std::str::FromStr;

use cdk::mint_url::MintUrl;
use cdk::nuts::{CurrencyUnit, Token};

use super::errors::{CashuResult, CashuWalletError};
use super::types::{MintUnit, Proof};
use super::utils::normalize_mint_url;

// =============================================================================
// Token Format Detection
// =============================================================================

/// Token format version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFormat {
    /// V3 format (cashuA prefix, base64 JSON)
    V3,
    /// V4 format (cashuB prefix, compact CBOR)
    V4,
    Unknown,
}

impl TokenFormat {
    pub fn detect(token_str: &str) -> Self {
        let trimmed = token_str.trim();
        if trimmed.starts_with("cashuA") {
            TokenFormat::V3
        } else if trimmed.starts_with("cashuB") {
            TokenFormat::V4
        } else {
            TokenFormat::Unknown
        }
    }
}

/// Check if a string looks like a Cashu token
pub fn is_token(s: &str) -> bool {
    !matches!(TokenFormat::detect(s), TokenFormat::Unknown) && s.trim().len() > 10
}

// =============================================================================
// Unit Conversion
// =============================================================================

pub fn to_cdk_unit(unit: MintUnit) -> CurrencyUnit {
    match unit {
        MintUnit::Sat => CurrencyUnit::Sat,
        MintUnit::Msat => CurrencyUnit::Msat,
    }
}

// =============================================================================
// Proof Conversion
// =============================================================================

/// Convert a ledger proof to a CDK proof
pub fn to_cdk_proof(proof: &Proof) -> CashuResult<cdk::nuts::Proof> {
    use cdk::nuts::{Id, PublicKey};
    use cdk::secret::Secret;

    let invalid = |reason: String| CashuWalletError::InvalidToken { reason };

    let keyset_id = Id::from_str(&proof.id)
        .map_err(|e| invalid(format!("Invalid keyset ID '{}': {}", proof.id, e)))?;
    let secret = Secret::from_str(&proof.secret)
        .map_err(|e| invalid(format!("Invalid secret: {}", e)))?;
    let c = PublicKey::from_hex(&proof.c).map_err(|e| invalid(format!("Invalid C point: {}", e)))?;

    Ok(cdk::nuts::Proof {
        keyset_id,
        amount: cdk::Amount::from(proof.amount),
        secret,
        c,
        witness: None,
        dleq: None,
    })
}

/// Convert a CDK proof into a ledger proof for `mint_url`
pub fn from_cdk_proof(proof: &cdk::nuts::Proof, mint_url: &str, unit: MintUnit) -> Proof {
    Proof {
        id: proof.keyset_id.to_string(),
        amount: u64::from(proof.amount),
        secret: proof.secret.to_string(),
        c: proof.c.to_hex(),
        mint_url: normalize_mint_url(mint_url),
        unit,
        event_id: None,
    }
}

// =============================================================================
// Encoding / Decoding
// =============================================================================

/// Every proof must carry an id, secret, signature and a positive amount
pub fn validate_proofs_for_encoding(proofs: &[Proof]) -> CashuResult<()> {
    if proofs.is_empty() {
        return Err(CashuWalletError::InvalidToken {
            reason: "Cannot create token with no proofs".to_string(),
        });
    }

    for (i, p) in proofs.iter().enumerate() {
        let missing = if p.id.trim().is_empty() {
            Some("id")
        } else if p.secret.trim().is_empty() {
            Some("secret")
        } else if p.c.trim().is_empty() {
            Some("C")
        } else if p.amount == 0 {
            Some("amount")
        } else {
            None
        };

        if let Some(field) = missing {
            return Err(CashuWalletError::InvalidToken {
                reason: format!("proof {} has missing or invalid {}", i, field),
            });
        }
    }

    Ok(())
}

/// Encode proofs from one mint as a V4 token string
pub fn encode_token(
    mint_url: &str,
    unit: MintUnit,
    proofs: &[Proof],
    memo: Option<String>,
) -> CashuResult<String> {
    validate_proofs_for_encoding(proofs)?;

    let mint_url = MintUrl::from_str(&normalize_mint_url(mint_url)).map_err(|e| {
        CashuWalletError::InvalidMintUrl {
            url: format!("{} ({})", mint_url, e),
        }
    })?;

    let cdk_proofs = proofs
        .iter()
        .map(to_cdk_proof)
        .collect::<CashuResult<Vec<_>>>()?;

    let token = Token::new(mint_url, cdk_proofs.into(), memo, to_cdk_unit(unit));
    Ok(token.to_string())
}

/// A parsed token
#[derive(Debug, Clone)]
pub struct DecodedToken {
    pub format: TokenFormat,
    pub mint_url: String,
    pub unit: MintUnit,
    pub proofs: Vec<Proof>,
    pub memo: Option<String>,
}

impl DecodedToken {
    pub fn amount(&self) -> u64 {
        self.proofs.iter().map(|p| p.amount).sum()
    }

    pub fn sats(&self) -> u64 {
        self.unit.to_sats(self.amount())
    }
}

/// Parse a token string into its mint, unit and proofs
pub fn decode_token(token_str: &str) -> CashuResult<DecodedToken> {
    let trimmed = token_str.trim();
    if trimmed.is_empty() {
        return Err(CashuWalletError::InvalidToken {
            reason: "Token string is empty".to_string(),
        });
    }

    let format = TokenFormat::detect(trimmed);
    if matches!(format, TokenFormat::Unknown) {
        return Err(CashuWalletError::InvalidToken {
            reason: "must start with 'cashuA' or 'cashuB'".to_string(),
        });
    }

    let token = Token::from_str(trimmed).map_err(|e| CashuWalletError::InvalidToken {
        reason: e.to_string(),
    })?;

    let mint_url = token
        .mint_url()
        .map_err(|e| CashuWalletError::InvalidToken {
            reason: format!("no mint URL: {}", e),
        })?
        .to_string();

    let unit = match token.unit() {
        Some(u) => MintUnit::parse(&u.to_string()).ok_or_else(|| CashuWalletError::InvalidToken {
            reason: format!("unsupported unit '{}'", u),
        })?,
        None => MintUnit::Sat,
    };

    let proofs = token
        .proofs(&[])
        .map_err(|e| CashuWalletError::InvalidToken {
            reason: format!("unreadable proofs: {}", e),
        })?
        .iter()
        .map(|p| from_cdk_proof(p, &mint_url, unit))
        .collect::<Vec<_>>();

    if proofs.is_empty() {
        return Err(CashuWalletError::InvalidToken {
            reason: "token carries no proofs".to_string(),
        });
    }

    Ok(DecodedToken {
        format,
        mint_url: normalize_mint_url(&mint_url),
        unit,
        proofs,
        memo: token.memo().clone(),
    })
}

/// Validate a token string can be parsed
pub fn validate_token(token_str: &str) -> CashuResult<()> {
    decode_token(token_str).map(|_| ())
}

/// Summary of a token for display before it is received
#[derive(Debug, Clone, PartialEq)]
pub struct TokenInfo {
    pub format: TokenFormat,
    pub mint_url: String,
    pub unit: MintUnit,
    /// Amount in the token's unit
    pub amount: u64,
    pub sats: u64,
    pub proof_count: usize,
    pub memo: Option<String>,
}

pub fn get_token_info(token_str: &str) -> CashuResult<TokenInfo> {
    let decoded = decode_token(token_str)?;
    Ok(TokenInfo {
        format: decoded.format,
        amount: decoded.amount(),
        sats: decoded.sats(),
        proof_count: decoded.proofs.len(),
        mint_url: decoded.mint_url,
        unit: decoded.unit,
        memo: decoded.memo,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::cashu::test_support::{proof_at, GENERATOR_HEX};

    #[test]
    fn test_format_detection() {
        assert_eq!(TokenFormat::detect("cashuAabc123"), TokenFormat::V3);
        assert_eq!(TokenFormat::detect("cashuBxyz789"), TokenFormat::V4);
        assert_eq!(TokenFormat::detect("invalid"), TokenFormat::Unknown);
        assert_eq!(TokenFormat::detect("  cashuA123  "), TokenFormat::V3);
    }

    #[test]
    fn test_is_token() {
        assert!(is_token("cashuAabcdefghijk"));
        assert!(is_token("cashuBabcdefghijk"));
        assert!(!is_token("cashuA")); // Too short
        assert!(!is_token("invalid"));
    }

    #[test]
    fn test_encoding_rejects_incomplete_proofs() {
        let good = proof_at("https://a.example", "aa01", 8);

        let mut no_secret = good.clone();
        no_secret.secret.clear();
        let mut no_c = good.clone();
        no_c.c = " ".to_string();
        let mut zero = good.clone();
        zero.amount = 0;
        let mut no_id = good.clone();
        no_id.id.clear();

        for bad in [no_secret, no_c, zero, no_id] {
            let err = encode_token("https://a.example", MintUnit::Sat, &[good.clone(), bad], None);
            assert!(matches!(err, Err(CashuWalletError::InvalidToken { .. })));
        }
        assert!(encode_token("https://a.example", MintUnit::Sat, &[], None).is_err());
    }

    #[test]
    fn test_encode_decode_preserves_amount() {
        let proofs = vec![
            proof_at("https://a.example", "aa01", 512),
            proof_at("https://a.example", "aa02", 256),
            proof_at("https://a.example", "aa03", 232),
        ];
        let token = encode_token("https://a.example", MintUnit::Sat, &proofs, Some("hi".into()))
            .unwrap();
        assert_eq!(TokenFormat::detect(&token), TokenFormat::V4);

        let decoded = decode_token(&token).unwrap();
        assert_eq!(decoded.amount(), 1000);
        assert_eq!(decoded.mint_url, "https://a.example");
        assert_eq!(decoded.memo.as_deref(), Some("hi"));
        assert!(decoded.proofs.iter().all(|p| p.c == GENERATOR_HEX));
    }

    #[test]
    fn test_token_info() {
        let proofs = vec![
            proof_at("https://a.example", "bb01", 16),
            proof_at("https://a.example", "bb02", 4),
        ];
        let token = encode_token("https://a.example/", MintUnit::Sat, &proofs, None).unwrap();
        let info = get_token_info(&token).unwrap();
        assert_eq!(info.sats, 20);
        assert_eq!(info.proof_count, 2);
        assert_eq!(info.mint_url, "https://a.example");
        assert!(info.memo.is_none());
        assert!(get_token_info("cashuAnope").is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_token("").is_err());
        assert!(decode_token("hello").is_err());
        assert!(decode_token("cashuBnotreallyatoken").is_err());
    }
}
