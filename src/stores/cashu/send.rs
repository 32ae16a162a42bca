//! Send ecash as a token
//!
//! Splits exactly the requested amount off one mint's proofs and encodes it
//! as a token string. The spent inputs are replaced by the change in a single
//! ledger write.

use super::errors::{CashuResult, CashuWalletError};
use super::token::encode_token;
use super::types::{total_sats, TransactionKind};
use super::utils::{is_valid_mint_url, mint_label, normalize_mint_url};
use crate::stores::cashu_wallet::WalletSession;
use crate::utils::format::format_sats_with_separator;

/// A token ready to hand over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentToken {
    pub token: String,
    pub mint_url: String,
    pub amount_sats: u64,
}

/// Send `amount_sats` from `mint_url` as a token
pub async fn send_token(
    wallet: &WalletSession,
    mint_url: &str,
    amount_sats: u64,
    memo: Option<String>,
) -> CashuResult<SentToken> {
    if amount_sats == 0 {
        return Err(CashuWalletError::InvalidAmount {
            reason: "send amount must be positive".to_string(),
        });
    }
    if !is_valid_mint_url(mint_url) {
        return Err(CashuWalletError::InvalidMintUrl {
            url: mint_url.to_string(),
        });
    }
    let mint_url = normalize_mint_url(mint_url);

    let guard = wallet.lock_mint(&mint_url).await;

    let available = wallet.ledger().balance_for_mint(&mint_url);
    if amount_sats > available {
        return Err(CashuWalletError::InsufficientFunds {
            mint_url,
            available,
            required: amount_sats,
        });
    }

    log::info!("Sending {} sats from {}", amount_sats, mint_url);

    let session = wallet.open_mint(&mint_url).await?;
    let inputs = wallet.ledger().for_mint(&mint_url);
    let partition = session
        .send_with_fee_fallback(session.to_unit(amount_sats), inputs.clone())
        .await?;

    let token = match encode_token(&mint_url, session.unit, &partition.send, memo) {
        Ok(token) => token,
        Err(e) => {
            // inputs are gone at the mint; keep both halves so nothing is lost
            log::error!("Encoding sent proofs failed, keeping them in the ledger: {}", e);
            let mut kept = partition.keep;
            kept.extend(partition.send);
            wallet.ledger().replace_mint_proofs(&mint_url, &inputs, kept)?;
            return Err(e);
        }
    };

    let sent_sats = total_sats(&partition.send);
    wallet
        .ledger()
        .replace_mint_proofs(&mint_url, &inputs, partition.keep)?;

    let balance = wallet.ledger().balance_sats();
    wallet.transaction_history().record_success(
        TransactionKind::Send,
        sent_sats,
        balance,
        format!("Sent {} sats from {}", format_sats_with_separator(sent_sats), mint_label(&mint_url)),
        None,
    )?;
    drop(guard);

    log::info!("Sent {} sats as token, balance now {} sats", sent_sats, balance);
    wallet.after_ledger_mutation().await;

    Ok(SentToken {
        token,
        mint_url,
        amount_sats: sent_sats,
    })
}
