//! Receive (import) tokens
//!
//! Swaps a token's proofs at its mint for fresh ones and appends them to the
//! ledger under that mint's lock.

use super::errors::{CashuResult, CashuWalletError};
use super::token::decode_token;
use super::types::{total_sats, TransactionKind};
use super::utils::{mint_label, normalize_mint_url};
use crate::stores::cashu_wallet::WalletSession;
use crate::utils::format::format_sats_with_separator;

/// What an import added to the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedToken {
    pub mint_url: String,
    pub amount_sats: u64,
    pub memo: Option<String>,
}

/// Receive a token string into the ledger
pub async fn receive_token(wallet: &WalletSession, token: &str) -> CashuResult<ReceivedToken> {
    // copy/paste often breaks tokens across lines
    let token: String = token.chars().filter(|c| !c.is_whitespace()).collect();
    let decoded = decode_token(&token)?;
    let mint_url = normalize_mint_url(&decoded.mint_url);

    log::info!(
        "Receiving {:?} token: {} {} in {} proofs from {}",
        decoded.format,
        decoded.amount(),
        decoded.unit,
        decoded.proofs.len(),
        mint_url
    );

    let session = wallet.open_mint(&mint_url).await?;
    if session.unit != decoded.unit {
        return Err(CashuWalletError::InvalidToken {
            reason: format!(
                "token is in {} but {} is used in {}",
                decoded.unit,
                mint_label(&mint_url),
                session.unit
            ),
        });
    }

    let guard = wallet.lock_mint(&mint_url).await;
    let proofs = session
        .client
        .receive(&token)
        .await?
        .into_iter()
        .map(|mut p| {
            p.mint_url = mint_url.clone();
            p.unit = session.unit;
            p
        })
        .collect::<Vec<_>>();
    let amount_sats = total_sats(&proofs);

    wallet.ledger().append_proofs(proofs)?;
    let balance = wallet.ledger().balance_sats();
    wallet.transaction_history().record_success(
        TransactionKind::Import,
        amount_sats,
        balance,
        format!("Received {} sats from {}", format_sats_with_separator(amount_sats), mint_label(&mint_url)),
        None,
    )?;
    drop(guard);

    log::info!("Received {} sats, balance now {} sats", amount_sats, balance);
    wallet.after_ledger_mutation().await;

    Ok(ReceivedToken {
        mint_url,
        amount_sats,
        memo: decoded.memo,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::cashu::errors::MintErrorKind;
    use crate::stores::cashu::test_support::{FakeMint, FakeMintFactory};
    use crate::stores::cashu::token::encode_token;
    use crate::stores::cashu::types::MintUnit;
    use crate::stores::cashu_wallet::test_session::session;

    const MINT: &str = "https://mint.example";

    fn setup(unit: MintUnit) -> (FakeMint, WalletSession) {
        let factory = FakeMintFactory::new();
        let mint = FakeMint::new(MINT, unit);
        factory.add_mint(mint.clone());
        (mint, session(&factory))
    }

    #[tokio::test]
    async fn test_import_into_empty_ledger() {
        let (mint, wallet) = setup(MintUnit::Sat);
        let proofs = mint.issue(&[512, 256, 128, 64, 32, 8]);
        let token = encode_token(MINT, MintUnit::Sat, &proofs, Some("thanks".into())).unwrap();

        let received = receive_token(&wallet, &token).await.unwrap();
        assert_eq!(received.amount_sats, 1000);
        assert_eq!(received.memo.as_deref(), Some("thanks"));
        assert_eq!(wallet.balance_sats(), 1000);

        let history = wallet.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TransactionKind::Import);
        assert_eq!(history[0].balance, 1000);
    }

    #[tokio::test]
    async fn test_spent_token_rejected() {
        let (mint, wallet) = setup(MintUnit::Sat);
        let token = encode_token(MINT, MintUnit::Sat, &mint.issue(&[16]), None).unwrap();
        receive_token(&wallet, &token).await.unwrap();

        let err = receive_token(&wallet, &token).await.unwrap_err();
        assert_eq!(err.mint_kind(), Some(MintErrorKind::AlreadySpent));
        assert_eq!(wallet.balance_sats(), 16);
        assert_eq!(wallet.history().len(), 1);
    }

    #[tokio::test]
    async fn test_token_with_line_breaks() {
        let (mint, wallet) = setup(MintUnit::Sat);
        let token = encode_token(MINT, MintUnit::Sat, &mint.issue(&[4]), None).unwrap();
        let (head, tail) = token.split_at(20);
        let wrapped = format!("{}\n  {}\n", head, tail);

        assert_eq!(receive_token(&wallet, &wrapped).await.unwrap().amount_sats, 4);
    }

    #[tokio::test]
    async fn test_unit_mismatch_rejected() {
        let (mint, wallet) = setup(MintUnit::Msat);
        let token = encode_token(MINT, MintUnit::Sat, &mint.issue(&[8]), None).unwrap();
        assert!(matches!(
            receive_token(&wallet, &token).await,
            Err(CashuWalletError::InvalidToken { .. })
        ));
        assert_eq!(wallet.balance_sats(), 0);
    }
}
