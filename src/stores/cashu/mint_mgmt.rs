//! Mint selection
//!
//! Picks which mint pays when funding "from balance": the configured
//! preferred mint, then mints by held balance, then the fallback mint. When a
//! node tells us which mints it accepts, only those are tried, in its order.

use super::errors::{CashuResult, CashuWalletError};
use super::send::{send_token, SentToken};
use super::utils::{mint_matches, normalize_mint_url};
use crate::stores::cashu_wallet::WalletSession;
use crate::stores::settings_store::EngineSettings;

/// Ordered, deduplicated list of mints to try.
///
/// `balances` must be sorted largest first. An empty `accepted` list counts
/// as no hint.
pub fn funding_candidates(
    settings: &EngineSettings,
    balances: &[(String, u64)],
    accepted: Option<&[String]>,
) -> Vec<String> {
    let mut chain: Vec<String> = Vec::new();
    let ordered = settings
        .preferred_mint
        .iter()
        .cloned()
        .chain(balances.iter().map(|(mint, _)| mint.clone()))
        .chain(std::iter::once(settings.fallback_mint.clone()));
    for mint in ordered {
        let mint = normalize_mint_url(&mint);
        if !chain.contains(&mint) {
            chain.push(mint);
        }
    }

    match accepted.filter(|a| !a.is_empty()) {
        Some(accepted) => {
            let mut hinted: Vec<String> = Vec::new();
            for mint in accepted.iter().map(|m| normalize_mint_url(m)) {
                if chain.contains(&mint) && !hinted.contains(&mint) {
                    hinted.push(mint);
                }
            }
            hinted
        }
        None => chain,
    }
}

fn held_at(balances: &[(String, u64)], mint_url: &str) -> u64 {
    balances
        .iter()
        .find(|(mint, _)| mint_matches(mint, mint_url))
        .map(|(_, balance)| *balance)
        .unwrap_or(0)
}

/// Produce a token worth `amount_sats` from whichever candidate mint can
/// cover it alone. The first success wins.
pub async fn fund_from_balance(
    wallet: &WalletSession,
    amount_sats: u64,
    accepted: Option<&[String]>,
    memo: Option<String>,
) -> CashuResult<SentToken> {
    if amount_sats == 0 {
        return Err(CashuWalletError::InvalidAmount {
            reason: "payment amount must be positive".to_string(),
        });
    }

    let balances = wallet.balances_by_mint();
    let candidates = funding_candidates(wallet.settings(), &balances, accepted);
    log::info!(
        "Funding {} sats from balance, candidates: {:?}",
        amount_sats,
        candidates
    );

    let mut best: Option<(String, u64)> = None;
    let mut last_error = None;

    for mint in &candidates {
        let held = held_at(&balances, mint);
        if held > 0 && best.as_ref().map(|(_, b)| held > *b).unwrap_or(true) {
            best = Some((mint.clone(), held));
        }
        if held < amount_sats {
            log::debug!("Skipping {}: holds {} sats, need {}", mint, held, amount_sats);
            continue;
        }

        match send_token(wallet, mint, amount_sats, memo.clone()).await {
            Ok(sent) => return Ok(sent),
            Err(e) => {
                log::warn!("Funding from {} failed: {}", mint, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or(CashuWalletError::NoFundingMint {
        requested: amount_sats,
        best,
    }))
}
