//! Lightning integration
//!
//! Mint quotes (Lightning → ecash) and melt quotes (ecash → Lightning).
//! Every quote is persisted in the invoice list before the caller sees it,
//! and every state the mint reports is written back, so an interrupted flow
//! resumes from the list without paying twice.

use super::errors::{CashuResult, CashuWalletError};
use super::mint_client::MintSession;
use super::quotes::is_quote_expired;
use super::types::{total_amount, total_sats, InvoiceRecord, Proof, QuoteKind, QuoteState, TransactionKind};
use super::utils::{is_valid_mint_url, mint_label, normalize_mint_url};
use crate::stores::cashu_wallet::WalletSession;
use crate::utils::format::format_sats_with_separator;
use crate::utils::time::now_secs;

fn validate_mint_url(mint_url: &str) -> CashuResult<String> {
    if !is_valid_mint_url(mint_url) {
        return Err(CashuWalletError::InvalidMintUrl {
            url: mint_url.to_string(),
        });
    }
    Ok(normalize_mint_url(mint_url))
}

/// Stamp freshly issued proofs with the mint they belong to
fn annotate(proofs: Vec<Proof>, session: &MintSession) -> Vec<Proof> {
    let mint_url = normalize_mint_url(session.mint_url());
    proofs
        .into_iter()
        .map(|mut p| {
            p.mint_url = mint_url.clone();
            p.unit = session.unit;
            p
        })
        .collect()
}

fn quote_of_kind(wallet: &WalletSession, quote_id: &str, kind: QuoteKind) -> CashuResult<InvoiceRecord> {
    wallet
        .invoice_store()
        .get(quote_id)
        .filter(|r| r.kind == kind)
        .ok_or_else(|| CashuWalletError::QuoteNotFound {
            quote_id: quote_id.to_string(),
        })
}

// =============================================================================
// Mint Quote Operations (Lightning → Ecash)
// =============================================================================

/// Request a deposit invoice for `amount_sats` at `mint_url`.
///
/// The quote is stored UNPAID before it is returned.
pub async fn create_mint_quote(
    wallet: &WalletSession,
    mint_url: &str,
    amount_sats: u64,
) -> CashuResult<InvoiceRecord> {
    if amount_sats == 0 {
        return Err(CashuWalletError::InvalidAmount {
            reason: "deposit amount must be positive".to_string(),
        });
    }
    let mint_url = validate_mint_url(mint_url)?;

    log::info!("Creating mint quote for {} sats at {}", amount_sats, mint_url);

    let session = wallet.open_mint(&mint_url).await?;
    let quote = session
        .client
        .create_mint_quote(session.to_unit(amount_sats))
        .await?;

    let now = now_secs();
    let record = InvoiceRecord {
        quote_id: quote.quote_id.clone(),
        kind: QuoteKind::Mint,
        mint_url,
        payment_request: quote.request,
        amount: amount_sats,
        fee_reserve: None,
        state: QuoteState::Unpaid,
        created_at: now,
        checked_at: now,
        expires_at: quote.expiry,
        paid_at: None,
        retry_count: 0,
        next_retry_at: None,
    };
    wallet.invoice_store().upsert(record.clone())?;

    log::info!("Mint quote created: {}", quote.quote_id);
    Ok(record)
}

/// Result of advancing a mint quote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Proofs were minted and credited
    Issued { amount_sats: u64 },
    /// An earlier attempt already minted this quote
    AlreadyProcessed,
    /// Not paid yet
    Pending { state: QuoteState },
    Expired,
}

impl AdvanceOutcome {
    /// Nothing more will happen for this quote
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AdvanceOutcome::Pending { .. })
    }

    pub fn message(&self) -> String {
        match self {
            AdvanceOutcome::Issued { amount_sats } => {
                format!("Received {} sats", format_sats_with_separator(*amount_sats))
            }
            AdvanceOutcome::AlreadyProcessed => "Payment already processed".to_string(),
            AdvanceOutcome::Pending { .. } => "Waiting for payment".to_string(),
            AdvanceOutcome::Expired => "Invoice expired".to_string(),
        }
    }
}

/// Check a mint quote and mint its proofs once paid.
///
/// Safe to call repeatedly: a quote the mint reports as already issued is
/// marked ISSUED without crediting anything.
pub async fn advance_mint_quote(wallet: &WalletSession, quote_id: &str) -> CashuResult<AdvanceOutcome> {
    let record = quote_of_kind(wallet, quote_id, QuoteKind::Mint)?;
    let session = wallet.open_mint(&record.mint_url).await?;

    let status = session.client.check_mint_quote(quote_id).await?;
    let now = now_secs();
    log::info!("Quote {} status: {}", quote_id, status.state);

    if !status.state.is_settled() {
        let expiry = status.expiry.or(record.expires_at);
        if status.state == QuoteState::Unpaid && is_quote_expired(expiry, now) {
            wallet
                .invoice_store()
                .set_state(quote_id, QuoteState::Expired, now)?;
            log::info!("Mint quote {} expired unpaid", quote_id);
            return Ok(AdvanceOutcome::Expired);
        }
        wallet.invoice_store().set_state(quote_id, status.state, now)?;
        return Ok(AdvanceOutcome::Pending { state: status.state });
    }

    // persist PAID first so a failed issuance is retried, never expired
    if record.state != QuoteState::Paid {
        wallet.invoice_store().set_state(quote_id, QuoteState::Paid, now)?;
    }

    let guard = wallet.lock_mint(&record.mint_url).await;
    let minted = session
        .client
        .mint_proofs(session.to_unit(record.amount), quote_id)
        .await;

    match minted {
        Ok(proofs) => {
            let proofs = annotate(proofs, &session);
            let amount_sats = total_sats(&proofs);

            wallet.ledger().append_proofs(proofs)?;
            let balance = wallet.ledger().balance_sats();
            wallet.transaction_history().record_success(
                TransactionKind::Mint,
                amount_sats,
                balance,
                format!(
                    "Minted {} sats at {}",
                    format_sats_with_separator(amount_sats),
                    mint_label(&record.mint_url)
                ),
                Some(quote_id.to_string()),
            )?;
            wallet
                .invoice_store()
                .set_state(quote_id, QuoteState::Issued, now_secs())?;
            drop(guard);

            log::info!("Minted {} sats from quote {}", amount_sats, quote_id);
            wallet.after_ledger_mutation().await;
            Ok(AdvanceOutcome::Issued { amount_sats })
        }
        Err(e) if e.mint_kind().map(|k| k.is_already_processed()).unwrap_or(false) => {
            log::info!("Quote {} was already minted ({}), marking issued", quote_id, e);
            wallet
                .invoice_store()
                .set_state(quote_id, QuoteState::Issued, now_secs())?;
            Ok(AdvanceOutcome::AlreadyProcessed)
        }
        Err(e) => {
            log::error!("Minting quote {} failed: {}", quote_id, e);
            Err(e)
        }
    }
}

// =============================================================================
// Melt Quote Operations (Ecash → Lightning)
// =============================================================================

/// Ask `mint_url` what paying `bolt11` costs.
///
/// The stored record carries amount and fee reserve in sats; their sum is
/// what paying the quote debits.
pub async fn create_melt_quote(
    wallet: &WalletSession,
    mint_url: &str,
    bolt11: &str,
) -> CashuResult<InvoiceRecord> {
    let bolt11 = bolt11.trim();
    if bolt11.is_empty() {
        return Err(CashuWalletError::InvalidInvoice {
            reason: "invoice is empty".to_string(),
        });
    }
    if !bolt11.to_lowercase().starts_with("ln") {
        return Err(CashuWalletError::InvalidInvoice {
            reason: "expected a bolt11 invoice".to_string(),
        });
    }
    let mint_url = validate_mint_url(mint_url)?;

    let session = wallet.open_mint(&mint_url).await?;
    let quote = session.client.create_melt_quote(bolt11).await?;

    let now = now_secs();
    let record = InvoiceRecord {
        quote_id: quote.quote_id.clone(),
        kind: QuoteKind::Melt,
        mint_url,
        payment_request: bolt11.to_string(),
        amount: session.to_sats(quote.amount),
        fee_reserve: Some(session.to_sats(quote.fee_reserve)),
        state: quote.state,
        created_at: now,
        checked_at: now,
        expires_at: quote.expiry,
        paid_at: None,
        retry_count: 0,
        next_retry_at: None,
    };
    wallet.invoice_store().upsert(record.clone())?;

    log::info!(
        "Melt quote {}: {} sats + {} sats fee reserve",
        record.quote_id,
        record.amount,
        record.fee_reserve.unwrap_or(0)
    );
    Ok(record)
}

/// Result of paying a melt quote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeltOutcome {
    pub quote_id: String,
    pub paid: bool,
    pub preimage: Option<String>,
    pub amount_sats: u64,
    pub fee_paid_sats: u64,
    pub change_sats: u64,
}

/// Pay a melt quote from the quote's mint.
///
/// Fails with `InsufficientFunds` before any network call when the mint's
/// balance cannot cover amount plus fee reserve.
pub async fn pay_melt_quote(wallet: &WalletSession, quote_id: &str) -> CashuResult<MeltOutcome> {
    let record = quote_of_kind(wallet, quote_id, QuoteKind::Melt)?;
    let mint_url = record.mint_url.clone();

    let guard = wallet.lock_mint(&mint_url).await;

    // compare in the mint's unit; sats are floored and hide msat shortfalls
    let inputs = wallet.ledger().for_mint(&mint_url);
    let held = total_amount(&inputs);
    let unit = inputs.first().map(|p| p.unit).unwrap_or_default();
    let insufficient = |required: u64| CashuWalletError::InsufficientFunds {
        mint_url: mint_url.clone(),
        available: total_sats(&inputs),
        required: unit.to_sats_ceil(required),
    };
    if unit.from_sats(record.total_debit()) > held {
        return Err(insufficient(unit.from_sats(record.total_debit())));
    }

    let session = wallet.open_mint(&mint_url).await?;
    let quote = session.client.check_melt_quote(quote_id).await?;
    if quote.state == QuoteState::Paid {
        log::info!("Melt quote {} already paid", quote_id);
        wallet
            .invoice_store()
            .set_state(quote_id, QuoteState::Paid, now_secs())?;
        return Ok(MeltOutcome {
            quote_id: quote_id.to_string(),
            paid: true,
            preimage: None,
            amount_sats: record.amount,
            fee_paid_sats: 0,
            change_sats: 0,
        });
    }

    if quote.total_debit() > held {
        return Err(insufficient(quote.total_debit()));
    }

    // split off exactly amount + reserve, in the mint's unit
    let partition = session
        .send_with_fee_fallback(quote.total_debit(), inputs.clone())
        .await?;
    let send = partition.send.clone();
    let mut split = partition.keep;
    split.extend(annotate(partition.send, &session));
    wallet.ledger().replace_mint_proofs(&mint_url, &inputs, split)?;

    let melted = session.client.melt_proofs(&quote, send.clone()).await?;
    let change = annotate(melted.change, &session);
    let change_sats = total_sats(&change);
    wallet.ledger().replace_mint_proofs(&mint_url, &send, change)?;

    let state = match session.client.check_melt_quote(quote_id).await {
        Ok(q) if q.state == QuoteState::Paid || melted.paid => QuoteState::Paid,
        Ok(q) => q.state,
        Err(e) => {
            log::warn!("Melt status check for {} failed, assuming paid: {}", quote_id, e);
            QuoteState::Paid
        }
    };
    wallet.invoice_store().set_state(quote_id, state, now_secs())?;

    let fee_paid_sats = session.to_sats(melted.fee_paid);
    let balance = wallet.ledger().balance_sats();
    wallet.transaction_history().record_success(
        TransactionKind::Send,
        record.amount + fee_paid_sats,
        balance,
        format!(
            "Paid {} sats over Lightning (fee {} sats)",
            format_sats_with_separator(record.amount),
            fee_paid_sats
        ),
        Some(quote_id.to_string()),
    )?;
    drop(guard);

    wallet.after_ledger_mutation().await;

    Ok(MeltOutcome {
        quote_id: quote_id.to_string(),
        paid: state == QuoteState::Paid,
        preimage: melted.preimage,
        amount_sats: record.amount,
        fee_paid_sats,
        change_sats,
    })
}

/// Refresh a melt quote's state from its mint
pub async fn refresh_melt_quote(wallet: &WalletSession, quote_id: &str) -> CashuResult<QuoteState> {
    let record = quote_of_kind(wallet, quote_id, QuoteKind::Melt)?;
    let session = wallet.open_mint(&record.mint_url).await?;
    let quote = session.client.check_melt_quote(quote_id).await?;
    wallet
        .invoice_store()
        .set_state(quote_id, quote.state, now_secs())?;
    Ok(quote.state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::cashu::errors::MintErrorKind;
    use crate::stores::cashu::test_support::{FakeMint, FakeMintFactory};
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
    async fn test_create_mint_quote_rejects_bad_input() {
        let (mint, wallet) = setup(MintUnit::Sat);
        assert!(matches!(
            create_mint_quote(&wallet, MINT, 0).await,
            Err(CashuWalletError::InvalidAmount { .. })
        ));
        assert!(matches!(
            create_mint_quote(&wallet, "   ", 10).await,
            Err(CashuWalletError::InvalidMintUrl { .. })
        ));
        assert_eq!(mint.mint_calls(), 0);
        assert!(wallet.invoices().is_empty());
    }

    #[tokio::test]
    async fn test_deposit_then_issue() {
        let (mint, wallet) = setup(MintUnit::Sat);

        let record = create_mint_quote(&wallet, MINT, 500).await.unwrap();
        let stored = wallet.invoice_store().get(&record.quote_id).unwrap();
        assert_eq!(stored.state, QuoteState::Unpaid);

        let pending = advance_mint_quote(&wallet, &record.quote_id).await.unwrap();
        assert!(!pending.is_terminal());
        assert_eq!(wallet.balance_sats(), 0);

        mint.pay_quote(&record.quote_id);
        let outcome = advance_mint_quote(&wallet, &record.quote_id).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Issued { amount_sats: 500 });
        assert_eq!(wallet.balance_sats(), 500);

        let history = wallet.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TransactionKind::Mint);
        assert_eq!(history[0].balance, 500);
        assert_eq!(
            wallet.invoice_store().get(&record.quote_id).unwrap().state,
            QuoteState::Issued
        );
    }

    #[tokio::test]
    async fn test_advance_is_idempotent() {
        let (mint, wallet) = setup(MintUnit::Sat);
        let record = create_mint_quote(&wallet, MINT, 500).await.unwrap();
        mint.pay_quote(&record.quote_id);
        advance_mint_quote(&wallet, &record.quote_id).await.unwrap();

        // the mint now answers the mint attempt with "already issued"
        let again = advance_mint_quote(&wallet, &record.quote_id).await.unwrap();
        assert_eq!(again, AdvanceOutcome::AlreadyProcessed);
        assert_eq!(wallet.balance_sats(), 500);
        assert_eq!(wallet.history().len(), 1);
        assert_eq!(
            wallet.invoice_store().get(&record.quote_id).unwrap().state,
            QuoteState::Issued
        );
        assert_eq!(mint.mint_calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_issuance_keeps_quote_paid() {
        let (mint, wallet) = setup(MintUnit::Sat);
        let record = create_mint_quote(&wallet, MINT, 64).await.unwrap();
        mint.pay_quote(&record.quote_id);
        mint.fail_next_mint(CashuWalletError::Mint {
            kind: MintErrorKind::Other,
            message: "keyset rotated".to_string(),
        });

        assert!(advance_mint_quote(&wallet, &record.quote_id).await.is_err());
        assert_eq!(wallet.balance_sats(), 0);
        // the mint took the payment, so the quote stays claimable
        assert_eq!(
            wallet.invoice_store().get(&record.quote_id).unwrap().state,
            QuoteState::Paid
        );
        assert_eq!(wallet.pending_invoices().len(), 1);

        let outcome = advance_mint_quote(&wallet, &record.quote_id).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Issued { amount_sats: 64 });
    }

    #[tokio::test]
    async fn test_msat_mint_amounts() {
        let (mint, wallet) = setup(MintUnit::Msat);
        let record = create_mint_quote(&wallet, MINT, 21).await.unwrap();
        assert_eq!(record.amount, 21);
        assert!(record.payment_request.contains("21000"));

        mint.pay_quote(&record.quote_id);
        advance_mint_quote(&wallet, &record.quote_id).await.unwrap();
        assert_eq!(wallet.balance_sats(), 21);
        assert!(wallet.ledger().read().iter().all(|p| p.unit == MintUnit::Msat));
    }

    #[tokio::test]
    async fn test_melt_guard_before_network() {
        let (mint, wallet) = setup(MintUnit::Sat);
        wallet.ledger().append_proofs(mint.issue(&[64, 32, 4])).unwrap();

        mint.set_melt_pricing(100, 2);
        let quote = create_melt_quote(&wallet, MINT, "lnbc1000n1melt").await.unwrap();
        assert_eq!(quote.total_debit(), 102);

        match pay_melt_quote(&wallet, &quote.quote_id).await {
            Err(CashuWalletError::InsufficientFunds { available, required, .. }) => {
                assert_eq!(available, 100);
                assert_eq!(required, 102);
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        assert!(mint.send_calls().is_empty());
        assert_eq!(mint.melt_calls(), 0);
        assert_eq!(wallet.balance_sats(), 100);
    }

    #[tokio::test]
    async fn test_melt_guard_counts_msat_remainder() {
        let (mint, wallet) = setup(MintUnit::Msat);
        wallet.ledger().append_proofs(mint.issue(&[101_000])).unwrap();

        // 101.5 sats required, 101 held; floored sats would call it even
        mint.set_melt_pricing(100_500, 1_000);
        let quote = create_melt_quote(&wallet, MINT, "lnbc1015n1melt").await.unwrap();
        assert_eq!(quote.total_debit(), 101);

        match pay_melt_quote(&wallet, &quote.quote_id).await {
            Err(CashuWalletError::InsufficientFunds { available, required, .. }) => {
                assert_eq!(available, 101);
                assert_eq!(required, 102);
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        assert!(mint.send_calls().is_empty());
        assert_eq!(mint.melt_calls(), 0);
        assert_eq!(wallet.balance_sats(), 101);
    }

    #[tokio::test]
    async fn test_melt_at_exact_boundary() {
        let (mint, wallet) = setup(MintUnit::Sat);
        wallet.ledger().append_proofs(mint.issue(&[64, 32, 4, 2])).unwrap();

        let quote = create_melt_quote(&wallet, MINT, "lnbc1000n1melt").await.unwrap();
        let outcome = pay_melt_quote(&wallet, &quote.quote_id).await.unwrap();

        assert!(outcome.paid);
        assert_eq!(outcome.fee_paid_sats, 1);
        // 102 debited, 1 sat of unused reserve returned as change
        assert_eq!(outcome.change_sats, 1);
        assert_eq!(wallet.balance_sats(), 1);
        assert_eq!(
            wallet.invoice_store().get(&quote.quote_id).unwrap().state,
            QuoteState::Paid
        );
        assert_eq!(wallet.history()[0].kind, TransactionKind::Send);
        assert_eq!(wallet.history()[0].balance, 1);
    }

    #[tokio::test]
    async fn test_melt_check_failure_marks_paid() {
        let (mint, wallet) = setup(MintUnit::Sat);
        wallet.ledger().append_proofs(mint.issue(&[128])).unwrap();

        let quote = create_melt_quote(&wallet, MINT, "lnbc1000n1melt").await.unwrap();
        // the pre-payment check passes, the post-melt check times out
        mint.fail_melt_checks_after(1);
        let outcome = pay_melt_quote(&wallet, &quote.quote_id).await.unwrap();

        assert!(outcome.paid);
        assert_eq!(
            wallet.invoice_store().get(&quote.quote_id).unwrap().state,
            QuoteState::Paid
        );
        assert_eq!(wallet.balance_sats(), 128 - 100 - 1);
    }

    #[tokio::test]
    async fn test_melt_rejects_non_invoice() {
        let (_, wallet) = setup(MintUnit::Sat);
        assert!(matches!(
            create_melt_quote(&wallet, MINT, "cashuBxyz").await,
            Err(CashuWalletError::InvalidInvoice { .. })
        ));
    }
}
