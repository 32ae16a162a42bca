//! Pending invoice recovery
//!
//! Resumes every quote the invoice list still has work for. Runs at session
//! start and on demand. A failure on one quote is recorded on that quote as a
//! retry with backoff; the sweep itself always completes.

use super::errors::CashuResult;
use super::lightning::{advance_mint_quote, refresh_melt_quote, AdvanceOutcome};
use super::types::{InvoiceRecord, QuoteKind, QuoteState};
use crate::stores::cashu_wallet::WalletSession;
use crate::utils::time::now_secs;

/// Counts from one recovery sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub checked: usize,
    pub issued: usize,
    pub expired: usize,
    pub failed: usize,
    /// Waiting out a retry delay
    pub deferred: usize,
}

/// Whether the sweep should expire this record without asking the mint.
///
/// A mint quote the mint already reported PAID is still claimable, and a
/// melt quote in flight may yet settle; both are checked instead.
fn should_expire(record: &InvoiceRecord, now: u64) -> bool {
    if !record.is_expired_at(now) {
        return false;
    }
    !matches!(
        (record.kind, record.state),
        (QuoteKind::Mint, QuoteState::Paid) | (QuoteKind::Melt, QuoteState::Pending)
    )
}

/// Check every invoice that is not ISSUED or settled
pub async fn check_pending_invoices(wallet: &WalletSession) -> SweepSummary {
    let pending = wallet.invoice_store().list_pending();
    let mut summary = SweepSummary::default();

    if pending.is_empty() {
        log::debug!("No pending invoices to recover");
        return summary;
    }
    log::info!("Found {} pending invoices to recover", pending.len());

    for record in pending {
        let now = now_secs();
        if record.next_retry_at.map(|at| at > now).unwrap_or(false) {
            summary.deferred += 1;
            continue;
        }
        summary.checked += 1;

        if should_expire(&record, now) {
            match wallet
                .invoice_store()
                .set_state(&record.quote_id, QuoteState::Expired, now)
            {
                Ok(_) => {
                    log::info!("Invoice {} expired", record.quote_id);
                    summary.expired += 1;
                }
                Err(e) => {
                    log::warn!("Failed to expire invoice {}: {}", record.quote_id, e);
                    summary.failed += 1;
                }
            }
            continue;
        }

        match check_one(wallet, &record).await {
            Ok(outcome) => {
                match outcome {
                    Some(AdvanceOutcome::Issued { .. }) | Some(AdvanceOutcome::AlreadyProcessed) => {
                        summary.issued += 1
                    }
                    Some(AdvanceOutcome::Expired) => summary.expired += 1,
                    _ => {}
                }
                if record.retry_count > 0 {
                    clear_retry(wallet, &record.quote_id);
                }
            }
            Err(e) => {
                summary.failed += 1;
                schedule_retry(wallet, &record, &e.to_string());
            }
        }
    }

    log::info!(
        "Invoice recovery complete: {} checked, {} issued, {} expired, {} failed, {} deferred",
        summary.checked,
        summary.issued,
        summary.expired,
        summary.failed,
        summary.deferred
    );
    summary
}

async fn check_one(wallet: &WalletSession, record: &InvoiceRecord) -> CashuResult<Option<AdvanceOutcome>> {
    match record.kind {
        QuoteKind::Mint => advance_mint_quote(wallet, &record.quote_id).await.map(Some),
        QuoteKind::Melt => {
            let state = refresh_melt_quote(wallet, &record.quote_id).await?;
            log::debug!("Melt quote {} is {}", record.quote_id, state);
            Ok(None)
        }
    }
}

fn schedule_retry(wallet: &WalletSession, record: &InvoiceRecord, reason: &str) {
    let retry_count = record.retry_count.saturating_add(1);
    let delay = wallet.settings().retry_delay_secs(retry_count);
    let next_retry_at = now_secs() + delay;

    log::warn!(
        "Invoice {} check failed (attempt {}), retrying in {}s: {}",
        record.quote_id,
        retry_count,
        delay,
        reason
    );

    let updated = wallet.invoice_store().update(&record.quote_id, |r| {
        r.retry_count = retry_count;
        r.next_retry_at = Some(next_retry_at);
    });
    if let Err(e) = updated {
        log::error!("Failed to record retry for {}: {}", record.quote_id, e);
    }
}

fn clear_retry(wallet: &WalletSession, quote_id: &str) {
    let updated = wallet.invoice_store().update(quote_id, |r| {
        r.retry_count = 0;
        r.next_retry_at = None;
    });
    if let Err(e) = updated {
        log::warn!("Failed to reset retry state for {}: {}", quote_id, e);
    }
}
