//! Quote records and expiry
//!
//! The invoice list keeps every quote ever created, keyed by quote id. It is
//! both the user's Lightning history and the resume point for the recovery
//! sweep and the poller.

use std::sync::Arc;

use super::errors::{CashuResult, CashuWalletError};
use super::types::{InvoiceRecord, QuoteState};
use crate::stores::local_store::{KeyValueStore, Repository, STORAGE_KEY_INVOICES};

pub const INVOICES_VERSION: u32 = 1;

// =============================================================================
// Quote Expiry
// =============================================================================

/// Where a quote stands relative to its expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryStatus {
    Valid,
    /// Within the warning threshold
    ExpiringSoon,
    Expired,
    NoExpiry,
}

/// Quote expiry thresholds (in seconds)
pub mod thresholds {
    /// Warning threshold - consider quote expiring soon
    pub const WARNING_SECS: u64 = 60;
    /// Critical threshold - quote about to expire
    pub const CRITICAL_SECS: u64 = 10;
    /// Default quote TTL if not specified
    pub const DEFAULT_TTL_SECS: u64 = 600;
}

pub fn is_quote_expired(expiry: Option<u64>, now: u64) -> bool {
    match expiry {
        Some(exp) => now >= exp,
        None => false,
    }
}

pub fn expiry_status(expiry: Option<u64>, now: u64) -> ExpiryStatus {
    match expiry {
        Some(exp) if now >= exp => ExpiryStatus::Expired,
        Some(exp) if exp - now <= thresholds::WARNING_SECS => ExpiryStatus::ExpiringSoon,
        Some(_) => ExpiryStatus::Valid,
        None => ExpiryStatus::NoExpiry,
    }
}

/// Seconds until expiry (None if expired or no expiry)
pub fn time_until_expiry(expiry: Option<u64>, now: u64) -> Option<u64> {
    expiry.and_then(|exp| exp.checked_sub(now).filter(|secs| *secs > 0))
}

/// Format time until expiry as human-readable string
pub fn format_expiry(expiry: Option<u64>, now: u64) -> String {
    match time_until_expiry(expiry, now) {
        Some(secs) if secs >= 60 => format!("{}m {}s", secs / 60, secs % 60),
        Some(secs) => format!("{}s", secs),
        None if expiry.is_some() => "Expired".to_string(),
        None => "No expiry".to_string(),
    }
}

// =============================================================================
// Invoice Store
// =============================================================================

#[derive(Clone)]
pub struct InvoiceStore {
    repo: Repository<Vec<InvoiceRecord>>,
}

impl InvoiceStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            repo: Repository::new(store, STORAGE_KEY_INVOICES, INVOICES_VERSION),
        }
    }

    /// Insert or replace the record with the same quote id
    pub fn upsert(&self, record: InvoiceRecord) -> CashuResult<()> {
        let mut records = self.repo.load();
        match records.iter_mut().find(|r| r.quote_id == record.quote_id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.repo.save(&records)
    }

    /// Apply `f` to the stored record and persist the result
    pub fn update<F>(&self, quote_id: &str, f: F) -> CashuResult<InvoiceRecord>
    where
        F: FnOnce(&mut InvoiceRecord),
    {
        let mut records = self.repo.load();
        let record = records
            .iter_mut()
            .find(|r| r.quote_id == quote_id)
            .ok_or_else(|| CashuWalletError::QuoteNotFound {
                quote_id: quote_id.to_string(),
            })?;
        f(record);
        let updated = record.clone();
        self.repo.save(&records)?;
        Ok(updated)
    }

    pub fn set_state(&self, quote_id: &str, state: QuoteState, now: u64) -> CashuResult<InvoiceRecord> {
        self.update(quote_id, |r| {
            r.state = state;
            r.checked_at = now;
            if state.is_settled() && r.paid_at.is_none() {
                r.paid_at = Some(now);
            }
            if state == QuoteState::Issued || state == QuoteState::Expired {
                r.next_retry_at = None;
            }
        })
    }

    pub fn get(&self, quote_id: &str) -> Option<InvoiceRecord> {
        self.repo.load().into_iter().find(|r| r.quote_id == quote_id)
    }

    /// Every record, newest first
    pub fn list(&self) -> Vec<InvoiceRecord> {
        let mut records = self.repo.load();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Records the recovery sweep still has work for
    pub fn list_pending(&self) -> Vec<InvoiceRecord> {
        self.repo
            .load()
            .into_iter()
            .filter(|r| !r.is_done() && r.state != QuoteState::Expired)
            .collect()
    }

    /// Drop EXPIRED records created before `cutoff`. Returns how many went.
    pub fn remove_expired_older_than(&self, cutoff: u64) -> CashuResult<usize> {
        let records = self.repo.load();
        let before = records.len();
        let kept: Vec<InvoiceRecord> = records
            .into_iter()
            .filter(|r| !(r.state == QuoteState::Expired && r.created_at < cutoff))
            .collect();
        let removed = before - kept.len();
        if removed > 0 {
            log::info!("Removed {} expired invoices older than {}", removed, cutoff);
            self.repo.save(&kept)?;
        }
        Ok(removed)
    }
}
