//! Transaction history
//!
//! Append-only audit log of ledger mutations, persisted locally. Entries are
//! never edited or removed; the balance column is the ledger balance right
//! after the mutation the entry describes.

use std::sync::Arc;

use super::errors::CashuResult;
use super::types::{TransactionKind, TransactionRecord, TransactionStatus};
use crate::stores::local_store::{KeyValueStore, Repository, STORAGE_KEY_TRANSACTIONS};
use crate::utils::time::now_secs;

pub const HISTORY_VERSION: u32 = 1;

#[derive(Clone)]
pub struct TransactionHistory {
    repo: Repository<Vec<TransactionRecord>>,
}

impl TransactionHistory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            repo: Repository::new(store, STORAGE_KEY_TRANSACTIONS, HISTORY_VERSION),
        }
    }

    pub fn append(&self, record: TransactionRecord) -> CashuResult<()> {
        let mut records = self.repo.load();
        log::debug!(
            "History: {:?} {} sats ({:?}), balance now {}",
            record.kind,
            record.amount,
            record.status,
            record.balance
        );
        records.push(record);
        self.repo.save(&records)
    }

    /// Record a successful mutation stamped with the current time
    pub fn record_success(
        &self,
        kind: TransactionKind,
        amount: u64,
        balance: u64,
        message: impl Into<String>,
        quote_id: Option<String>,
    ) -> CashuResult<()> {
        self.append(TransactionRecord {
            kind,
            amount,
            timestamp: now_secs(),
            status: TransactionStatus::Success,
            message: message.into(),
            balance,
            quote_id,
        })
    }

    /// All records in insertion order
    pub fn list(&self) -> Vec<TransactionRecord> {
        self.repo.load()
    }

    /// Most recent first
    pub fn recent(&self, limit: usize) -> Vec<TransactionRecord> {
        let mut records = self.repo.load();
        records.reverse();
        records.truncate(limit);
        records
    }

    pub fn for_quote(&self, quote_id: &str) -> Vec<TransactionRecord> {
        self.repo
            .load()
            .into_iter()
            .filter(|r| r.quote_id.as_deref() == Some(quote_id))
            .collect()
    }
}
