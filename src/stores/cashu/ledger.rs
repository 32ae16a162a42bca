//! Proof Ledger
//!
//! The persisted proof set and the source of truth for balance. Every
//! mutation reads the full ledger once, computes the new set, and writes it
//! back whole. Operations against one mint never touch another mint's proofs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::errors::CashuResult;
use super::types::{total_sats, Proof, ProofIdentity};
use super::utils::{mint_matches, normalize_mint_url};
use crate::stores::local_store::{KeyValueStore, Repository, STORAGE_KEY_PROOFS};

pub const LEDGER_VERSION: u32 = 1;

#[derive(Clone)]
pub struct ProofLedger {
    repo: Repository<Vec<Proof>>,
}

impl ProofLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            repo: Repository::new(store, STORAGE_KEY_PROOFS, LEDGER_VERSION),
        }
    }

    /// All proofs; an absent or corrupt ledger reads as empty
    pub fn read(&self) -> Vec<Proof> {
        self.repo.load()
    }

    /// Replace the whole ledger
    pub fn write(&self, proofs: &[Proof]) -> CashuResult<()> {
        let deduped = merge_proofs(Vec::new(), proofs.to_vec());
        self.repo.save(&deduped)
    }

    /// Merge proofs into the ledger, skipping identities already held.
    /// Returns how many were added.
    pub fn append_proofs(&self, proofs: Vec<Proof>) -> CashuResult<usize> {
        let existing = self.read();
        let before = existing.len();
        let merged = merge_proofs(existing, proofs);
        let added = merged.len() - before;
        self.repo.save(&merged)?;
        log::debug!("Ledger: appended {} proofs ({} total)", added, merged.len());
        Ok(added)
    }

    pub fn for_mint(&self, mint_url: &str) -> Vec<Proof> {
        let target = normalize_mint_url(mint_url);
        self.read()
            .into_iter()
            .filter(|p| mint_matches(&p.mint_url, &target))
            .collect()
    }

    /// Total balance in satoshis
    pub fn balance_sats(&self) -> u64 {
        total_sats(&self.read())
    }

    /// Balance held at one mint, in satoshis
    pub fn balance_for_mint(&self, mint_url: &str) -> u64 {
        total_sats(&self.for_mint(mint_url))
    }

    /// Per-mint balances in satoshis, largest first
    pub fn balances_by_mint(&self) -> Vec<(String, u64)> {
        let mut by_mint: HashMap<String, Vec<Proof>> = HashMap::new();
        for proof in self.read() {
            by_mint
                .entry(normalize_mint_url(&proof.mint_url))
                .or_default()
                .push(proof);
        }

        let mut balances: Vec<(String, u64)> = by_mint
            .into_iter()
            .map(|(mint, proofs)| (mint, total_sats(&proofs)))
            .collect();
        balances.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        balances
    }

    /// Swap `consumed` proofs of one mint for `additions`.
    ///
    /// Writes `untouched + (forMint(A) - consumed) + additions` in one replace.
    pub fn replace_mint_proofs(
        &self,
        mint_url: &str,
        consumed: &[Proof],
        additions: Vec<Proof>,
    ) -> CashuResult<()> {
        let target = normalize_mint_url(mint_url);
        let (mint_proofs, untouched): (Vec<Proof>, Vec<Proof>) = self
            .read()
            .into_iter()
            .partition(|p| mint_matches(&p.mint_url, &target));

        let remaining = subtract_proofs(mint_proofs, consumed);
        let removed_count = consumed.len();
        let added_count = additions.len();

        let mut next = untouched;
        next.extend(remaining);
        let next = merge_proofs(next, additions);
        self.repo.save(&next)?;

        log::debug!(
            "Ledger: replaced {} proofs with {} at {}",
            removed_count,
            added_count,
            target
        );
        Ok(())
    }

    /// Whether anything has ever been persisted
    pub fn has_data(&self) -> bool {
        self.repo.has_data()
    }

    pub fn clear(&self) {
        self.repo.clear();
    }
}

// =============================================================================
// Set Operations
// =============================================================================

/// Append `new` to `existing`, dropping identities already present
pub fn merge_proofs(existing: Vec<Proof>, new: Vec<Proof>) -> Vec<Proof> {
    let mut seen: HashSet<ProofIdentity> = existing.iter().map(Proof::identity).collect();
    let mut merged = existing;
    for mut proof in new {
        if seen.insert(proof.identity()) {
            proof.mint_url = normalize_mint_url(&proof.mint_url);
            merged.push(proof);
        }
    }
    merged
}

/// Remove every proof whose identity appears in `consumed`
pub fn subtract_proofs(proofs: Vec<Proof>, consumed: &[Proof]) -> Vec<Proof> {
    let consumed: HashSet<ProofIdentity> = consumed.iter().map(Proof::identity).collect();
    proofs
        .into_iter()
        .filter(|p| !consumed.contains(&p.identity()))
        .collect()
}
