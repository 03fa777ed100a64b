//! Load ledger: which sets and which primary keys are already committed

use serde::{Deserialize, Serialize};
use sj_common::types::KeyDomain;
use sj_common::Result;
use std::collections::HashSet;
use tracing::info;

/// One row of the tracking table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub fileset: String,
    pub sj_pk_min: i64,
    pub sj_pk_max: i64,
}

impl LedgerRow {
    pub fn new(fileset: impl Into<String>, sj_pk_min: i64, sj_pk_max: i64) -> Self {
        Self {
            fileset: fileset.into(),
            sj_pk_min,
            sj_pk_max,
        }
    }
}

/// Fixed-size bit array
#[derive(Debug, Clone)]
pub struct KeyBitset {
    words: Vec<u64>,
    len: usize,
}

impl KeyBitset {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bits past the end read as unset
    pub fn get(&self, idx: usize) -> bool {
        idx < self.len && self.words[idx / 64] & (1 << (idx % 64)) != 0
    }

    /// Set a bit, returning whether it was previously unset
    pub fn set(&mut self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        let word = &mut self.words[idx / 64];
        let mask = 1 << (idx % 64);
        let fresh = *word & mask == 0;
        *word |= mask;
        fresh
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// In-memory view of everything committed so far.
///
/// Rebuilt from storage at the start of every pass and updated as the loader
/// accepts keys, so duplicates across sets of the same pass are caught too.
#[derive(Debug, Clone)]
pub struct LoadLedger {
    domain: KeyDomain,
    committed_sets: HashSet<String>,
    seen: KeyBitset,
}

impl LoadLedger {
    /// Empty ledger sized for `domain`
    pub fn new(domain: KeyDomain) -> Result<Self> {
        domain.validate()?;
        Ok(Self {
            domain,
            committed_sets: HashSet::new(),
            seen: KeyBitset::new(domain.width()?),
        })
    }

    /// Build from tracking rows and stored primary keys.
    ///
    /// A stored key outside the domain means the configured range is wrong
    /// and fails with `KeyOutOfRange`.
    pub fn build(
        domain: KeyDomain,
        rows: &[LedgerRow],
        keys: impl IntoIterator<Item = i64>,
    ) -> Result<Self> {
        let mut ledger = Self::new(domain)?;
        ledger
            .committed_sets
            .extend(rows.iter().map(|r| r.fileset.clone()));
        for key in keys {
            ledger.mark_key_seen(key)?;
        }

        info!(
            committed_sets = ledger.committed_sets.len(),
            seen_keys = ledger.seen_count(),
            min_key = domain.min_sj_pk_value,
            max_key = domain.max_sj_pk_value,
            "Built load ledger"
        );
        Ok(ledger)
    }

    pub fn domain(&self) -> KeyDomain {
        self.domain
    }

    pub fn is_set_committed(&self, set_id: &str) -> bool {
        self.committed_sets.contains(set_id)
    }

    pub fn is_key_seen(&self, key: i64) -> Result<bool> {
        Ok(self.seen.get(self.domain.offset(key)?))
    }

    /// Idempotent
    pub fn mark_key_seen(&mut self, key: i64) -> Result<()> {
        let offset = self.domain.offset(key)?;
        self.seen.set(offset);
        Ok(())
    }

    pub fn committed_set_count(&self) -> usize {
        self.committed_sets.len()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.count_ones()
    }
}
