//! Primary record loading and deduplication

use serde::Serialize;
use sj_common::types::FileRole;
use sj_common::{Result, SjError};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::grouping::FileSet;
use crate::ledger::LoadLedger;
use crate::schema::ColumnType;
use crate::table::{RecordTable, Value};

/// Row counts of one loaded set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub read: usize,
    pub currency_dropped: usize,
    pub duplicates_dropped: usize,
    pub loaded: usize,
}

/// Primary records of one set, sorted on the primary key
#[derive(Debug, Clone)]
pub struct RecordSet {
    pub file_set: FileSet,
    pub table: RecordTable,
    /// 0 when the set has no rows
    pub min_key: i64,
    pub max_key: i64,
    pub stats: LoadStats,
}

impl RecordSet {
    pub fn set_id(&self) -> &str {
        &self.file_set.set_id
    }
}

#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(RecordSet),
    /// The set could not be read and stays uncommitted
    Skipped { set_id: String, reason: String },
}

/// Reads the primary member of a set and drops rows already committed
#[derive(Debug, Clone)]
pub struct PrimaryRecordLoader {
    read_types: HashMap<String, ColumnType>,
    key_column: String,
    currency_column: String,
    currency: String,
}

impl PrimaryRecordLoader {
    pub fn new(
        read_types: HashMap<String, ColumnType>,
        key_column: impl Into<String>,
        currency_column: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            read_types,
            key_column: key_column.into(),
            currency_column: currency_column.into(),
            currency: currency.into(),
        }
    }

    /// Load one set.
    ///
    /// Accepted keys are marked in `ledger` immediately, so later rows or
    /// later sets of the same pass carrying the same key are dropped. A key
    /// outside the ledger's domain is an error; any other problem with the
    /// file skips the set without touching the ledger.
    pub fn load(&self, file_set: &FileSet, ledger: &mut LoadLedger) -> Result<LoadOutcome> {
        let set_id = file_set.set_id.clone();
        let skip = |reason: String| {
            warn!(set_id = %set_id, %reason, "Skipping file set");
            Ok(LoadOutcome::Skipped {
                set_id: set_id.clone(),
                reason,
            })
        };

        let Some(member) = file_set.member(FileRole::Primary) else {
            return skip("no primary file".to_string());
        };

        let mut table = match RecordTable::from_csv(&member.path, &self.read_types) {
            Ok(table) => table,
            Err(e) => return skip(format!("unreadable primary file: {}", e)),
        };
        let (key_idx, currency_idx) = match (
            table.require_column(&self.key_column),
            table.require_column(&self.currency_column),
        ) {
            (Ok(k), Ok(c)) => (k, c),
            (Err(e), _) | (_, Err(e)) => return skip(format!("{}: {}", member.name, e)),
        };

        let mut stats = LoadStats {
            read: table.len(),
            ..Default::default()
        };

        stats.currency_dropped = table.retain_rows(|row| {
            row[currency_idx].to_string().trim() == self.currency
        });
        if stats.currency_dropped > 0 {
            info!(
                set_id = %set_id,
                dropped = stats.currency_dropped,
                currency = %self.currency,
                "Dropped rows in other currencies"
            );
        }

        table.sort_by_columns(&[key_idx]);

        // every key is validated before any is marked
        let mut keys = Vec::with_capacity(table.len());
        for value in table.column_values(key_idx) {
            let Some(key) = value.as_i64() else {
                return skip(format!("{}: unparsable primary key '{}'", member.name, value));
            };
            if !ledger.domain().contains(key) {
                let domain = ledger.domain();
                return Err(SjError::KeyOutOfRange {
                    key,
                    min: domain.min_sj_pk_value,
                    max: domain.max_sj_pk_value,
                });
            }
            keys.push(key);
        }

        let mut keep = Vec::with_capacity(keys.len());
        for key in &keys {
            if ledger.is_key_seen(*key)? {
                keep.push(false);
            } else {
                ledger.mark_key_seen(*key)?;
                keep.push(true);
            }
        }
        let mut flags = keep.iter();
        stats.duplicates_dropped = table.retain_rows(|_| *flags.next().unwrap_or(&false));

        let kept: Vec<i64> = keys
            .iter()
            .zip(keep.iter())
            .filter(|(_, k)| **k)
            .map(|(key, _)| *key)
            .collect();
        for (row, key) in kept.iter().enumerate() {
            table.set_value(row, key_idx, Value::Int(*key));
        }
        stats.loaded = table.len();

        let (min_key, max_key) = match (kept.first(), kept.last()) {
            (Some(min), Some(max)) => (*min, *max),
            _ => (0, 0),
        };

        info!(
            set_id = %set_id,
            read = stats.read,
            duplicates = stats.duplicates_dropped,
            loaded = stats.loaded,
            min_key,
            max_key,
            "Loaded primary records"
        );

        Ok(LoadOutcome::Loaded(RecordSet {
            file_set: file_set.clone(),
            table,
            min_key,
            max_key,
            stats,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::listing::FileDescriptor;
    use sj_common::types::KeyDomain;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn file_set(dir: &TempDir, set_id: &str, body: &str) -> FileSet {
        let path = dir.path().join(format!("SJ_{}.csv", set_id));
        std::fs::write(&path, body).unwrap();
        FileSet {
            set_id: set_id.to_string(),
            members: vec![FileDescriptor::new(path, None)],
            roles: BTreeMap::from([(FileRole::Primary, 0)]),
        }
    }

    fn loader() -> PrimaryRecordLoader {
        let types = HashMap::from([("ID".to_string(), ColumnType::Int64)]);
        PrimaryRecordLoader::new(types, "ID", "ENTITYCURRENCYCODE", "USD")
    }

    fn ledger(keys: Vec<i64>) -> LoadLedger {
        LoadLedger::build(KeyDomain::new(0, 1000).unwrap(), &[], keys).unwrap()
    }

    fn loaded(outcome: LoadOutcome) -> RecordSet {
        match outcome {
            LoadOutcome::Loaded(set) => set,
            LoadOutcome::Skipped { reason, .. } => panic!("set skipped: {}", reason),
        }
    }

    #[test]
    fn test_sorts_filters_and_dedups() {
        let dir = TempDir::new().unwrap();
        let set = file_set(
            &dir,
            "a",
            "ID,ENTITYCURRENCYCODE,AMOUNT\n30,USD,1\n10,USD,2\n20,EUR,3\n10,USD,4\n5,USD,5\n",
        );
        let mut ledger = ledger(vec![5]);

        let set = loaded(loader().load(&set, &mut ledger).unwrap());
        let ids: Vec<i64> = set.table.column_values(0).map(|v| v.as_i64().unwrap()).collect();
        assert_eq!(ids, vec![10, 30]);
        // the first of the duplicate rows wins
        assert_eq!(set.table.value(0, 2), &Value::Text("2".into()));
        assert_eq!((set.min_key, set.max_key), (10, 30));
        assert_eq!(
            set.stats,
            LoadStats { read: 5, currency_dropped: 1, duplicates_dropped: 2, loaded: 2 }
        );
        assert!(ledger.is_key_seen(30).unwrap());
    }

    #[test]
    fn test_keys_marked_across_sets() {
        let dir = TempDir::new().unwrap();
        let first = file_set(&dir, "a", "ID,ENTITYCURRENCYCODE\n1,USD\n2,USD\n");
        let second = file_set(&dir, "b", "ID,ENTITYCURRENCYCODE\n2,USD\n3,USD\n");
        let mut ledger = ledger(Vec::new());

        loaded(loader().load(&first, &mut ledger).unwrap());
        let second = loaded(loader().load(&second, &mut ledger).unwrap());
        assert_eq!(second.stats.loaded, 1);
        assert_eq!((second.min_key, second.max_key), (3, 3));
    }

    #[test]
    fn test_all_duplicates_gives_empty_set() {
        let dir = TempDir::new().unwrap();
        let set = file_set(&dir, "a", "ID,ENTITYCURRENCYCODE\n1,USD\n");
        let mut ledger = ledger(vec![1]);

        let set = loaded(loader().load(&set, &mut ledger).unwrap());
        assert!(set.table.is_empty());
        assert_eq!((set.min_key, set.max_key), (0, 0));
    }

    #[test]
    fn test_missing_column_skips_set() {
        let dir = TempDir::new().unwrap();
        let set = file_set(&dir, "a", "ID,AMOUNT\n1,2\n");
        let mut ledger = ledger(Vec::new());

        let outcome = loader().load(&set, &mut ledger).unwrap();
        assert!(matches!(outcome, LoadOutcome::Skipped { .. }));
        assert_eq!(ledger.seen_count(), 0);
    }

    #[test]
    fn test_unparsable_key_skips_without_marking() {
        let dir = TempDir::new().unwrap();
        let types = HashMap::new();
        let loader = PrimaryRecordLoader::new(types, "ID", "ENTITYCURRENCYCODE", "USD");
        let set = file_set(&dir, "a", "ID,ENTITYCURRENCYCODE\n1,USD\nx7,USD\n");
        let mut ledger = ledger(Vec::new());

        let outcome = loader.load(&set, &mut ledger).unwrap();
        assert!(matches!(outcome, LoadOutcome::Skipped { .. }));
        assert!(!ledger.is_key_seen(1).unwrap());
    }

    #[test]
    fn test_key_outside_domain_is_fatal() {
        let dir = TempDir::new().unwrap();
        let set = file_set(&dir, "a", "ID,ENTITYCURRENCYCODE\n1,USD\n5000,USD\n");
        let mut ledger = ledger(Vec::new());

        let err = loader().load(&set, &mut ledger).unwrap_err();
        assert!(matches!(err, SjError::KeyOutOfRange { key: 5000, .. }));
        assert_eq!(ledger.seen_count(), 0);
    }
}
