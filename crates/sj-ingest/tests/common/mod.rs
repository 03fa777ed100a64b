//! Shared helpers for ingestion integration tests
//!
//! - [`MemoryStore`]: a [`RecordStore`] keeping everything in memory, with
//!   injectable failures
//! - [`Fixture`]: a temporary data directory with writers for primary, promo
//!   and segment exports and a table description

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use sj_common::{Result, SjError};
use sj_ingest::config::IngestConfig;
use sj_ingest::ledger::LedgerRow;
use sj_ingest::schema::ColumnCatalog;
use sj_ingest::store::{InsertBatch, RecordStore, StoreSession};
use sj_ingest::table::Value;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sj_ingest=debug")
        .with_test_writer()
        .try_init();
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
struct MemoryData {
    /// (set id, column name -> value) per inserted row
    rows: Vec<(String, HashMap<String, Value>)>,
    ledger: Vec<LedgerRow>,
    fail_inserts: HashSet<String>,
    fail_ledger: HashSet<String>,
    sessions_opened: usize,
}

/// Cloning shares the underlying data
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<MemoryData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts_for(&self, set_id: &str) {
        self.data.lock().unwrap().fail_inserts.insert(set_id.to_string());
    }

    pub fn fail_ledger_for(&self, set_id: &str) {
        self.data.lock().unwrap().fail_ledger.insert(set_id.to_string());
    }

    pub fn clear_failures(&self) {
        let mut data = self.data.lock().unwrap();
        data.fail_inserts.clear();
        data.fail_ledger.clear();
    }

    pub fn ledger(&self) -> Vec<LedgerRow> {
        self.data.lock().unwrap().ledger.clone()
    }

    pub fn ledger_sets(&self) -> Vec<String> {
        self.ledger().into_iter().map(|r| r.fileset).collect()
    }

    pub fn row_count(&self) -> usize {
        self.data.lock().unwrap().rows.len()
    }

    pub fn sessions_opened(&self) -> usize {
        self.data.lock().unwrap().sessions_opened
    }

    /// Rows inserted for one set, in insert order
    pub fn rows_for(&self, set_id: &str) -> Vec<HashMap<String, Value>> {
        self.data
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|(id, _)| id == set_id)
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Primary keys inserted for one set, in insert order
    pub fn keys_for(&self, set_id: &str) -> Vec<i64> {
        self.rows_for(set_id)
            .iter()
            .filter_map(|row| row.get("ID").and_then(Value::as_i64))
            .collect()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn committed_file_sets(&self) -> Result<Vec<LedgerRow>> {
        Ok(self.ledger())
    }

    async fn stored_primary_keys(&self) -> Result<Vec<i64>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter_map(|(_, row)| row.get("ID").and_then(Value::as_i64))
            .collect())
    }

    async fn open_session(&self) -> Result<Box<dyn StoreSession + '_>> {
        self.data.lock().unwrap().sessions_opened += 1;
        Ok(Box::new(MemorySession { store: self }))
    }
}

struct MemorySession<'a> {
    store: &'a MemoryStore,
}

#[async_trait]
impl StoreSession for MemorySession<'_> {
    async fn insert_records(&mut self, set_id: &str, batch: &InsertBatch) -> Result<u64> {
        let mut data = self.store.data.lock().unwrap();
        if data.fail_inserts.contains(set_id) {
            return Err(SjError::Database(format!("insert into sales_data failed for {}", set_id)));
        }
        for row in &batch.rows {
            let named = batch
                .columns
                .iter()
                .map(|c| c.name.clone())
                .zip(row.iter().cloned())
                .collect();
            data.rows.push((set_id.to_string(), named));
        }
        Ok(batch.len() as u64)
    }

    async fn insert_ledger_row(&mut self, row: &LedgerRow) -> Result<()> {
        let mut data = self.store.data.lock().unwrap();
        if data.fail_ledger.contains(&row.fileset) {
            let msg = format!("insert into tracking_data failed for {}", row.fileset);
            return Err(SjError::Database(msg));
        }
        data.ledger.push(row.clone());
        Ok(())
    }
}

// ============================================================================
// Fixture files
// ============================================================================

pub const TABLE_DESCRIPTION: &str = "\
field,datatype,loadtype,root,save,primary_key,not_null,default,format,ignore
ID,bigint,,sj,y,y,y,,,
SEQUENCE,integer,,sj,y,,,,,
ENTITYCURRENCYCODE,varchar(3),,sj,y,,,,,
AMOUNT,real,,sj,y,,,,,
PROMOCODE,varchar(10),,promo,y,,,,,
SEGMENTS,text,,segs,y,,,,,
CARRIER,text,,segs,y,,,,,
DISCOUNT,real,,sj,n,,,,,#
";

/// Set id of the `n`th monthly export of 2019 (1-based)
pub fn monthly_set_id(n: u32) -> String {
    format!("2019{:02}01_2019{:02}28", n, n)
}

/// One primary row: (id, sequence, currency, amount)
pub type PrimaryRow<'a> = (i64, i64, &'a str, f64);

/// One promo row: (promo id, sales journal id, sequence, code)
pub type PromoRow<'a> = (i64, i64, i64, &'a str);

/// One segment leg: (segment id, sales journal id, leg sequence, origin, destination, carrier)
pub type SegmentRow<'a> = (i64, i64, i64, &'a str, &'a str, &'a str);

pub struct Fixture {
    pub dir: TempDir,
    pub data_dir: PathBuf,
    pub table_description: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir(&data_dir).unwrap();
        let table_description = dir.path().join("sales_data_desc.csv");
        std::fs::write(&table_description, TABLE_DESCRIPTION).unwrap();
        Self {
            dir,
            data_dir,
            table_description,
        }
    }

    pub fn config(&self) -> IngestConfig {
        IngestConfig {
            data_dir: self.data_dir.clone(),
            table_description: self.table_description.clone(),
            ..Default::default()
        }
    }

    pub fn catalog(&self) -> ColumnCatalog {
        ColumnCatalog::from_path(&self.table_description).unwrap()
    }

    pub fn write_primary(&self, set_id: &str, rows: &[PrimaryRow<'_>]) {
        let mut body = String::from("ID,SEQUENCE,ENTITYCURRENCYCODE,AMOUNT\n");
        for (id, seq, currency, amount) in rows {
            writeln!(body, "{},{},{},{}", id, seq, currency, amount).unwrap();
        }
        self.write(&format!("SJ_{}.csv", set_id), &body);
    }

    pub fn write_promo(&self, set_id: &str, rows: &[PromoRow<'_>]) {
        let mut body = String::from("ID,SALESJOURNALID,SEQUENCE,PROMOCODE\n");
        for (id, fk, seq, code) in rows {
            writeln!(body, "{},{},{},{}", id, fk, seq, code).unwrap();
        }
        self.write(&format!("SJPromo_{}.csv", set_id), &body);
    }

    pub fn write_segments(&self, set_id: &str, rows: &[SegmentRow<'_>]) {
        let mut body = String::from("ID,SALESJOURNALID,SEGMENTSEQUENCE,ORIGIN,DEST,CARRIER\n");
        for (id, fk, seq, origin, dest, carrier) in rows {
            writeln!(body, "{},{},{},{},{},{}", id, fk, seq, origin, dest, carrier).unwrap();
        }
        self.write(&format!("SJSegs_{}.csv", set_id), &body);
    }

    /// A complete set whose primary rows are `keys` in USD, with empty promo and segment files
    pub fn write_set(&self, set_id: &str, keys: &[i64]) {
        let rows: Vec<PrimaryRow<'_>> = keys.iter().map(|k| (*k, 1, "USD", 10.0)).collect();
        self.write_primary(set_id, &rows);
        self.write_promo(set_id, &[]);
        self.write_segments(set_id, &[]);
    }

    pub fn write(&self, name: &str, body: &str) {
        std::fs::write(self.data_dir.join(name), body).unwrap();
    }
}
