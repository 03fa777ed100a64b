//! Storage interface
//!
//! The engine reaches the database only through [`RecordStore`]. Reads
//! rebuild the ledger at the start of a pass; writes go through a
//! [`StoreSession`] opened once per commit stage and released when dropped.

pub mod postgres;

use async_trait::async_trait;
use sj_common::Result;

use crate::ledger::LedgerRow;
use crate::schema::InsertColumn;
use crate::table::Value;

pub use postgres::PgRecordStore;

/// Rows to insert into the sales data table
#[derive(Debug, Clone, Default)]
pub struct InsertBatch {
    pub columns: Vec<InsertColumn>,
    /// Each row has one value per column, in column order
    pub rows: Vec<Vec<Value>>,
}

impl InsertBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every row of the tracking table
    async fn committed_file_sets(&self) -> Result<Vec<LedgerRow>>;

    /// Primary key of every row in the sales data table
    async fn stored_primary_keys(&self) -> Result<Vec<i64>>;

    /// Acquire a session for a commit stage
    async fn open_session(&self) -> Result<Box<dyn StoreSession + '_>>;
}

/// A connection held for the duration of one commit stage
#[async_trait]
pub trait StoreSession: Send {
    /// Insert all rows of one set atomically, returning the number written
    async fn insert_records(&mut self, set_id: &str, batch: &InsertBatch) -> Result<u64>;

    async fn insert_ledger_row(&mut self, row: &LedgerRow) -> Result<()>;
}
