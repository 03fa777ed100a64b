//! PostgreSQL record store

use async_trait::async_trait;
use sj_common::{Result, SjError};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::query_builder::Separated;
use sqlx::{Connection, Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::{debug, info};

use super::{InsertBatch, RecordStore, StoreSession};
use crate::config::{DatabaseConfig, TableNames, TrackingColumns, DEFAULT_INSERT_CHUNK_ROWS};
use crate::ledger::LedgerRow;
use crate::table::Value;

/// PostgreSQL accepts at most this many bind parameters per statement
const MAX_BIND_PARAMS: usize = 65_535;

fn db_error(e: sqlx::Error) -> SjError {
    SjError::Database(e.to_string())
}

/// Create the connection pool
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(db_error)?;

    info!(
        max_connections = config.max_connections,
        "Database connection pool created"
    );
    Ok(pool)
}

/// Most rows one insert statement can carry for a table of `columns` columns
fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
    sales_table: String,
    primary_key: String,
    tracking_table: String,
    /// fileset, min key, max key
    tracking_columns: [String; 3],
    chunk_rows: usize,
}

impl PgRecordStore {
    pub fn new(
        pool: PgPool,
        tables: &TableNames,
        primary_key: &str,
        tracking: &TrackingColumns,
    ) -> Result<Self> {
        tracking.validate()?;
        let cols = tracking.insert_columns();
        Ok(Self {
            pool,
            sales_table: tables.sales.clone(),
            primary_key: primary_key.to_string(),
            tracking_table: tables.tracking.clone(),
            tracking_columns: [cols[0].to_string(), cols[1].to_string(), cols[2].to_string()],
            chunk_rows: DEFAULT_INSERT_CHUNK_ROWS,
        })
    }

    /// Rows per insert statement (at least 1)
    pub fn with_chunk_rows(mut self, rows: usize) -> Self {
        self.chunk_rows = rows.max(1);
        self
    }

    fn chunk_size(&self, columns: usize) -> usize {
        self.chunk_rows.min(rows_per_statement(columns))
    }

    fn ledger_select_sql(&self) -> String {
        let [fileset, min, max] = &self.tracking_columns;
        format!(
            "SELECT {}, CAST({} AS BIGINT), CAST({} AS BIGINT) FROM {}",
            fileset, min, max, self.tracking_table
        )
    }

    fn ledger_insert_sql(&self) -> String {
        let [fileset, min, max] = &self.tracking_columns;
        format!(
            "INSERT INTO {} ({}, {}, {}) VALUES ($1, $2, $3)",
            self.tracking_table, fileset, min, max
        )
    }

    fn insert_prefix(&self, batch: &InsertBatch) -> String {
        let columns: Vec<&str> = batch.columns.iter().map(|c| c.name.as_str()).collect();
        format!("INSERT INTO {} ({}) ", self.sales_table, columns.join(", "))
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn committed_file_sets(&self) -> Result<Vec<LedgerRow>> {
        let rows = sqlx::query(&self.ledger_select_sql())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                Ok(LedgerRow {
                    fileset: row.try_get(0).map_err(db_error)?,
                    sj_pk_min: row.try_get(1).map_err(db_error)?,
                    sj_pk_max: row.try_get(2).map_err(db_error)?,
                })
            })
            .collect()
    }

    async fn stored_primary_keys(&self) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT CAST({} AS BIGINT) FROM {}",
            self.primary_key, self.sales_table
        );
        let keys: Vec<i64> = sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        debug!(keys = keys.len(), table = %self.sales_table, "Read stored primary keys");
        Ok(keys)
    }

    async fn open_session(&self) -> Result<Box<dyn StoreSession + '_>> {
        let conn = self.pool.acquire().await.map_err(db_error)?;
        Ok(Box::new(PgStoreSession { conn, store: self }))
    }
}

/// Session over one pooled connection, returned to the pool on drop
pub struct PgStoreSession<'a> {
    conn: PoolConnection<Postgres>,
    store: &'a PgRecordStore,
}

fn push_cast(b: &mut Separated<'_, '_, Postgres, &'static str>, value: &Value, datatype: &str) {
    b.push("CAST(");
    match value {
        Value::Null => b.push_bind_unseparated(None::<String>),
        Value::Text(s) => b.push_bind_unseparated(s.clone()),
        Value::Int(v) => b.push_bind_unseparated(*v),
        Value::Float(v) => b.push_bind_unseparated(*v),
        Value::Date(d) => b.push_bind_unseparated(*d),
        Value::Timestamp(ts) => b.push_bind_unseparated(*ts),
    };
    b.push_unseparated(format!(" AS {})", datatype));
}

#[async_trait]
impl StoreSession for PgStoreSession<'_> {
    async fn insert_records(&mut self, set_id: &str, batch: &InsertBatch) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let prefix = self.store.insert_prefix(batch);
        let chunk_size = self.store.chunk_size(batch.columns.len());
        let mut tx = self.conn.begin().await.map_err(db_error)?;
        let mut inserted = 0;

        for chunk in batch.rows.chunks(chunk_size) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(prefix.as_str());
            query_builder.push_values(chunk.iter(), |mut b, row| {
                for (value, column) in row.iter().zip(batch.columns.iter()) {
                    push_cast(&mut b, value, &column.datatype);
                }
            });

            inserted += query_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(db_error)?
                .rows_affected();
        }

        tx.commit().await.map_err(db_error)?;
        debug!(set_id, inserted, statements = batch.len().div_ceil(chunk_size), "Inserted records");
        Ok(inserted)
    }

    async fn insert_ledger_row(&mut self, row: &LedgerRow) -> Result<()> {
        sqlx::query(&self.store.ledger_insert_sql())
            .bind(&row.fileset)
            .bind(row.sj_pk_min)
            .bind(row.sj_pk_max)
            .execute(&mut *self.conn)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}
