//! Commit of loaded sets and their ledger rows

use serde::Serialize;
use sj_common::{Result, SjError};
use tracing::{error, info};

use crate::ledger::LedgerRow;
use crate::loader::RecordSet;
use crate::schema::InsertColumn;
use crate::store::{InsertBatch, RecordStore, StoreSession};

/// Outcome of committing one set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitResult {
    pub set_id: String,
    /// Data and ledger row both written (an empty set counts as uploaded)
    pub uploaded: bool,
    pub ledger: LedgerRow,
    pub rows: u64,
}

/// Writes each set's records followed by its ledger row.
///
/// With `fatal` set any store error aborts the commit stage; otherwise the
/// set is reported as not uploaded and is retried by a later run.
#[derive(Debug, Clone, Copy)]
pub struct UploadCommitter {
    fatal: bool,
}

impl UploadCommitter {
    pub fn new(fatal: bool) -> Self {
        Self { fatal }
    }

    pub async fn commit(
        &self,
        store: &dyn RecordStore,
        sets: Vec<RecordSet>,
        columns: &[InsertColumn],
    ) -> Result<Vec<CommitResult>> {
        if sets.is_empty() {
            return Ok(Vec::new());
        }

        let mut session = match store.open_session().await {
            Ok(session) => session,
            Err(e) => {
                self.on_store_error("commit stage", "open session", e)?;
                return Ok(sets.iter().map(not_uploaded).collect());
            }
        };

        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let mut results = Vec::with_capacity(sets.len());
        for set in sets {
            let result = self.commit_set(session.as_mut(), &set, columns, &names).await?;
            results.push(result);
        }

        let uploaded = results.iter().filter(|r| r.uploaded).count();
        info!(sets = results.len(), uploaded, "Commit stage finished");
        Ok(results)
    }

    async fn commit_set(
        &self,
        session: &mut (dyn StoreSession + '_),
        set: &RecordSet,
        columns: &[InsertColumn],
        names: &[&str],
    ) -> Result<CommitResult> {
        let set_id = set.set_id();
        let ledger = LedgerRow::new(set_id, set.min_key, set.max_key);

        let mut rows = 0;
        if !set.table.is_empty() {
            let batch = InsertBatch {
                columns: columns.to_vec(),
                rows: set.table.project(names),
            };
            match session.insert_records(set_id, &batch).await {
                Ok(n) => rows = n,
                Err(e) => {
                    self.on_store_error(set_id, "insert records", e)?;
                    return Ok(not_uploaded(set));
                }
            }
        }

        if let Err(e) = session.insert_ledger_row(&ledger).await {
            self.on_store_error(set_id, "insert ledger row", e)?;
            return Ok(not_uploaded(set));
        }

        info!(
            set_id,
            rows,
            sj_pk_min = ledger.sj_pk_min,
            sj_pk_max = ledger.sj_pk_max,
            "Committed file set"
        );
        Ok(CommitResult {
            set_id: set_id.to_string(),
            uploaded: true,
            ledger,
            rows,
        })
    }

    fn on_store_error(&self, set_id: &str, stage: &str, e: SjError) -> Result<()> {
        error!(set_id, stage, error = %e, fatal = self.fatal, "Store error during commit");
        if self.fatal {
            Err(e)
        } else {
            Ok(())
        }
    }
}

fn not_uploaded(set: &RecordSet) -> CommitResult {
    CommitResult {
        set_id: set.set_id().to_string(),
        uploaded: false,
        ledger: LedgerRow::new(set.set_id(), set.min_key, set.max_key),
        rows: 0,
    }
}
