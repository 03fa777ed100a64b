//! Sales journal file-set ingestion engine
//!
//! Each pass discovers exported csv files, groups them into file sets, skips
//! sets that are already committed, loads and deduplicates the primary
//! records, merges promo and segment data, and commits the result together
//! with a ledger row per set.
//!
//! ```text
//! list_files -> group_file_sets -> select_file_sets -> PrimaryRecordLoader
//!            -> AuxiliaryMerger -> RecordTransformer -> UploadCommitter
//! ```
//!
//! [`runner::RunLoopController`] repeats passes in loop mode until the
//! backlog is drained.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod commit;
pub mod config;
pub mod grouping;
pub mod ledger;
pub mod listing;
pub mod loader;
pub mod merge;
pub mod patterns;
pub mod pipeline;
pub mod runner;
pub mod schema;
pub mod selection;
pub mod store;
pub mod table;
pub mod transform;

pub use commit::{CommitResult, UploadCommitter};
pub use config::IngestConfig;
pub use ledger::{LedgerRow, LoadLedger};
pub use pipeline::{IngestPipeline, PassReport};
pub use runner::{PassExecutor, RunLoopController, RunSummary};
pub use store::{RecordStore, StoreSession};
