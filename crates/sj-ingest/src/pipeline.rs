//! One ingestion pass
//!
//! discover -> group -> filter -> load/dedup -> merge -> transform -> commit

use async_trait::async_trait;
use serde::Serialize;
use sj_common::types::FileRole;
use sj_common::{Result, SjError};
use tracing::{info, warn};

use crate::commit::{CommitResult, UploadCommitter};
use crate::config::IngestConfig;
use crate::grouping::group_file_sets;
use crate::ledger::LoadLedger;
use crate::listing::list_files;
use crate::loader::{LoadOutcome, PrimaryRecordLoader};
use crate::merge::AuxiliaryMerger;
use crate::patterns::PatternCatalog;
use crate::runner::PassExecutor;
use crate::schema::{ColumnCatalog, InsertColumn};
use crate::selection::select_file_sets;
use crate::store::RecordStore;
use crate::transform::RecordTransformer;

/// Counts of one pass, stage by stage, plus its commit results
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub files: usize,
    pub ignored_files: usize,
    pub complete_sets: usize,
    pub rejected_sets: usize,
    pub already_committed: usize,
    pub excluded: usize,
    pub not_allowed: usize,
    /// Sets the pass tried to load, in discovery order
    pub selected: usize,
    /// Eligible sets left for a later pass by the cap
    pub deferred: usize,
    pub loaded: usize,
    pub skipped: usize,
    pub promo_merged: usize,
    pub segments_merged: usize,
    pub results: Vec<CommitResult>,
}

impl PassReport {
    pub fn uploaded(&self) -> usize {
        self.results.iter().filter(|r| r.uploaded).count()
    }
}

pub struct IngestPipeline<S: RecordStore> {
    config: IngestConfig,
    patterns: PatternCatalog,
    loader: PrimaryRecordLoader,
    merger: AuxiliaryMerger,
    transformer: RecordTransformer,
    committer: UploadCommitter,
    insert_columns: Vec<InsertColumn>,
    store: S,
}

impl<S: RecordStore> IngestPipeline<S> {
    pub fn new(config: IngestConfig, catalog: ColumnCatalog, store: S) -> Result<Self> {
        config.validate()?;
        let patterns = PatternCatalog::from_config(&config.patterns)?;

        let insert_columns = catalog.insert_columns();
        if insert_columns.is_empty() {
            return Err(SjError::config("table description has no saved columns"));
        }

        let read_types = |role: FileRole| {
            patterns
                .role(role)
                .map(|r| catalog.read_types(&r.root))
                .unwrap_or_default()
        };
        let columns = &config.columns;
        let loader = PrimaryRecordLoader::new(
            read_types(FileRole::Primary),
            columns.primary_key.clone(),
            columns.currency.clone(),
            config.processing_currency.clone(),
        );
        let merger = AuxiliaryMerger::new(
            columns.clone(),
            read_types(FileRole::Promo),
            read_types(FileRole::Segment),
            config.promo_sequence_cutover,
        );

        Ok(Self {
            committer: UploadCommitter::new(config.fatal_commit_errors),
            transformer: RecordTransformer::new(catalog),
            config,
            patterns,
            loader,
            merger,
            insert_columns,
            store,
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn run_pass(&self) -> Result<PassReport> {
        let mut report = PassReport::default();

        let files = list_files(&self.config.data_dir, self.patterns.date_in_name())?;
        report.files = files.len();

        let grouping = group_file_sets(&files, &self.patterns);
        report.ignored_files = grouping.ignored;
        report.complete_sets = grouping.complete.len();
        report.rejected_sets = grouping.rejected.len();

        let committed = self.store.committed_file_sets().await?;
        let keys = self.store.stored_primary_keys().await?;
        let mut ledger = LoadLedger::build(self.config.key_domain, &committed, keys)?;

        let selection =
            select_file_sets(grouping.complete, &ledger, &self.config.selection_policy())?;
        report.already_committed = selection.already_committed;
        report.excluded = selection.excluded;
        report.not_allowed = selection.not_allowed;

        // A set that cannot be loaded gives its slot to the next eligible one
        let cap = self.config.max_file_sets_per_run;
        let mut candidates = selection.sets.into_iter().chain(selection.backlog);
        let mut ready = Vec::with_capacity(cap);
        while ready.len() < cap {
            let Some(file_set) = candidates.next() else {
                break;
            };
            report.selected += 1;
            let mut set = match self.loader.load(&file_set, &mut ledger)? {
                LoadOutcome::Loaded(set) => set,
                LoadOutcome::Skipped { .. } => {
                    report.skipped += 1;
                    continue;
                }
            };
            report.loaded += 1;

            if self.merger.merge_promo(&mut set)?.is_merged() {
                report.promo_merged += 1;
            }
            if self.merger.merge_segments(&mut set)?.is_merged() {
                report.segments_merged += 1;
            }
            self.transformer.transform(&mut set)?;
            ready.push(set);
        }
        report.deferred = candidates.count();

        report.results = self
            .committer
            .commit(&self.store, ready, &self.insert_columns)
            .await?;

        if report.skipped > 0 {
            warn!(skipped = report.skipped, "Some file sets could not be loaded");
        }
        info!(
            files = report.files,
            complete = report.complete_sets,
            rejected = report.rejected_sets,
            selected = report.selected,
            deferred = report.deferred,
            loaded = report.loaded,
            skipped = report.skipped,
            promo_merged = report.promo_merged,
            segments_merged = report.segments_merged,
            uploaded = report.uploaded(),
            "Pass complete"
        );
        Ok(report)
    }
}

#[async_trait]
impl<S: RecordStore> PassExecutor for IngestPipeline<S> {
    async fn run_pass(&self) -> Result<PassReport> {
        IngestPipeline::run_pass(self).await
    }
}
