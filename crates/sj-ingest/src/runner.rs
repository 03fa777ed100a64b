//! Run loop: one pass in normal mode, passes until drained in loop mode

use async_trait::async_trait;
use serde::Serialize;
use sj_common::types::RunMode;
use sj_common::Result;
use std::path::Path;
use tracing::info;

use crate::commit::CommitResult;
use crate::pipeline::PassReport;

/// Something that can execute one ingestion pass
#[async_trait]
pub trait PassExecutor: Send + Sync {
    async fn run_pass(&self) -> Result<PassReport>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Done,
}

/// Everything a run did
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub passes: Vec<PassReport>,
    /// Commit results of all passes, in order
    pub results: Vec<CommitResult>,
}

impl RunSummary {
    pub fn uploaded(&self) -> usize {
        self.results.iter().filter(|r| r.uploaded).count()
    }

    /// Write the commit results as a pretty-printed JSON array
    pub fn write_report(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.results)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), results = self.results.len(), "Wrote commit report");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunLoopController {
    mode: RunMode,
}

impl RunLoopController {
    pub fn new(mode: RunMode) -> Self {
        Self { mode }
    }

    /// State after a pass. Loop mode keeps running only while the last pass
    /// uploaded something and left eligible sets behind.
    pub fn next_state(&self, report: &PassReport) -> RunState {
        match self.mode {
            RunMode::Normal => RunState::Done,
            RunMode::Loop => {
                if report.results.is_empty() || report.uploaded() == 0 || report.deferred == 0 {
                    RunState::Done
                } else {
                    RunState::Running
                }
            }
        }
    }

    pub async fn run<E: PassExecutor + ?Sized>(&self, executor: &E) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut state = RunState::Running;

        while state == RunState::Running {
            let pass = summary.passes.len() + 1;
            info!(pass, mode = %self.mode, "Starting pass");

            let report = executor.run_pass().await?;
            state = self.next_state(&report);

            info!(
                pass,
                results = report.results.len(),
                uploaded = report.uploaded(),
                deferred = report.deferred,
                done = state == RunState::Done,
                "Pass finished"
            );
            summary.results.extend(report.results.iter().cloned());
            summary.passes.push(report);
        }

        info!(
            passes = summary.passes.len(),
            results = summary.results.len(),
            uploaded = summary.uploaded(),
            "Run finished"
        );
        Ok(summary)
    }
}
