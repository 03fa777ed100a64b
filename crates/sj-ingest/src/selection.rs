//! Per-pass set filtering and run-size cap

use serde::Serialize;
use sj_common::{Result, SjError};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::grouping::FileSet;
use crate::ledger::LoadLedger;

/// Which sets a pass may load
#[derive(Debug, Clone, Default)]
pub struct SelectionPolicy {
    pub max_file_sets_per_run: usize,
    pub load_file_sets: Option<Vec<String>>,
    pub exclude_file_sets: Vec<String>,
}

impl SelectionPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_file_sets_per_run == 0 {
            return Err(SjError::config("max_file_sets_per_run must be greater than 0"));
        }
        if let Some(ref allow) = self.load_file_sets {
            if allow.len() > self.max_file_sets_per_run {
                return Err(SjError::config(format!(
                    "load_file_sets lists {} sets, more than max_file_sets_per_run ({})",
                    allow.len(),
                    self.max_file_sets_per_run
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of filtering the complete sets of a pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct Selection {
    /// Accepted sets, in discovery order
    pub sets: Vec<FileSet>,
    pub already_committed: usize,
    pub excluded: usize,
    pub not_allowed: usize,
    /// Eligible sets beyond the cap, in discovery order. The pass draws on
    /// them when an accepted set cannot be loaded.
    pub backlog: Vec<FileSet>,
    /// Eligible sets left for a later pass by the cap
    pub deferred: usize,
}

/// Drop committed, excluded and non-allow-listed sets, then take at most
/// `max_file_sets_per_run` in discovery order.
pub fn select_file_sets(
    sets: Vec<FileSet>,
    ledger: &LoadLedger,
    policy: &SelectionPolicy,
) -> Result<Selection> {
    policy.validate()?;

    let allow: Option<HashSet<&str>> = policy
        .load_file_sets
        .as_ref()
        .map(|ids| ids.iter().map(String::as_str).collect());
    let exclude: HashSet<&str> = policy.exclude_file_sets.iter().map(String::as_str).collect();

    let mut selection = Selection::default();
    for set in sets {
        if ledger.is_set_committed(&set.set_id) {
            debug!(set_id = %set.set_id, "Already committed");
            selection.already_committed += 1;
        } else if exclude.contains(set.set_id.as_str()) {
            debug!(set_id = %set.set_id, "Excluded by configuration");
            selection.excluded += 1;
        } else if allow.as_ref().is_some_and(|a| !a.contains(set.set_id.as_str())) {
            selection.not_allowed += 1;
        } else if selection.sets.len() < policy.max_file_sets_per_run {
            selection.sets.push(set);
        } else {
            selection.backlog.push(set);
        }
    }
    selection.deferred = selection.backlog.len();

    info!(
        selected = selection.sets.len(),
        already_committed = selection.already_committed,
        excluded = selection.excluded,
        not_allowed = selection.not_allowed,
        deferred = selection.deferred,
        "Selected file sets"
    );
    Ok(selection)
}
