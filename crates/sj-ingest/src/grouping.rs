//! File set grouping and completeness checks

use serde::Serialize;
use sj_common::types::FileRole;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

use crate::listing::FileDescriptor;
use crate::patterns::PatternCatalog;

/// The files of one export, linked by a common set id
#[derive(Debug, Clone, Serialize)]
pub struct FileSet {
    pub set_id: String,
    /// Members in listing order
    pub members: Vec<FileDescriptor>,
    /// Role to index into `members`
    pub roles: BTreeMap<FileRole, usize>,
}

impl FileSet {
    pub fn member(&self, role: FileRole) -> Option<&FileDescriptor> {
        self.roles.get(&role).and_then(|idx| self.members.get(*idx))
    }
}

/// Why a set was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum SetDefect {
    #[error("incomplete: no file matches required role '{role}'")]
    Incomplete { role: FileRole },

    #[error("inconsistent: {count} files match role '{role}'")]
    Inconsistent { role: FileRole, count: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedSet {
    pub set_id: String,
    pub defect: SetDefect,
}

/// Result of grouping one directory listing
#[derive(Debug, Clone, Default, Serialize)]
pub struct Grouping {
    /// Complete sets in order of first appearance
    pub complete: Vec<FileSet>,
    pub rejected: Vec<RejectedSet>,
    /// Files outside any set, or whose set id could not be extracted
    pub ignored: usize,
}

/// Group descriptors into file sets and drop incomplete or inconsistent ones.
pub fn group_file_sets(files: &[FileDescriptor], patterns: &PatternCatalog) -> Grouping {
    let mut grouping = Grouping::default();
    let mut order: Vec<(String, Vec<FileDescriptor>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for file in files {
        if !patterns.belongs_to_set(&file.name) {
            grouping.ignored += 1;
            continue;
        }
        let Some(set_id) = patterns.link_id(&file.name) else {
            debug!(file = %file.name, "No set id in file name, ignoring");
            grouping.ignored += 1;
            continue;
        };
        match index.get(&set_id) {
            Some(idx) => order[*idx].1.push(file.clone()),
            None => {
                index.insert(set_id.clone(), order.len());
                order.push((set_id, vec![file.clone()]));
            }
        }
    }

    for (set_id, members) in order {
        match assign_roles(&members, patterns) {
            Ok(roles) => grouping.complete.push(FileSet {
                set_id,
                members,
                roles,
            }),
            Err(defect) => {
                warn!(set_id = %set_id, %defect, "Discarding file set");
                grouping.rejected.push(RejectedSet { set_id, defect });
            }
        }
    }

    grouping
}

fn assign_roles(
    members: &[FileDescriptor],
    patterns: &PatternCatalog,
) -> Result<BTreeMap<FileRole, usize>, SetDefect> {
    let mut roles = BTreeMap::new();
    let mut missing = None;

    for role in patterns.roles() {
        let matches: Vec<usize> = members
            .iter()
            .enumerate()
            .filter(|(_, m)| role.regex.is_match(&m.name))
            .map(|(idx, _)| idx)
            .collect();

        match matches.as_slice() {
            [] if role.required => {
                missing.get_or_insert(role.role);
            }
            [] => {}
            [idx] => {
                roles.insert(role.role, *idx);
            }
            _ => {
                return Err(SetDefect::Inconsistent {
                    role: role.role,
                    count: matches.len(),
                })
            }
        }
    }

    match missing {
        Some(role) => Err(SetDefect::Incomplete { role }),
        None => Ok(roles),
    }
}
