//! Directory listing

use chrono::NaiveDate;
use serde::Serialize;
use sj_common::{Result, SjError};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::patterns::DateInName;

/// A file found in the data directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl FileDescriptor {
    pub fn new(path: impl Into<PathBuf>, dates: Option<&DateInName>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (start_date, end_date) = dates.map(|d| d.parse(&name)).unwrap_or((None, None));
        Self {
            name,
            path,
            start_date,
            end_date,
        }
    }
}

/// List regular files in `dir`, sorted by name.
///
/// Subdirectories are ignored. A missing path or a path that is not a
/// directory is an [`SjError::InvalidPath`].
pub fn list_files(dir: &Path, dates: Option<&DateInName>) -> Result<Vec<FileDescriptor>> {
    if !dir.exists() {
        return Err(SjError::InvalidPath(format!("{} does not exist", dir.display())));
    }
    if !dir.is_dir() {
        return Err(SjError::InvalidPath(format!("{} is not a directory", dir.display())));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        files.push(FileDescriptor::new(entry.path(), dates));
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));

    debug!(dir = %dir.display(), files = files.len(), "Listed data directory");
    Ok(files)
}
