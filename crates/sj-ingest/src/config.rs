//! Ingestion configuration
//!
//! Loaded from an optional TOML/YAML file layered with `SJ_*` environment
//! variables (nested keys separated by `__`, e.g. `SJ_KEY_DOMAIN__MAX_SJ_PK_VALUE`).
//! Every field has a default, so an empty file is a valid configuration.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sj_common::types::{FileRole, KeyDomain, RunMode};
use sj_common::{Result, SjError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default directory holding the exported csv files.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Default table description (one row per sales_data column).
pub const DEFAULT_TABLE_DESCRIPTION: &str = "./config/sales_data_desc.csv";

/// Default maximum number of file sets processed by one pass.
pub const DEFAULT_MAX_FILE_SETS_PER_RUN: usize = 10;

/// Default currency of rows accepted by the loader.
pub const DEFAULT_PROCESSING_CURRENCY: &str = "USD";

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/sales_journal";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default number of rows per multi-row insert statement.
pub const DEFAULT_INSERT_CHUNK_ROWS: usize = 500;

/// Exports starting before this date carry an invalid promo sequence generator.
pub fn default_promo_sequence_cutover() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 1, 1).unwrap_or_default()
}

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory containing the exported csv files
    pub data_dir: PathBuf,
    /// Table description csv for the sales data table
    pub table_description: PathBuf,
    /// `normal` runs one pass, `loop` runs until the backlog is drained
    pub run_mode: RunMode,
    /// Maximum number of file sets loaded by a single pass
    pub max_file_sets_per_run: usize,
    /// Explicit allow-list of set ids; when present only these are loaded
    pub load_file_sets: Option<Vec<String>>,
    /// Set ids that are never loaded
    pub exclude_file_sets: Vec<String>,
    /// Only rows in this currency are accepted
    pub processing_currency: String,
    /// Promo files starting before this date have their sequence forced to 1
    pub promo_sequence_cutover: NaiveDate,
    /// Whether a store error during commit aborts the pass
    pub fatal_commit_errors: bool,
    #[serde(alias = "sj_pk_range")]
    pub key_domain: KeyDomain,
    #[serde(alias = "regex_patterns")]
    pub patterns: PatternConfig,
    pub columns: ColumnNames,
    pub tables: TableNames,
    #[serde(alias = "tracking_data_columns")]
    pub tracking_columns: TrackingColumns,
    pub database: DatabaseConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            table_description: PathBuf::from(DEFAULT_TABLE_DESCRIPTION),
            run_mode: RunMode::Normal,
            max_file_sets_per_run: DEFAULT_MAX_FILE_SETS_PER_RUN,
            load_file_sets: None,
            exclude_file_sets: Vec::new(),
            processing_currency: DEFAULT_PROCESSING_CURRENCY.to_string(),
            promo_sequence_cutover: default_promo_sequence_cutover(),
            fatal_commit_errors: true,
            key_domain: KeyDomain::default(),
            patterns: PatternConfig::default(),
            columns: ColumnNames::default(),
            tables: TableNames::default(),
            tracking_columns: TrackingColumns::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from an optional file plus `SJ_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if !path.is_file() {
                return Err(SjError::InvalidPath(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("SJ")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("load_file_sets")
                .with_list_parse_key("exclude_file_sets"),
        );

        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SjError::config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.selection_policy().validate()?;

        if self.processing_currency.trim().is_empty() {
            return Err(SjError::config("processing_currency cannot be empty"));
        }

        self.key_domain.validate()?;
        self.patterns.validate()?;
        self.tables.validate()?;
        self.tracking_columns.validate()?;

        Ok(())
    }

    /// Run-size policy handed to the set filter
    pub fn selection_policy(&self) -> crate::selection::SelectionPolicy {
        crate::selection::SelectionPolicy {
            max_file_sets_per_run: self.max_file_sets_per_run,
            load_file_sets: self.load_file_sets.clone(),
            exclude_file_sets: self.exclude_file_sets.clone(),
        }
    }
}

/// Filename patterns identifying set membership and file roles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Matches any file that is part of some export set
    pub set_pattern: String,
    /// Extracts the set id shared by every file of one export (group 1, or the whole match)
    pub set_link_pattern: String,
    /// Extracts start (group 1) and end (group 2) dates from a filename
    pub date_in_name_pattern: Option<String>,
    /// chrono format of the dates captured by `date_in_name_pattern`
    pub date_in_name_format: String,
    pub roles: BTreeMap<FileRole, RolePatternConfig>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(FileRole::Primary, RolePatternConfig::new(r"^SJ_", "sj"));
        roles.insert(FileRole::Promo, RolePatternConfig::new(r"^SJPromo_", "promo"));
        roles.insert(FileRole::Segment, RolePatternConfig::new(r"^SJSegs_", "segs"));

        Self {
            set_pattern: r"^SJ(Promo|Segs)?_\d{8}_\d{8}\.csv$".to_string(),
            set_link_pattern: r"_(\d{8}_\d{8})\.csv$".to_string(),
            date_in_name_pattern: Some(r"_(\d{8})_(\d{8})\.csv$".to_string()),
            date_in_name_format: "%Y%m%d".to_string(),
            roles,
        }
    }
}

impl PatternConfig {
    pub fn validate(&self) -> Result<()> {
        match self.roles.get(&FileRole::Primary) {
            Some(primary) if primary.required => Ok(()),
            Some(_) => Err(SjError::config("patterns.roles.primary must be required")),
            None => Err(SjError::config("patterns.roles.primary is not configured")),
        }
    }
}

/// Pattern and catalog root for one file role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePatternConfig {
    pub pattern: String,
    #[serde(default = "default_true")]
    pub required: bool,
    /// Table description root holding this file's column types
    pub root: String,
}

impl RolePatternConfig {
    pub fn new(pattern: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            required: true,
            root: root.into(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Column names used by the loader and the merges
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub primary_key: String,
    pub sequence: String,
    pub currency: String,
    pub promo_id: String,
    pub promo_foreign_key: String,
    pub segment_id: String,
    pub segment_foreign_key: String,
    pub segment_sequence: String,
    pub segment_origin: String,
    pub segment_destination: String,
    /// Merged column holding the concatenated legs
    pub segments: String,
    pub segment_separator: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            primary_key: "ID".to_string(),
            sequence: "SEQUENCE".to_string(),
            currency: "ENTITYCURRENCYCODE".to_string(),
            promo_id: "ID".to_string(),
            promo_foreign_key: "SALESJOURNALID".to_string(),
            segment_id: "ID".to_string(),
            segment_foreign_key: "SALESJOURNALID".to_string(),
            segment_sequence: "SEGMENTSEQUENCE".to_string(),
            segment_origin: "ORIGIN".to_string(),
            segment_destination: "DEST".to_string(),
            segments: "SEGMENTS".to_string(),
            segment_separator: ",".to_string(),
        }
    }
}

/// Destination tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    #[serde(alias = "sales_data_table")]
    pub sales: String,
    #[serde(alias = "tracking_data_table")]
    pub tracking: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            sales: "sales_data".to_string(),
            tracking: "tracking_data".to_string(),
        }
    }
}

impl TableNames {
    pub fn validate(&self) -> Result<()> {
        if self.sales.trim().is_empty() || self.tracking.trim().is_empty() {
            return Err(SjError::config("tables.sales and tables.tracking must both be set"));
        }
        Ok(())
    }
}

/// Column definitions of the tracking (ledger) table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingColumns {
    pub names: Vec<String>,
    pub defs: Vec<String>,
    /// Columns filled by the database (serial ids etc.), never inserted
    pub auto: Vec<bool>,
}

impl Default for TrackingColumns {
    fn default() -> Self {
        Self {
            names: vec!["id".into(), "fileset".into(), "sj_pk_min".into(), "sj_pk_max".into()],
            defs: vec![
                "SERIAL PRIMARY KEY".into(),
                "TEXT NOT NULL".into(),
                "BIGINT NOT NULL".into(),
                "BIGINT NOT NULL".into(),
            ],
            auto: vec![true, false, false, false],
        }
    }
}

impl TrackingColumns {
    pub fn validate(&self) -> Result<()> {
        if self.names.len() != self.defs.len() || self.names.len() != self.auto.len() {
            return Err(SjError::config(format!(
                "column definition counts do not match: names ({}), definitions ({}), auto ({})",
                self.names.len(),
                self.defs.len(),
                self.auto.len()
            )));
        }
        let inserted = self.insert_columns().len();
        if inserted != 3 {
            return Err(SjError::config(format!(
                "tracking table needs exactly 3 non-auto columns (fileset, min, max), found {}",
                inserted
            )));
        }
        Ok(())
    }

    /// Names of the columns written for each ledger row, in order: fileset, min, max
    pub fn insert_columns(&self) -> Vec<&str> {
        self.names
            .iter()
            .zip(self.auto.iter())
            .filter(|(_, auto)| !**auto)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    /// Rows per insert statement, further capped by the bind-parameter limit
    pub insert_chunk_rows: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            insert_chunk_rows: DEFAULT_INSERT_CHUNK_ROWS,
        }
    }
}
