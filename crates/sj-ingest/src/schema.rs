//! Table description: the column catalog of the sales data table
//!
//! The description is a csv file with one row per column:
//!
//! ```text
//! field,datatype,loadtype,root,save,primary_key,not_null,default,format,ignore
//! ID,bigint,,sj,y,y,y,,,
//! CREATIONDATE,timestamp,text,sj,y,,,,%Y-%m-%d %H:%M:%S,
//! PROMOCODE,varchar(8),,promo,y,,,,,
//! OLDCOLUMN,text,,sj,n,,,,,#
//! ```
//!
//! `loadtype` overrides how the column is read from the export, `root` names
//! the export file the column comes from and rows whose `ignore` contains `#`
//! are comments.

use serde::Deserialize;
use sj_common::{Result, SjError};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// How a csv column is parsed when read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Kept as text on read, converted by the transformer
    DateText,
}

/// Database type of a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Text,
    /// `varchar(n)`; `None` when no length is given
    Varchar(Option<usize>),
    Date,
    Timestamp,
    Other(String),
}

impl SqlType {
    pub fn parse(datatype: &str) -> Self {
        let lower = datatype.trim().to_lowercase();
        match lower.as_str() {
            "smallint" | "smallserial" => SqlType::SmallInt,
            "integer" | "int" | "serial" => SqlType::Integer,
            "bigint" | "bigserial" => SqlType::BigInt,
            "real" => SqlType::Real,
            "double precision" => SqlType::Double,
            "text" => SqlType::Text,
            "date" => SqlType::Date,
            "timestamp" => SqlType::Timestamp,
            other if other.starts_with("varchar") => SqlType::Varchar(varchar_len(other)),
            other => SqlType::Other(other.to_string()),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, SqlType::SmallInt | SqlType::Integer | SqlType::BigInt)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, SqlType::Real | SqlType::Double)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, SqlType::Text | SqlType::Varchar(_))
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, SqlType::Date | SqlType::Timestamp)
    }

    fn read_type(&self) -> ColumnType {
        match self {
            SqlType::SmallInt | SqlType::Integer => ColumnType::Int32,
            SqlType::BigInt => ColumnType::Int64,
            SqlType::Real => ColumnType::Float32,
            SqlType::Double => ColumnType::Float64,
            SqlType::Date | SqlType::Timestamp => ColumnType::DateText,
            SqlType::Text | SqlType::Varchar(_) | SqlType::Other(_) => ColumnType::Text,
        }
    }
}

fn varchar_len(datatype: &str) -> Option<usize> {
    let open = datatype.find('(')?;
    let close = datatype[open..].find(')')? + open;
    datatype[open + 1..close].trim().parse().ok()
}

/// One row of the table description
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    pub field: String,
    pub datatype: String,
    #[serde(default)]
    pub loadtype: String,
    #[serde(default)]
    pub root: String,
    #[serde(default)]
    pub save: String,
    #[serde(default)]
    pub primary_key: String,
    #[serde(default)]
    pub not_null: String,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub ignore: String,
}

impl FieldDef {
    pub fn sql_type(&self) -> SqlType {
        SqlType::parse(&self.datatype)
    }

    /// Type used when reading the export; `loadtype` wins when given
    pub fn read_type(&self) -> ColumnType {
        if self.loadtype.trim().is_empty() {
            self.sql_type().read_type()
        } else {
            SqlType::parse(&self.loadtype).read_type()
        }
    }

    pub fn is_saved(&self) -> bool {
        self.save.trim().eq_ignore_ascii_case("y")
    }

    pub fn is_comment(&self) -> bool {
        self.ignore.contains('#')
    }

    pub fn format(&self) -> Option<&str> {
        Some(self.format.trim()).filter(|f| !f.is_empty())
    }
}

/// A column written to the sales data table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertColumn {
    pub name: String,
    /// Declared database type, used to cast bound parameters
    pub datatype: String,
}

/// Parsed table description
#[derive(Debug, Clone, Default)]
pub struct ColumnCatalog {
    fields: Vec<FieldDef>,
    index: HashMap<String, usize>,
}

impl ColumnCatalog {
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SjError::InvalidPath(format!(
                "Table description not found: {}",
                path.display()
            )));
        }
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut catalog = Self::default();
        for (line, record) in csv.deserialize::<FieldDef>().enumerate() {
            let def = record.map_err(|e| {
                SjError::config(format!("Table description row {}: {}", line + 2, e))
            })?;
            if def.is_comment() {
                continue;
            }
            if def.field.is_empty() {
                return Err(SjError::config(format!(
                    "Table description row {}: empty field name",
                    line + 2
                )));
            }
            if catalog.index.contains_key(&def.field) {
                return Err(SjError::config(format!(
                    "Table description lists '{}' more than once",
                    def.field
                )));
            }
            catalog.index.insert(def.field.clone(), catalog.fields.len());
            catalog.fields.push(def);
        }

        debug!(fields = catalog.fields.len(), "Loaded table description");
        Ok(catalog)
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.index.get(name).map(|idx| &self.fields[*idx])
    }

    /// Read types of the columns whose root is `root`
    pub fn read_types(&self, root: &str) -> HashMap<String, ColumnType> {
        self.fields
            .iter()
            .filter(|f| f.root.eq_ignore_ascii_case(root))
            .map(|f| (f.field.clone(), f.read_type()))
            .collect()
    }

    /// Columns written to the database, in description order
    pub fn insert_columns(&self) -> Vec<InsertColumn> {
        self.fields
            .iter()
            .filter(|f| f.is_saved())
            .map(|f| InsertColumn {
                name: f.field.clone(),
                datatype: f.datatype.clone(),
            })
            .collect()
    }
}
