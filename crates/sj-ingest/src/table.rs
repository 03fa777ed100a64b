//! Minimal typed table read from csv exports

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use sj_common::{Result, SjError};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use crate::schema::ColumnType;

/// A single cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view; text is parsed
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Text(s) => parse_int(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Character length of the value's text form; `None` for null
    pub fn text_len(&self) -> Option<usize> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.chars().count()),
            other => Some(other.to_string().chars().count()),
        }
    }

    /// Ordering used for key sorts: nulls first, numbers numerically
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Float(a), b) => b
                .as_i64()
                .map_or(Ordering::Less, |b| a.total_cmp(&(b as f64))),
            (a, Value::Float(b)) => a
                .as_i64()
                .map_or(Ordering::Greater, |a| (a as f64).total_cmp(b)),
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => a.to_string().cmp(&b.to_string()),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => f.write_str(s),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Date(d) => write!(f, "{}", d),
            Value::Timestamp(ts) => write!(f, "{}", ts),
        }
    }
}

fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn parse_cell(raw: &str, ty: ColumnType) -> std::result::Result<Value, &'static str> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    match ty {
        ColumnType::Text | ColumnType::DateText => Ok(Value::Text(raw.to_string())),
        ColumnType::Int64 => parse_int(raw).map(Value::Int).ok_or("not an integer"),
        ColumnType::Int32 => parse_int(raw)
            .filter(|v| i32::try_from(*v).is_ok())
            .map(Value::Int)
            .ok_or("not a 32-bit integer"),
        ColumnType::Float32 | ColumnType::Float64 => raw
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| "not a number"),
    }
}

/// Rows of typed values under named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RecordTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Read a csv file. Columns without a type are read as text.
    pub fn from_csv(path: &Path, types: &HashMap<String, ColumnType>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, types, &path.display().to_string())
    }

    /// `source` names the input in error messages
    pub fn from_reader<R: Read>(
        reader: R,
        types: &HashMap<String, ColumnType>,
        source: &str,
    ) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns: Vec<String> = csv
            .headers()
            .map_err(|e| SjError::parse(format!("{}: {}", source, e)))?
            .iter()
            .map(str::to_string)
            .collect();
        let column_types: Vec<ColumnType> = columns
            .iter()
            .map(|c| types.get(c).copied().unwrap_or(ColumnType::Text))
            .collect();

        let mut table = Self::new(columns);
        for (line, record) in csv.records().enumerate() {
            let record = record.map_err(|e| SjError::parse(format!("{}: {}", source, e)))?;
            let row = record
                .iter()
                .zip(column_types.iter())
                .enumerate()
                .map(|(col, (raw, ty))| {
                    parse_cell(raw, *ty).map_err(|reason| {
                        SjError::parse(format!(
                            "{}: row {}, column '{}': '{}' is {}",
                            source,
                            line + 1,
                            table.columns[col],
                            raw,
                            reason
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            table.rows.push(row);
        }

        Ok(table)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| SjError::parse(format!("missing column '{}'", name)))
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(SjError::parse(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn value(&self, row: usize, col: usize) -> &Value {
        &self.rows[row][col]
    }

    pub fn set_value(&mut self, row: usize, col: usize, value: Value) {
        self.rows[row][col] = value;
    }

    pub fn column_values(&self, col: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |r| &r[col])
    }

    pub fn retain_rows(&mut self, mut keep: impl FnMut(&[Value]) -> bool) -> usize {
        let before = self.rows.len();
        self.rows.retain(|r| keep(r));
        before - self.rows.len()
    }

    /// Stable sort on the given columns
    pub fn sort_by_columns(&mut self, cols: &[usize]) {
        self.rows.sort_by(|a, b| {
            cols.iter()
                .map(|c| a[*c].sort_cmp(&b[*c]))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }

    /// Append columns; `values[i]` holds the new cells of row `i`
    pub fn append_columns(&mut self, names: Vec<String>, values: Vec<Vec<Value>>) -> Result<()> {
        if values.len() != self.rows.len() || values.iter().any(|v| v.len() != names.len()) {
            return Err(SjError::parse("appended columns do not match table shape"));
        }
        self.columns.extend(names);
        for (row, extra) in self.rows.iter_mut().zip(values) {
            row.extend(extra);
        }
        Ok(())
    }

    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep: Vec<bool> = self.columns.iter().map(|c| !names.contains(&c.as_str())).collect();
        let mut flags = keep.iter();
        self.columns.retain(|_| *flags.next().unwrap_or(&true));
        for row in &mut self.rows {
            let mut flags = keep.iter();
            row.retain(|_| *flags.next().unwrap_or(&true));
        }
    }

    /// Rows projected onto `columns`; columns absent from the table are null
    pub fn project(&self, columns: &[&str]) -> Vec<Vec<Value>> {
        let idx: Vec<Option<usize>> = columns.iter().map(|c| self.column_index(c)).collect();
        self.rows
            .iter()
            .map(|row| {
                idx.iter()
                    .map(|i| i.map_or(Value::Null, |i| row[i].clone()))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn types() -> HashMap<String, ColumnType> {
        HashMap::from([
            ("ID".to_string(), ColumnType::Int64),
            ("SEQUENCE".to_string(), ColumnType::Int32),
            ("TOTAL".to_string(), ColumnType::Float64),
        ])
    }

    #[test]
    fn test_typed_read_trims_headers() {
        let csv = " ID , SEQUENCE ,TOTAL,NOTE\n2,1,10.5,a\n1,,3,\n";
        let table = RecordTable::from_reader(csv.as_bytes(), &types(), "test").unwrap();

        assert_eq!(table.columns(), ["ID", "SEQUENCE", "TOTAL", "NOTE"]);
        assert_eq!(table.rows()[0], vec![
            Value::Int(2),
            Value::Int(1),
            Value::Float(10.5),
            Value::Text("a".into())
        ]);
        assert_eq!(table.rows()[1][1], Value::Null);
        assert_eq!(table.rows()[1][3], Value::Null);
    }

    #[test]
    fn test_bad_integer_names_column() {
        let csv = "ID,SEQUENCE\nabc,1\n";
        let err = RecordTable::from_reader(csv.as_bytes(), &types(), "SJ_x.csv").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("SJ_x.csv") && msg.contains("'ID'"), "{}", msg);
    }

    #[test]
    fn test_sort_is_numeric_and_stable() {
        let mut table = RecordTable::new(vec!["K".into(), "TAG".into()]);
        for (k, tag) in [("10", "a"), ("9", "b"), ("10", "c")] {
            table.push_row(vec![Value::Text(k.into()), Value::Text(tag.into())]).unwrap();
        }
        table.sort_by_columns(&[0]);
        let tags: Vec<String> = table.column_values(1).map(|v| v.to_string()).collect();
        assert_eq!(tags, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_append_drop_and_project() {
        let mut table = RecordTable::new(vec!["A".into(), "B".into()]);
        table.push_row(vec![Value::Int(1), Value::Int(2)]).unwrap();
        table
            .append_columns(vec!["C".into()], vec![vec![Value::Text("x".into())]])
            .unwrap();
        table.drop_columns(&["B"]);

        assert_eq!(table.columns(), ["A", "C"]);
        assert_eq!(
            table.project(&["C", "MISSING", "A"]),
            vec![vec![Value::Text("x".into()), Value::Null, Value::Int(1)]]
        );
        assert!(table.append_columns(vec!["D".into()], Vec::new()).is_err());
    }
}
