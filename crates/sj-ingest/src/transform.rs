//! Post-merge coercion to the declared column types

use chrono::{NaiveDate, NaiveDateTime};
use sj_common::{Result, SjError};
use tracing::{debug, info};

use crate::loader::RecordSet;
use crate::schema::{ColumnCatalog, FieldDef, SqlType};
use crate::table::Value;

/// Counts of cells changed by one transform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    pub nulls_filled: usize,
    pub converted: usize,
}

/// Coerces merged tables to the types of the table description and checks
/// varchar limits.
#[derive(Debug, Clone)]
pub struct RecordTransformer {
    catalog: ColumnCatalog,
}

impl RecordTransformer {
    pub fn new(catalog: ColumnCatalog) -> Self {
        Self { catalog }
    }

    pub fn transform(&self, set: &mut RecordSet) -> Result<TransformStats> {
        let set_id = set.set_id().to_string();
        let mut stats = TransformStats::default();

        // Saved columns no merge supplied start out null, exactly like rows
        // without an auxiliary partner, and are filled below.
        let absent: Vec<String> = self
            .catalog
            .fields()
            .iter()
            .filter(|f| f.is_saved() && set.table.column_index(&f.field).is_none())
            .map(|f| f.field.clone())
            .collect();
        if !absent.is_empty() {
            debug!(
                set_id = %set_id,
                columns = ?absent,
                "Adding columns missing from the merged table"
            );
            let nulls = vec![vec![Value::Null; absent.len()]; set.table.len()];
            set.table.append_columns(absent, nulls)?;
        }

        for col in 0..set.table.columns().len() {
            let name = set.table.columns()[col].clone();
            let Some(field) = self.catalog.field(&name) else {
                debug!(set_id = %set_id, column = %name, "Column not in table description");
                continue;
            };
            let sql = field.sql_type();

            for row in 0..set.table.len() {
                let value = set.table.value(row, col);
                let was_null = value.is_null();
                let coerced = coerce(value, &sql, field).map_err(|raw| {
                    SjError::parse(format!(
                        "set {}: field '{}' value '{}' is not an integer",
                        set_id, name, raw
                    ))
                })?;
                if let Some(new) = coerced {
                    if was_null {
                        stats.nulls_filled += 1;
                    } else {
                        stats.converted += 1;
                    }
                    set.table.set_value(row, col, new);
                }
            }

            if let SqlType::Varchar(Some(max_size)) = sql {
                let count = set
                    .table
                    .column_values(col)
                    .filter(|v| v.text_len().is_some_and(|len| len > max_size))
                    .count();
                if count > 0 {
                    return Err(SjError::TypeLimit {
                        field: name,
                        count,
                        max_size,
                    });
                }
            }
        }

        info!(
            set_id = %set_id,
            nulls_filled = stats.nulls_filled,
            converted = stats.converted,
            "Transformed records"
        );
        Ok(stats)
    }
}

/// New value for a cell, or `None` to keep it. `Err` carries unparsable integer text.
fn coerce(
    value: &Value,
    sql: &SqlType,
    field: &FieldDef,
) -> std::result::Result<Option<Value>, String> {
    if sql.is_integer() {
        return match value {
            Value::Null => Ok(Some(Value::Int(0))),
            Value::Int(_) => Ok(None),
            Value::Float(f) if f.fract() == 0.0 => Ok(Some(Value::Int(*f as i64))),
            other => other
                .as_i64()
                .map(|v| Some(Value::Int(v)))
                .ok_or_else(|| other.to_string()),
        };
    }

    if sql.is_float() {
        return Ok(match value {
            Value::Null => Some(Value::Float(0.0)),
            Value::Int(v) => Some(Value::Float(*v as f64)),
            Value::Text(s) => s.trim().parse::<f64>().ok().map(Value::Float),
            _ => None,
        });
    }

    if sql.is_temporal() {
        let (Value::Text(s), Some(format)) = (value, field.format()) else {
            return Ok(None);
        };
        return Ok(match sql {
            SqlType::Date => NaiveDate::parse_from_str(s, format).ok().map(Value::Date),
            _ => NaiveDateTime::parse_from_str(s, format)
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(s, format)
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
                .map(Value::Timestamp),
        });
    }

    if sql.is_textual() {
        return Ok(match value {
            Value::Null => Some(Value::Text(String::new())),
            Value::Text(_) => None,
            other => Some(Value::Text(other.to_string())),
        });
    }

    Ok(None)
}
