//! Promo and segment merges into the primary records
//!
//! Both merges are left-outer joins that only add columns: every primary row
//! survives exactly once. A missing or unreadable auxiliary file leaves the
//! set unmerged.

use chrono::NaiveDate;
use sj_common::types::FileRole;
use sj_common::Result;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::config::ColumnNames;
use crate::loader::RecordSet;
use crate::schema::ColumnType;
use crate::table::{RecordTable, Value};

/// Suffix given to auxiliary columns whose name already exists in the primary table
pub const COLLISION_SUFFIX: &str = "_right";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// `matched` primary rows found a partner
    Merged { matched: usize },
    Missing,
    Unreadable(String),
}

impl MergeOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, MergeOutcome::Merged { .. })
    }
}

/// Force every promo sequence number to 1 when the promo export starts
/// before `cutover`. Returns whether the correction was applied.
pub fn apply_sequence_correction(
    promo: &mut RecordTable,
    sequence_col: usize,
    start_date: Option<NaiveDate>,
    cutover: NaiveDate,
) -> bool {
    match start_date {
        Some(start) if start < cutover => {
            for row in 0..promo.len() {
                promo.set_value(row, sequence_col, Value::Int(1));
            }
            true
        }
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct AuxiliaryMerger {
    columns: ColumnNames,
    promo_types: HashMap<String, ColumnType>,
    segment_types: HashMap<String, ColumnType>,
    promo_sequence_cutover: NaiveDate,
}

impl AuxiliaryMerger {
    pub fn new(
        columns: ColumnNames,
        promo_types: HashMap<String, ColumnType>,
        segment_types: HashMap<String, ColumnType>,
        promo_sequence_cutover: NaiveDate,
    ) -> Self {
        Self {
            columns,
            promo_types,
            segment_types,
            promo_sequence_cutover,
        }
    }

    /// Join promo rows on (primary key, sequence)
    pub fn merge_promo(&self, set: &mut RecordSet) -> Result<MergeOutcome> {
        let set_id = set.set_id().to_string();
        let Some(member) = set.file_set.member(FileRole::Promo).cloned() else {
            return Ok(missing(&set_id, FileRole::Promo));
        };
        let mut promo = match RecordTable::from_csv(&member.path, &self.promo_types) {
            Ok(table) => table,
            Err(e) => return Ok(unreadable(&set_id, FileRole::Promo, e.to_string())),
        };

        let c = &self.columns;
        let (fk_idx, seq_idx) = match (
            promo.require_column(&c.promo_foreign_key),
            promo.require_column(&c.sequence),
        ) {
            (Ok(fk), Ok(seq)) => (fk, seq),
            (Err(e), _) | (_, Err(e)) => {
                return Ok(unreadable(&set_id, FileRole::Promo, format!("{}: {}", member.name, e)))
            }
        };
        let (pk_idx, pseq_idx) = match (
            set.table.require_column(&c.primary_key),
            set.table.require_column(&c.sequence),
        ) {
            (Ok(pk), Ok(seq)) => (pk, seq),
            (Err(e), _) | (_, Err(e)) => {
                return Ok(unreadable(&set_id, FileRole::Promo, e.to_string()))
            }
        };

        if apply_sequence_correction(
            &mut promo,
            seq_idx,
            member.start_date,
            self.promo_sequence_cutover,
        ) {
            info!(
                set_id = %set_id,
                start_date = ?member.start_date,
                cutover = %self.promo_sequence_cutover,
                "Forced promo sequence to 1 for pre-cutover export"
            );
        }

        let mut lookup: HashMap<(i64, i64), usize> = HashMap::new();
        let mut duplicates = 0;
        for row in 0..promo.len() {
            let fk = promo.value(row, fk_idx).as_i64();
            let seq = promo.value(row, seq_idx).as_i64();
            let (Some(fk), Some(seq)) = (fk, seq) else {
                continue;
            };
            if lookup.contains_key(&(fk, seq)) {
                duplicates += 1;
            } else {
                lookup.insert((fk, seq), row);
            }
        }
        if duplicates > 0 {
            warn!(set_id = %set_id, duplicates, "Promo rows share a join key, keeping the first");
        }

        let excluded: HashSet<&str> = [
            c.promo_id.as_str(),
            c.promo_foreign_key.as_str(),
            c.sequence.as_str(),
        ]
        .into_iter()
        .collect();
        let carried: Vec<usize> = (0..promo.columns().len())
            .filter(|i| !excluded.contains(promo.columns()[*i].as_str()))
            .collect();

        let partner_of = |row: &[Value]| {
            let key = (row[pk_idx].as_i64()?, row[pseq_idx].as_i64()?);
            lookup.get(&key).copied()
        };
        let matched = append_joined(&mut set.table, &promo, &carried, partner_of)?;

        info!(set_id = %set_id, matched, rows = set.table.len(), "Merged promo file");
        Ok(MergeOutcome::Merged { matched })
    }

    /// Collapse segment legs per sales journal row and join on the primary key
    pub fn merge_segments(&self, set: &mut RecordSet) -> Result<MergeOutcome> {
        let set_id = set.set_id().to_string();
        let Some(member) = set.file_set.member(FileRole::Segment).cloned() else {
            return Ok(missing(&set_id, FileRole::Segment));
        };
        let mut segs = match RecordTable::from_csv(&member.path, &self.segment_types) {
            Ok(table) => table,
            Err(e) => return Ok(unreadable(&set_id, FileRole::Segment, e.to_string())),
        };

        let c = &self.columns;
        let required = [
            &c.segment_foreign_key,
            &c.segment_sequence,
            &c.segment_origin,
            &c.segment_destination,
        ];
        let mut idx = Vec::with_capacity(required.len());
        for name in required {
            match segs.require_column(name) {
                Ok(i) => idx.push(i),
                Err(e) => {
                    let reason = format!("{}: {}", member.name, e);
                    return Ok(unreadable(&set_id, FileRole::Segment, reason));
                }
            }
        }
        let (fk_idx, leg_idx, origin_idx, dest_idx) = (idx[0], idx[1], idx[2], idx[3]);
        let pk_idx = match set.table.require_column(&c.primary_key) {
            Ok(i) => i,
            Err(e) => return Ok(unreadable(&set_id, FileRole::Segment, e.to_string())),
        };

        segs.sort_by_columns(&[fk_idx, leg_idx]);

        let excluded: HashSet<&str> = [
            c.segment_id.as_str(),
            c.segment_foreign_key.as_str(),
            c.segment_sequence.as_str(),
            c.segment_origin.as_str(),
            c.segment_destination.as_str(),
        ]
        .into_iter()
        .collect();
        let extra: Vec<usize> = (0..segs.columns().len())
            .filter(|i| !excluded.contains(segs.columns()[*i].as_str()))
            .collect();

        // one collapsed row per foreign key: the joined legs, then the first leg's extra columns
        let mut collapsed = RecordTable::new(
            std::iter::once(c.segments.clone())
                .chain(extra.iter().map(|i| segs.columns()[*i].clone()))
                .collect(),
        );
        let mut lookup: HashMap<i64, usize> = HashMap::new();
        let mut blank_legs = 0;
        for row in segs.rows() {
            let Some(fk) = row[fk_idx].as_i64() else {
                continue;
            };
            let Some(leg) = leg_label(&row[origin_idx], &row[dest_idx]) else {
                blank_legs += 1;
                continue;
            };
            match lookup.get(&fk) {
                Some(at) => {
                    let joined =
                        format!("{}{}{}", collapsed.value(*at, 0), c.segment_separator, leg);
                    collapsed.set_value(*at, 0, Value::Text(joined));
                }
                None => {
                    lookup.insert(fk, collapsed.len());
                    let values = std::iter::once(Value::Text(leg))
                        .chain(extra.iter().map(|i| row[*i].clone()))
                        .collect();
                    collapsed.push_row(values)?;
                }
            }
        }
        if blank_legs > 0 {
            warn!(
                set_id = %set_id,
                blank_legs,
                "Skipped segment legs without origin or destination"
            );
        }
        debug!(
            set_id = %set_id,
            legs = segs.len(),
            journeys = collapsed.len(),
            "Collapsed segments"
        );

        let carried: Vec<usize> = (0..collapsed.columns().len()).collect();
        let partner_of = |row: &[Value]| lookup.get(&row[pk_idx].as_i64()?).copied();
        let matched = append_joined(&mut set.table, &collapsed, &carried, partner_of)?;

        info!(set_id = %set_id, matched, rows = set.table.len(), "Merged segment file");
        Ok(MergeOutcome::Merged { matched })
    }
}

/// Append the `carried` columns of `right` to `left`, choosing the partner
/// row of each left row with `partner_of`. Unmatched rows get nulls.
fn append_joined(
    left: &mut RecordTable,
    right: &RecordTable,
    carried: &[usize],
    partner_of: impl Fn(&[Value]) -> Option<usize>,
) -> Result<usize> {
    let names: Vec<String> = carried
        .iter()
        .map(|i| {
            let name = &right.columns()[*i];
            if left.column_index(name).is_some() {
                format!("{}{}", name, COLLISION_SUFFIX)
            } else {
                name.clone()
            }
        })
        .collect();

    let mut matched = 0;
    let values: Vec<Vec<Value>> = left
        .rows()
        .iter()
        .map(|row| match partner_of(row.as_slice()) {
            Some(r) => {
                matched += 1;
                carried.iter().map(|i| right.value(r, *i).clone()).collect()
            }
            None => vec![Value::Null; carried.len()],
        })
        .collect();

    left.append_columns(names, values)?;
    Ok(matched)
}

/// `ORIGIN-DEST`, or `None` when either airport code is blank
fn leg_label(origin: &Value, destination: &Value) -> Option<String> {
    let origin = origin.to_string();
    let destination = destination.to_string();
    if origin.trim().is_empty() || destination.trim().is_empty() {
        return None;
    }
    Some(format!("{}-{}", origin.trim(), destination.trim()))
}

fn missing(set_id: &str, role: FileRole) -> MergeOutcome {
    warn!(set_id, %role, "No file for role, set proceeds unmerged");
    MergeOutcome::Missing
}

fn unreadable(set_id: &str, role: FileRole, reason: String) -> MergeOutcome {
    warn!(set_id, %role, %reason, "Could not merge file, set proceeds unmerged");
    MergeOutcome::Unreadable(reason)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::grouping::FileSet;
    use crate::listing::FileDescriptor;
    use crate::loader::LoadStats;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn merger() -> AuxiliaryMerger {
        let types = HashMap::from([
            ("SALESJOURNALID".to_string(), ColumnType::Int64),
            ("SEQUENCE".to_string(), ColumnType::Int32),
        ]);
        AuxiliaryMerger::new(ColumnNames::default(), types.clone(), types, date(2019, 1, 1))
    }

    fn primary(rows: &[(i64, i64)]) -> RecordTable {
        let mut table = RecordTable::new(vec!["ID".into(), "SEQUENCE".into(), "AMOUNT".into()]);
        for (id, seq) in rows {
            table
                .push_row(vec![Value::Int(*id), Value::Int(*seq), Value::Float(1.0)])
                .unwrap();
        }
        table
    }

    fn record_set(
        dir: &TempDir,
        files: &[(FileRole, &str, &str)],
        table: RecordTable,
    ) -> RecordSet {
        let mut members = Vec::new();
        let mut roles = BTreeMap::new();
        for (role, name, body) in files {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            let dates =
                crate::patterns::DateInName::new(r"_(\d{8})_(\d{8})\.csv$", "%Y%m%d").unwrap();
            roles.insert(*role, members.len());
            members.push(FileDescriptor::new(path, Some(&dates)));
        }
        RecordSet {
            file_set: FileSet {
                set_id: "s".to_string(),
                members,
                roles,
            },
            table,
            min_key: 0,
            max_key: 0,
            stats: LoadStats::default(),
        }
    }

    #[test]
    fn test_promo_sequence_corrected_before_cutover() {
        let dir = TempDir::new().unwrap();
        let promo = "ID,SALESJOURNALID,SEQUENCE,PROMOCODE,AMOUNT\n900,1,4,SPRING,5\n";
        let mut set = record_set(
            &dir,
            &[(FileRole::Promo, "SJPromo_20181201_20181231.csv", promo)],
            primary(&[(1, 1), (2, 1)]),
        );

        let outcome = merger().merge_promo(&mut set).unwrap();
        assert_eq!(outcome, MergeOutcome::Merged { matched: 1 });
        assert_eq!(set.table.columns(), ["ID", "SEQUENCE", "AMOUNT", "PROMOCODE", "AMOUNT_right"]);
        assert_eq!(set.table.value(0, 3), &Value::Text("SPRING".into()));
        assert_eq!(set.table.value(1, 3), &Value::Null);
    }

    #[test]
    fn test_promo_sequence_kept_after_cutover() {
        let dir = TempDir::new().unwrap();
        let promo = "ID,SALESJOURNALID,SEQUENCE,PROMOCODE\n900,1,4,SPRING\n";
        let mut set = record_set(
            &dir,
            &[(FileRole::Promo, "SJPromo_20190201_20190228.csv", promo)],
            primary(&[(1, 1), (1, 4)]),
        );

        merger().merge_promo(&mut set).unwrap();
        assert_eq!(set.table.value(0, 3), &Value::Null);
        assert_eq!(set.table.value(1, 3), &Value::Text("SPRING".into()));
    }

    #[test]
    fn test_duplicate_promo_keys_keep_row_count() {
        let dir = TempDir::new().unwrap();
        let promo = "ID,SALESJOURNALID,SEQUENCE,PROMOCODE\n1,7,1,FIRST\n2,7,1,SECOND\n";
        let mut set = record_set(
            &dir,
            &[(FileRole::Promo, "SJPromo_20190201_20190228.csv", promo)],
            primary(&[(7, 1)]),
        );

        merger().merge_promo(&mut set).unwrap();
        assert_eq!(set.table.len(), 1);
        assert_eq!(set.table.value(0, 3), &Value::Text("FIRST".into()));
    }

    #[test]
    fn test_segments_concatenated_in_leg_order() {
        let dir = TempDir::new().unwrap();
        let segs = "ID,SALESJOURNALID,SEGMENTSEQUENCE,ORIGIN,DEST,CARRIER\n\
                    12,5,3,CDG,FRA,LH\n\
                    10,5,1,JFK,LHR,BA\n\
                    11,5,2,LHR,CDG,AF\n";
        let mut set = record_set(
            &dir,
            &[(FileRole::Segment, "SJSegs_20190201_20190228.csv", segs)],
            primary(&[(5, 1), (6, 1)]),
        );

        let outcome = merger().merge_segments(&mut set).unwrap();
        assert_eq!(outcome, MergeOutcome::Merged { matched: 1 });
        let seg_idx = set.table.column_index("SEGMENTS").unwrap();
        assert_eq!(set.table.value(0, seg_idx), &Value::Text("JFK-LHR,LHR-CDG,CDG-FRA".into()));
        let carrier = set.table.column_index("CARRIER").unwrap();
        assert_eq!(set.table.value(0, carrier), &Value::Text("BA".into()));
        assert_eq!(set.table.value(1, seg_idx), &Value::Null);
        assert_eq!(set.table.len(), 2);
    }

    #[test]
    fn test_legs_with_blank_airport_codes_are_skipped() {
        let dir = TempDir::new().unwrap();
        let segs = "ID,SALESJOURNALID,SEGMENTSEQUENCE,ORIGIN,DEST,CARRIER\n\
                    10,5,1,,LHR,BA\n\
                    11,5,2,LHR,CDG,AF\n\
                    12,6,1,DUB, ,EI\n";
        let mut set = record_set(
            &dir,
            &[(FileRole::Segment, "SJSegs_20190201_20190228.csv", segs)],
            primary(&[(5, 1), (6, 1)]),
        );

        let outcome = merger().merge_segments(&mut set).unwrap();
        assert_eq!(outcome, MergeOutcome::Merged { matched: 1 });
        let seg_idx = set.table.column_index("SEGMENTS").unwrap();
        let carrier = set.table.column_index("CARRIER").unwrap();
        assert_eq!(set.table.value(0, seg_idx), &Value::Text("LHR-CDG".into()));
        assert_eq!(set.table.value(0, carrier), &Value::Text("AF".into()));
        assert_eq!(set.table.value(1, seg_idx), &Value::Null);
    }

    #[test]
    fn test_missing_and_unreadable_members() {
        let dir = TempDir::new().unwrap();
        let mut set = record_set(
            &dir,
            &[(FileRole::Segment, "SJSegs_20190201_20190228.csv", "ID,ORIGIN\n1,JFK\n")],
            primary(&[(1, 1)]),
        );

        assert_eq!(merger().merge_promo(&mut set).unwrap(), MergeOutcome::Missing);
        assert!(matches!(
            merger().merge_segments(&mut set).unwrap(),
            MergeOutcome::Unreadable(_)
        ));
        assert_eq!(set.table.columns(), ["ID", "SEQUENCE", "AMOUNT"]);
    }

    #[test]
    fn test_sequence_correction_needs_a_start_date() {
        let mut promo = RecordTable::new(vec!["SEQUENCE".into()]);
        promo.push_row(vec![Value::Int(4)]).unwrap();
        assert!(!apply_sequence_correction(&mut promo, 0, None, date(2019, 1, 1)));
        let before_cutover = Some(date(2018, 12, 31));
        assert!(apply_sequence_correction(&mut promo, 0, before_cutover, date(2019, 1, 1)));
        assert_eq!(promo.value(0, 0), &Value::Int(1));
    }
}
