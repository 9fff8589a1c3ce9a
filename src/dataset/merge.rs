// Inner join of two datasets on their shared columns

use std::collections::HashMap;

use super::{Column, Dataset, Value};
use crate::types::{AppError, AppResult};

/// Result of attempting a merge. Missing overlap is an outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Merged { dataset: Dataset, keys: Vec<String> },
    NoCommonColumns,
}

/// Hashable form of a join-key cell. Whole floats collapse onto integers so
/// `1` and `1.0` join.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Int(i64),
    Float(u64),
    Bool(bool),
    Str(String),
}

impl KeyPart {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Int(v) => Some(KeyPart::Int(*v)),
            Value::Float(v) if v.is_nan() => None,
            Value::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
                Some(KeyPart::Int(*v as i64))
            }
            Value::Float(v) => Some(KeyPart::Float(v.to_bits())),
            Value::Bool(v) => Some(KeyPart::Bool(*v)),
            Value::Str(s) => Some(KeyPart::Str(s.clone())),
        }
    }
}

/// Columns of `a` that also appear in `b`, in `a`'s order.
pub fn common_columns(a: &Dataset, b: &Dataset) -> Vec<String> {
    a.column_names()
        .filter(|name| b.column_index(name).is_some())
        .map(str::to_string)
        .collect()
}

/// Inner join on every common column.
pub fn merge(a: &Dataset, b: &Dataset) -> MergeOutcome {
    let keys = common_columns(a, b);
    if keys.is_empty() {
        return MergeOutcome::NoCommonColumns;
    }
    let dataset = inner_join(a, b, &keys);
    MergeOutcome::Merged { dataset, keys }
}

/// Inner join on an explicit subset of the common columns. Shared non-key
/// columns are suffixed `_x` (left) and `_y` (right).
pub fn merge_on(a: &Dataset, b: &Dataset, keys: &[String]) -> AppResult<MergeOutcome> {
    let common = common_columns(a, b);
    if common.is_empty() {
        return Ok(MergeOutcome::NoCommonColumns);
    }
    if keys.is_empty() {
        return Err(AppError::InvalidRequest("merge keys must not be empty".to_string()));
    }
    if let Some(bad) = keys.iter().find(|k| !common.contains(*k)) {
        return Err(AppError::InvalidRequest(format!(
            "'{}' is not a column shared by both datasets (shared: {})",
            bad,
            common.join(", ")
        )));
    }
    // keep left-to-right column order regardless of how keys were listed
    let ordered: Vec<String> = common.into_iter().filter(|c| keys.contains(c)).collect();
    let dataset = inner_join(a, b, &ordered);
    Ok(MergeOutcome::Merged { dataset, keys: ordered })
}

fn inner_join(a: &Dataset, b: &Dataset, keys: &[String]) -> Dataset {
    let left_keys: Vec<usize> = keys.iter().filter_map(|k| a.column_index(k)).collect();
    let right_keys: Vec<usize> = keys.iter().filter_map(|k| b.column_index(k)).collect();

    let right_rest: Vec<usize> = (0..b.column_count())
        .filter(|idx| !right_keys.contains(idx))
        .collect();

    let mut columns: Vec<Column> = Vec::with_capacity(a.column_count() + right_rest.len());
    for (idx, col) in a.columns().iter().enumerate() {
        let clashes = !left_keys.contains(&idx) && b.column_index(&col.name).is_some();
        columns.push(Column {
            name: if clashes { format!("{}_x", col.name) } else { col.name.clone() },
            dtype: col.dtype,
        });
    }
    for idx in &right_rest {
        let col = &b.columns()[*idx];
        let clashes = a.column_index(&col.name).is_some();
        columns.push(Column {
            name: if clashes { format!("{}_y", col.name) } else { col.name.clone() },
            dtype: col.dtype,
        });
    }

    let mut index: HashMap<Vec<KeyPart>, Vec<usize>> = HashMap::new();
    for (row_idx, row) in b.rows().iter().enumerate() {
        if let Some(key) = row_key(row, &right_keys) {
            index.entry(key).or_default().push(row_idx);
        }
    }

    let mut rows = Vec::new();
    for left in a.rows() {
        let Some(key) = row_key(left, &left_keys) else {
            continue;
        };
        let Some(matches) = index.get(&key) else {
            continue;
        };
        for right_idx in matches {
            let right = &b.rows()[*right_idx];
            let mut row = Vec::with_capacity(columns.len());
            row.extend(left.iter().cloned());
            row.extend(right_rest.iter().map(|idx| right[*idx].clone()));
            rows.push(row);
        }
    }

    Dataset::new(columns, rows)
}

fn row_key(row: &[Value], key_indices: &[usize]) -> Option<Vec<KeyPart>> {
    key_indices
        .iter()
        .map(|idx| KeyPart::from_value(&row[*idx]))
        .collect()
}
