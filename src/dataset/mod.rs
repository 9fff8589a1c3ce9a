//! In-memory tabular datasets
//!
//! A [`Dataset`] is an ordered list of named, typed columns plus an ordered list
//! of rows. Loading lives in [`loader`], joining in [`merge`].

pub mod loader;
pub mod merge;

pub use loader::*;
pub use merge::*;

use serde::{Serialize, Serializer};
use std::fmt;

/// A single cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Heap bytes owned by this cell, on top of the inline `Value` itself
    fn heap_bytes(&self) -> usize {
        match self {
            Value::Str(s) => s.capacity(),
            _ => 0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(s) => f.write_str(s),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            Value::Float(_) => serializer.serialize_none(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Str(s) => serializer.serialize_str(s),
        }
    }
}

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int64,
    Float64,
    Bool,
    String,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int64 => write!(f, "int64"),
            ColumnType::Float64 => write!(f, "float64"),
            ColumnType::Bool => write!(f, "bool"),
            ColumnType::String => write!(f, "string"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub dtype: ColumnType,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

/// Shape, declared types and memory estimate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub columns: usize,
    pub dtypes: Vec<Column>,
    pub memory_bytes: usize,
}

/// Per-column profile computed over every row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub dtype: ColumnType,
    pub non_null: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

impl Dataset {
    /// Build a dataset; every row is padded or cut to the column count.
    pub fn new(columns: Vec<Column>, mut rows: Vec<Vec<Value>>) -> Self {
        let width = columns.len();
        for row in &mut rows {
            row.resize(width, Value::Null);
        }
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.row_count(), self.column_count())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First `n` rows
    pub fn head(&self, n: usize) -> &[Vec<Value>] {
        &self.rows[..n.min(self.rows.len())]
    }

    /// Estimated resident size: inline cell storage, string heap bytes and column names.
    pub fn memory_bytes(&self) -> usize {
        let cell = std::mem::size_of::<Value>();
        let names: usize = self
            .columns
            .iter()
            .map(|c| std::mem::size_of::<Column>() + c.name.capacity())
            .sum();
        let cells: usize = self
            .rows
            .iter()
            .map(|row| {
                std::mem::size_of::<Vec<Value>>()
                    + row.len() * cell
                    + row.iter().map(Value::heap_bytes).sum::<usize>()
            })
            .sum();
        names + cells
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            rows: self.row_count(),
            columns: self.column_count(),
            dtypes: self.columns.clone(),
            memory_bytes: self.memory_bytes(),
        }
    }

    pub fn profile(&self) -> Vec<ColumnProfile> {
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let cells = self.rows.iter().map(|row| &row[idx]);
                let non_null = cells.clone().filter(|v| !v.is_null()).count();
                let numeric: Vec<f64> = match column.dtype {
                    ColumnType::Int64 | ColumnType::Float64 => cells
                        .filter_map(Value::as_f64)
                        .filter(|v| v.is_finite())
                        .collect(),
                    _ => Vec::new(),
                };
                let (min, max, mean) = if numeric.is_empty() {
                    (None, None, None)
                } else {
                    let min = numeric.iter().cloned().fold(f64::INFINITY, f64::min);
                    let max = numeric.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    let mean = numeric.iter().sum::<f64>() / numeric.len() as f64;
                    (Some(min), Some(max), Some(mean))
                };
                ColumnProfile {
                    name: column.name.clone(),
                    dtype: column.dtype,
                    non_null,
                    min,
                    max,
                    mean,
                }
            })
            .collect()
    }

    /// Render the header plus at most `limit` rows as CSV.
    pub fn to_csv(&self, limit: usize) -> anyhow::Result<String> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(self.column_names())?;
        for row in self.head(limit) {
            wtr.write_record(row.iter().map(|v| v.to_string()))?;
        }
        let data = wtr.into_inner()?;
        Ok(String::from_utf8(data)?)
    }
}
