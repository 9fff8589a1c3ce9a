// Dataset loading from uploaded CSV and Excel bytes

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::Timelike;
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Column, ColumnType, Dataset, Value};
use crate::types::{AppError, AppResult};

/// Extensions accepted by the upload controls, whichever format is selected
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "xls", "xlsx"];

/// The single format toggle applied to both uploads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Csv,
    Excel,
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileFormat::Csv => write!(f, "CSV"),
            FileFormat::Excel => write!(f, "Excel"),
        }
    }
}

/// Reject anything but `.csv`, `.xls` and `.xlsx` before any parsing happens.
pub fn check_extension(filename: &str) -> AppResult<()> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext {
        Some(ext) if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        Some(ext) => Err(AppError::Load(format!(
            "unsupported file type '.{}' (expected one of: {})",
            ext,
            SUPPORTED_EXTENSIONS.join(", ")
        ))),
        None => Err(AppError::Load(format!(
            "'{}' has no file extension (expected one of: {})",
            filename,
            SUPPORTED_EXTENSIONS.join(", ")
        ))),
    }
}

/// Parse uploaded bytes into a dataset using the selected format.
pub fn load(bytes: &[u8], format: FileFormat) -> AppResult<Dataset> {
    let dataset = match format {
        FileFormat::Csv => load_csv(bytes),
        FileFormat::Excel => load_excel(bytes),
    }?;
    debug!(
        format = %format,
        rows = dataset.row_count(),
        columns = dataset.column_count(),
        "Dataset loaded"
    );
    Ok(dataset)
}

fn load_csv(bytes: &[u8]) -> AppResult<Dataset> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| AppError::Load(format!("CSV error: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.is_empty() || (headers.len() == 1 && headers[0].is_empty()) {
        return Err(AppError::Load("No columns to parse from file".to_string()));
    }

    let mut raw_rows: Vec<Vec<Option<String>>> = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| AppError::Load(format!("CSV error: {}", e)))?;
        raw_rows.push(
            record
                .iter()
                .map(|field| {
                    let field = field.trim();
                    if field.is_empty() {
                        None
                    } else {
                        Some(field.to_string())
                    }
                })
                .collect(),
        );
    }

    let names = dedupe_headers(headers);
    let mut columns = Vec::with_capacity(names.len());
    let mut typed: Vec<Vec<Value>> = vec![Vec::with_capacity(names.len()); raw_rows.len()];

    for (col_idx, name) in names.into_iter().enumerate() {
        let cells: Vec<Option<&str>> = raw_rows
            .iter()
            .map(|row| row.get(col_idx).and_then(|c| c.as_deref()))
            .collect();
        let dtype = infer_text_column(&cells);
        for (row_idx, cell) in cells.iter().enumerate() {
            typed[row_idx].push(parse_text_cell(*cell, dtype));
        }
        columns.push(Column { name, dtype });
    }

    Ok(Dataset::new(columns, typed))
}

fn infer_text_column(cells: &[Option<&str>]) -> ColumnType {
    let present: Vec<&str> = cells.iter().flatten().copied().collect();
    if present.is_empty() {
        return ColumnType::Float64;
    }
    if present.iter().all(|c| c.parse::<i64>().is_ok()) {
        ColumnType::Int64
    } else if present.iter().all(|c| c.parse::<f64>().is_ok()) {
        ColumnType::Float64
    } else if present.iter().all(|c| parse_bool(c).is_some()) {
        ColumnType::Bool
    } else {
        ColumnType::String
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn parse_text_cell(cell: Option<&str>, dtype: ColumnType) -> Value {
    let Some(cell) = cell else {
        return Value::Null;
    };
    match dtype {
        ColumnType::Int64 => cell.parse().map(Value::Int).unwrap_or(Value::Null),
        ColumnType::Float64 => cell.parse().map(Value::Float).unwrap_or(Value::Null),
        ColumnType::Bool => parse_bool(cell).map(Value::Bool).unwrap_or(Value::Null),
        ColumnType::String => Value::Str(cell.to_string()),
    }
}

fn load_excel(bytes: &[u8]) -> AppResult<Dataset> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| AppError::Load(format!("Excel error: {}", e)))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::Load("Excel file has no worksheets".to_string()))?
        .map_err(|e| AppError::Load(format!("Excel error: {}", e)))?;

    let mut rows = range.rows();
    let header_row = rows
        .next()
        .ok_or_else(|| AppError::Load("No columns to parse from file".to_string()))?;

    let headers: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(idx, cell)| match cell {
            Data::Empty => format!("column_{}", idx + 1),
            other => other.to_string().trim().to_string(),
        })
        .collect();
    let body: Vec<&[Data]> = rows.collect();

    let names = dedupe_headers(headers);
    let mut columns = Vec::with_capacity(names.len());
    let mut typed: Vec<Vec<Value>> = vec![Vec::with_capacity(names.len()); body.len()];

    for (col_idx, name) in names.into_iter().enumerate() {
        let cells: Vec<Value> = body
            .iter()
            .map(|row| row.get(col_idx).map(excel_cell).unwrap_or(Value::Null))
            .collect();
        let dtype = infer_value_column(&cells);
        for (row_idx, cell) in cells.into_iter().enumerate() {
            typed[row_idx].push(coerce(cell, dtype));
        }
        columns.push(Column { name, dtype });
    }

    Ok(Dataset::new(columns, typed))
}

fn excel_cell(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Int(v) => Value::Int(*v),
        Data::Float(v) => Value::Float(*v),
        Data::Bool(v) => Value::Bool(*v),
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::Str(s.clone()),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ts) if ts.hour() == 0 && ts.minute() == 0 && ts.second() == 0 => {
                Value::Str(ts.format("%Y-%m-%d").to_string())
            }
            Some(ts) => Value::Str(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
            None => Value::Str(dt.to_string()),
        },
        // ISO dates and durations keep their rendered form
        other => Value::Str(other.to_string()),
    }
}

fn infer_value_column(cells: &[Value]) -> ColumnType {
    let mut has_float = false;
    let mut has_int = false;
    let mut has_bool = false;
    let mut any = false;
    for cell in cells {
        match cell {
            Value::Null => continue,
            Value::Str(_) => return ColumnType::String,
            Value::Int(_) => has_int = true,
            Value::Float(v) => {
                // whole floats past i64 range stay floats
                if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
                    has_int = true;
                } else {
                    has_float = true;
                }
            }
            Value::Bool(_) => has_bool = true,
        }
        any = true;
    }
    if !any {
        return ColumnType::Float64;
    }
    match (has_int || has_float, has_bool) {
        (true, true) => ColumnType::String,
        (false, true) => ColumnType::Bool,
        _ if has_float => ColumnType::Float64,
        _ => ColumnType::Int64,
    }
}

fn coerce(cell: Value, dtype: ColumnType) -> Value {
    match (dtype, cell) {
        (_, Value::Null) => Value::Null,
        (ColumnType::Int64, Value::Float(v)) => Value::Int(v as i64),
        (ColumnType::Float64, Value::Int(v)) => Value::Float(v as f64),
        (ColumnType::String, Value::Str(s)) => Value::Str(s),
        (ColumnType::String, other) => Value::Str(other.to_string()),
        (_, other) => other,
    }
}

/// Repeated names get `.1`, `.2`, ... suffixes in order of appearance.
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut names = Vec::with_capacity(headers.len());
    for (idx, header) in headers.into_iter().enumerate() {
        let base = if header.is_empty() {
            format!("column_{}", idx + 1)
        } else {
            header
        };
        let mut name = base.clone();
        while let Some(count) = seen.get_mut(&name) {
            *count += 1;
            name = format!("{}.{}", base, count);
        }
        seen.insert(name.clone(), 0);
        names.push(name);
    }
    names
}
