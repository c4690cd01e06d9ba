//! Delimited source reader
//!
//! Parses a CSV extract into a [`RawTable`]. The reader only infers scalar
//! types and detects nulls; renaming and coercion to the warehouse schema
//! happen later in the pipeline.

use crate::error::{AppError, Result};
use csv::ReaderBuilder;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Field contents treated as null, matching the markers common spreadsheet
/// and dataframe exports write for missing values.
pub const NULL_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// A single parsed field. Numeric variants keep the trimmed source text so a
/// text column stores exactly what the file held.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Integer(i64, String),
    Float(f64, String),
    Text(String),
}

impl RawValue {
    /// Parse a field, inferring the narrowest scalar type
    pub fn parse(field: &str) -> Self {
        let trimmed = field.trim();
        if NULL_MARKERS.contains(&trimmed) {
            return RawValue::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return RawValue::Integer(i, trimmed.to_string());
        }
        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => RawValue::Float(f, trimmed.to_string()),
            _ => RawValue::Text(field.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Integer(i, _) => Some(*i as f64),
            RawValue::Float(f, _) => Some(*f),
            _ => None,
        }
    }

    /// Field contents as read; `None` for null
    pub fn source_text(&self) -> Option<&str> {
        match self {
            RawValue::Null => None,
            RawValue::Integer(_, text) | RawValue::Float(_, text) | RawValue::Text(text) => {
                Some(text)
            }
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source_text().unwrap_or("NULL"))
    }
}

/// Column-level type inferred from all non-null fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
    /// Every field was null
    Empty,
}

impl ColumnKind {
    fn widen(self, value: &RawValue) -> Self {
        match (self, value) {
            (kind, RawValue::Null) => kind,
            (ColumnKind::Text, _) | (_, RawValue::Text(_)) => ColumnKind::Text,
            (ColumnKind::Float, _) | (_, RawValue::Float(..)) => ColumnKind::Float,
            _ => ColumnKind::Integer,
        }
    }
}

/// Parsed contents of one extract
#[derive(Debug, Clone)]
pub struct RawTable {
    /// Column names as written in the header row
    pub headers: Vec<String>,
    /// Data rows; short rows are padded with nulls, long rows are kept as-is
    pub rows: Vec<Vec<RawValue>>,
    /// Inferred kind per header column
    pub kinds: Vec<ColumnKind>,
}

impl RawTable {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_columns(&self) -> usize {
        self.headers.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Whether every field of the column is null
    pub fn is_all_null(&self, column: usize) -> bool {
        self.kinds.get(column) == Some(&ColumnKind::Empty)
    }
}

/// CSV reader producing [`RawTable`]s
#[derive(Debug, Clone, Default)]
pub struct SourceReader;

impl SourceReader {
    pub fn new() -> Self {
        Self
    }

    /// Read a file from disk; any failure is a fatal source error
    pub fn read_path(&self, path: &Path) -> Result<RawTable> {
        let origin = path.display().to_string();
        let file = File::open(path).map_err(|e| AppError::source_error(&origin, e.to_string()))?;
        self.read_from(file, &origin)
    }

    /// Read from any byte stream; `origin` labels errors
    pub fn read_from<R: Read>(&self, input: R, origin: &str) -> Result<RawTable> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| AppError::source_error(origin, format!("unreadable header: {}", e)))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
            return Err(AppError::source_error(origin, "file has no header row"));
        }

        let mut kinds = vec![ColumnKind::Empty; headers.len()];
        let mut rows = Vec::new();

        for record in reader.records() {
            let record = record.map_err(|e| AppError::source_error(origin, e.to_string()))?;
            let mut row: Vec<RawValue> = record.iter().map(RawValue::parse).collect();
            if row.len() < headers.len() {
                row.resize(headers.len(), RawValue::Null);
            }
            for (kind, value) in kinds.iter_mut().zip(row.iter()) {
                *kind = kind.widen(value);
            }
            rows.push(row);
        }

        debug!(
            origin = origin,
            rows = rows.len(),
            columns = headers.len(),
            "Source file parsed"
        );

        Ok(RawTable {
            headers,
            rows,
            kinds,
        })
    }
}
