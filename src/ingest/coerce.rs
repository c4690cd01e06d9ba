//! Coercion of raw fields into warehouse column types

use crate::error::{AppError, Result};
use crate::ingest::reader::RawValue;
use crate::ingest::schema::TargetColumn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a warehouse column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Timestamp,
}

impl ColumnType {
    /// SQL type used to bind parameters of this column
    pub fn sql_cast(&self) -> &'static str {
        match self {
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
            ColumnType::Timestamp => "TIMESTAMPTZ",
        }
    }
}

/// A value ready to be bound into an insert statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the value can be stored in a column of the given type
    pub fn fits(&self, ty: ColumnType) -> bool {
        matches!(
            (self, ty),
            (SqlValue::Null, _)
                | (SqlValue::Integer(_), ColumnType::Integer)
                | (SqlValue::Integer(_), ColumnType::Float)
                | (SqlValue::Float(_), ColumnType::Float)
                | (SqlValue::Text(_), ColumnType::Text)
                | (SqlValue::Timestamp(_), ColumnType::Timestamp)
        )
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Text(s) => write!(f, "{}", s),
            SqlValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

/// Coerce one field. Nulls stay null for every type.
pub fn coerce_value(value: &RawValue, ty: ColumnType) -> std::result::Result<SqlValue, String> {
    match (value, ty) {
        (RawValue::Null, _) => Ok(SqlValue::Null),

        (RawValue::Integer(i, _), ColumnType::Integer) => Ok(SqlValue::Integer(*i)),
        (RawValue::Float(f, _), ColumnType::Integer) => {
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                Ok(SqlValue::Integer(*f as i64))
            } else {
                Err(format!("invalid integer value: {}", f))
            }
        }

        (RawValue::Integer(i, _), ColumnType::Float) => Ok(SqlValue::Float(*i as f64)),
        (RawValue::Float(f, _), ColumnType::Float) => Ok(SqlValue::Float(*f)),

        // Text columns store the field as written, never a re-printed number
        (RawValue::Integer(_, text) | RawValue::Float(_, text), ColumnType::Text) => {
            Ok(SqlValue::Text(text.clone()))
        }
        (RawValue::Text(s), ColumnType::Text) => Ok(SqlValue::Text(s.clone())),

        (RawValue::Text(s), ColumnType::Timestamp) => DateTime::parse_from_rfc3339(s.trim())
            .map(|ts| SqlValue::Timestamp(ts.with_timezone(&Utc)))
            .map_err(|e| format!("invalid timestamp '{}': {}", s, e)),

        (RawValue::Text(s), expected) => Err(format!(
            "invalid {} value: '{}'",
            expected.sql_cast().to_lowercase(),
            s
        )),

        (other, ColumnType::Timestamp) => Err(format!("invalid timestamp value: {}", other)),
    }
}

/// Coerce a projected row against its target columns
pub fn coerce_row(row: &[RawValue], columns: &[TargetColumn]) -> Result<Vec<SqlValue>> {
    if row.len() != columns.len() {
        return Err(AppError::Coercion(format!(
            "expected {} fields, found {}",
            columns.len(),
            row.len()
        )));
    }

    row.iter()
        .zip(columns)
        .map(|(value, column)| {
            coerce_value(value, column.ty)
                .map_err(|e| AppError::Coercion(format!("column {}: {}", column.name, e)))
        })
        .collect()
}
