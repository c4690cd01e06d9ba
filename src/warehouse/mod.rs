//! Storage seam shared by the loaders and the modeling path, with the
//! in-memory and PostgreSQL backends behind it.

pub mod factory;
pub mod memory;
pub mod postgres;

pub use factory::{create_in_memory_warehouse, create_warehouse};
pub use memory::InMemoryWarehouse;
pub use postgres::PostgresWarehouse;

use crate::error::Result;
use crate::ingest::{metadata_columns, ColumnType, SampleSpec, SqlValue, TargetColumn};
use crate::ml::ClaimFact;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

/// Declared server type per column name, as reported by the catalog
pub type ServerTypes = HashMap<String, String>;

/// Storage operations used by the loaders and the modeling path.
///
/// Implementations hold one session. Inserts are buffered in an open
/// transaction until `commit`; a rejected row must not disturb rows already
/// inserted in that transaction.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Remove every row of a table; takes effect immediately
    async fn truncate(&self, table: &str) -> Result<()>;

    /// Insert one row. A refusal scoped to the row is `AppError::RowRejected`.
    async fn insert(&self, statement: &InsertStatement, values: &[SqlValue]) -> Result<()>;

    /// Make all rows inserted since the last commit durable
    async fn commit(&self) -> Result<()>;

    /// Row count as seen by this session
    async fn count_rows(&self, table: &str) -> Result<u64>;

    /// First rows of a table projected onto the sample columns
    async fn sample_rows(&self, table: &str, spec: &SampleSpec) -> Result<Vec<Vec<SqlValue>>>;

    /// Row count and sum of a 0/1 flag column
    async fn flag_stats(&self, table: &str, flag_column: &str) -> Result<FlagStats>;

    /// Rows of the claims fact view that are in modeling scope
    async fn fetch_claim_facts(&self) -> Result<Vec<ClaimFact>>;

    /// Release the session
    async fn close(&self) -> Result<()>;
}

/// Column layout of an insert: data columns then the two metadata columns
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<TargetColumn>,
}

impl InsertStatement {
    pub fn new(table: impl Into<String>, data_columns: &[TargetColumn]) -> Self {
        let mut columns = data_columns.to_vec();
        columns.extend(metadata_columns());
        Self {
            table: table.into(),
            columns,
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Parameterized SQL; every placeholder carries an explicit cast so the
    /// server converts to the real column type on assignment
    pub fn sql(&self) -> String {
        self.sql_for(&ServerTypes::new())
    }

    /// Parameterized SQL against the table's declared column types.
    ///
    /// A parameter whose bound type differs from the column's declared type
    /// is cast a second time to that type, so conversion happens per row at
    /// execute time (`$1::TEXT::date`) instead of failing the prepare.
    pub fn sql_for(&self, server_types: &ServerTypes) -> String {
        let names: Vec<String> = self.columns.iter().map(|c| quote_ident(&c.name)).collect();
        let params: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| placeholder(i + 1, c, server_types.get(&c.name).map(String::as_str)))
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            names.join(", "),
            params.join(", ")
        )
    }
}

fn placeholder(position: usize, column: &TargetColumn, server_type: Option<&str>) -> String {
    let bound = format!("${}::{}", position, column.ty.sql_cast());
    match server_type {
        Some(declared) if !binds_natively(column.ty, declared) => {
            format!("{}::{}", bound, declared)
        }
        _ => bound,
    }
}

/// Whether a declared type accepts the bound parameter without a second cast.
/// Fixed-length character targets stay single-cast: an explicit cast to an
/// unsized `character` would cut the value to one char.
fn binds_natively(ty: ColumnType, declared: &str) -> bool {
    match ty {
        ColumnType::Integer => declared == "bigint",
        ColumnType::Float => declared == "double precision",
        ColumnType::Text => matches!(declared, "text" | "character varying" | "character"),
        ColumnType::Timestamp => declared == "timestamp with time zone",
    }
}

/// Double-quote an identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Totals for a 0/1 flag column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FlagStats {
    pub total: u64,
    pub flagged: u64,
}

impl FlagStats {
    /// Percentage of flagged rows
    pub fn rate_pct(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.flagged as f64 / self.total as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_sql_casts_every_parameter() {
        let stmt = InsertStatement::new(
            "insurance_raw.customer_b_claims",
            &[
                TargetColumn::new("case_number", ColumnType::Integer),
                TargetColumn::new("loss_amount", ColumnType::Float),
            ],
        );
        assert_eq!(
            stmt.sql(),
            "INSERT INTO insurance_raw.customer_b_claims \
             (\"case_number\", \"loss_amount\", \"load_timestamp\", \"source_file\") \
             VALUES ($1::BIGINT, $2::DOUBLE PRECISION, $3::TIMESTAMPTZ, $4::TEXT)"
        );
    }

    #[test]
    fn test_insert_sql_converts_to_declared_types() {
        let stmt = InsertStatement::new(
            "insurance_raw.customer_a_claims",
            &[
                TargetColumn::new("policy_bind_date", ColumnType::Text),
                TargetColumn::new("policy_number", ColumnType::Integer),
                TargetColumn::new("policy_annual_premium", ColumnType::Float),
                TargetColumn::new("police_report_available", ColumnType::Text),
                TargetColumn::new("insured_occupation", ColumnType::Text),
            ],
        );
        let server_types: ServerTypes = [
            ("policy_bind_date", "date"),
            ("policy_number", "bigint"),
            ("policy_annual_premium", "numeric"),
            ("police_report_available", "boolean"),
            ("insured_occupation", "character varying"),
            ("load_timestamp", "timestamp with time zone"),
            ("source_file", "text"),
        ]
        .into_iter()
        .map(|(name, ty)| (name.to_string(), ty.to_string()))
        .collect();

        assert_eq!(
            stmt.sql_for(&server_types),
            "INSERT INTO insurance_raw.customer_a_claims \
             (\"policy_bind_date\", \"policy_number\", \"policy_annual_premium\", \
             \"police_report_available\", \"insured_occupation\", \"load_timestamp\", \
             \"source_file\") \
             VALUES ($1::TEXT::date, $2::BIGINT, $3::DOUBLE PRECISION::numeric, \
             $4::TEXT::boolean, $5::TEXT, $6::TIMESTAMPTZ, $7::TEXT)"
        );
    }

    #[test]
    fn test_unknown_columns_keep_single_cast() {
        let stmt = InsertStatement::new(
            "insurance_raw.customer_b_claims",
            &[TargetColumn::new("case_number", ColumnType::Integer)],
        );
        let server_types: ServerTypes =
            [("case_number".to_string(), "integer".to_string())].into_iter().collect();

        let sql = stmt.sql_for(&server_types);
        assert!(sql.contains("$1::BIGINT::integer"));
        assert!(sql.contains("$2::TIMESTAMPTZ, $3::TEXT)"));
        assert_eq!(stmt.sql_for(&ServerTypes::new()), stmt.sql());
    }

    #[test]
    fn test_flag_rate() {
        let stats = FlagStats {
            total: 8,
            flagged: 2,
        };
        assert_eq!(stats.rate_pct(), 25.0);
        assert_eq!(FlagStats::default().rate_pct(), 0.0);
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
