//! Row-by-row writing of one normalized extract into its raw table

use crate::error::{AppError, Result};
use crate::ingest::{coerce_row, NormalizedLayout, RawValue, SqlValue};
use crate::warehouse::{InsertStatement, Warehouse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Values stamped onto every row of one load
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadMetadata {
    pub load_timestamp: DateTime<Utc>,
    pub source_file: String,
}

impl LoadMetadata {
    pub fn now(source_file: impl Into<String>) -> Self {
        Self {
            load_timestamp: Utc::now(),
            source_file: source_file.into(),
        }
    }

    fn values(&self) -> [SqlValue; 2] {
        [
            SqlValue::Timestamp(self.load_timestamp),
            SqlValue::Text(self.source_file.clone()),
        ]
    }
}

/// A skipped row; `row_index` is the 0-based data row position in the file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowFailure {
    pub row_index: usize,
    pub message: String,
}

/// Outcome of one full-replace load
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub source_file: String,
    pub rows_read: usize,
    pub rows_inserted: usize,
    /// Failures in row order
    pub failures: Vec<RowFailure>,
    pub commits: usize,
}

impl LoadReport {
    pub fn rows_failed(&self) -> usize {
        self.failures.len()
    }
}

/// Truncates a table and inserts rows one by one with periodic commits
pub struct WarehouseWriter<'a> {
    warehouse: &'a dyn Warehouse,
    commit_every: usize,
}

impl<'a> WarehouseWriter<'a> {
    pub fn new(warehouse: &'a dyn Warehouse, commit_every: usize) -> Self {
        Self {
            warehouse,
            commit_every: commit_every.max(1),
        }
    }

    /// Replace the contents of `statement.table` with `rows`.
    ///
    /// Coercion failures and rows refused by the warehouse are recorded and
    /// skipped. Any other error aborts the load; batches committed before the
    /// error stay in the table.
    pub async fn load(
        &self,
        rows: &[Vec<RawValue>],
        layout: &NormalizedLayout,
        statement: &InsertStatement,
        metadata: &LoadMetadata,
    ) -> Result<LoadReport> {
        let table = statement.table.as_str();

        self.warehouse.truncate(table).await?;
        info!(table = table, "Truncated table for full reload");

        let mut report = LoadReport {
            table: table.to_string(),
            source_file: metadata.source_file.clone(),
            rows_read: rows.len(),
            rows_inserted: 0,
            failures: Vec::new(),
            commits: 0,
        };

        for (row_index, row) in rows.iter().enumerate() {
            match self.insert_row(row, layout, statement, metadata).await {
                Ok(()) => report.rows_inserted += 1,
                Err(e) if e.is_row_level() => {
                    debug!(table = table, row_index, error = %e, "Row skipped");
                    report.failures.push(RowFailure {
                        row_index,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        table = table,
                        row_index,
                        inserted = report.rows_inserted,
                        error = %e,
                        "Load aborted"
                    );
                    return Err(e);
                }
            }

            let attempted = row_index + 1;
            if attempted % self.commit_every == 0 {
                self.warehouse.commit().await?;
                report.commits += 1;
                debug!(table = table, attempted, "Batch committed");
            }
        }

        self.warehouse.commit().await?;
        report.commits += 1;

        info!(
            table = table,
            rows_read = report.rows_read,
            rows_inserted = report.rows_inserted,
            rows_failed = report.rows_failed(),
            "Load finished"
        );
        Ok(report)
    }

    async fn insert_row(
        &self,
        row: &[RawValue],
        layout: &NormalizedLayout,
        statement: &InsertStatement,
        metadata: &LoadMetadata,
    ) -> Result<()> {
        let projected = layout.project(row).map_err(AppError::Coercion)?;
        let mut values = coerce_row(&projected, &layout.columns)?;
        values.extend(metadata.values());
        self.warehouse.insert(statement, &values).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{ColumnType, SchemaNormalizer, SourceKind, SourceReader, TargetColumn};
    use crate::warehouse::InMemoryWarehouse;

    const AUTOBI: &str = "\
Index,CASENUM,ATTORNEY,CLMSEX,MARITAL,CLMINSUR,SEATBELT,CLMAGE,LOSS
1,5,1,1,2,2,1,50,34.94
2,13,2,2,2,1,1,18,0.891
3,66,2,1,2,2,1,5,0.33
4,71,1,1,1,2,1,31,0.037
5,96,2,1,4,2,1,30,0.038
";

    async fn load_autobi(
        warehouse: &InMemoryWarehouse,
        csv: &str,
        commit_every: usize,
    ) -> Result<LoadReport> {
        let schema = SourceKind::CustomerB.schema();
        let table = SourceReader::new().read_from(csv.as_bytes(), "AutoBi.csv")?;
        let layout = SchemaNormalizer::new(&schema).normalize(&table)?;
        let statement = InsertStatement::new(schema.table, &layout.columns);
        WarehouseWriter::new(warehouse, commit_every)
            .load(&table.rows, &layout, &statement, &LoadMetadata::now("AutoBi.csv"))
            .await
    }

    #[tokio::test]
    async fn test_commits_follow_cadence() {
        let warehouse = InMemoryWarehouse::with_source_tables();
        let report = load_autobi(&warehouse, AUTOBI, 2).await.unwrap();

        assert_eq!(report.rows_read, 5);
        assert_eq!(report.rows_inserted, 5);
        // After rows 2 and 4, then the final commit
        assert_eq!(report.commits, 3);
        assert_eq!(
            warehouse
                .committed_rows("insurance_raw.customer_b_claims")
                .unwrap()
                .len(),
            5
        );
    }

    #[tokio::test]
    async fn test_bad_rows_are_recorded_in_order() {
        let csv = AUTOBI
            .replace("2,13,2,2,2,1,1,18,0.891", "2,13,2,2,2,1,1,eighteen,0.891")
            .replace("4,71,1,1,1,2,1,31,0.037", "4.5,71,1,1,1,2,1,31,0.037");
        let warehouse = InMemoryWarehouse::with_source_tables();
        let report = load_autobi(&warehouse, &csv, 100).await.unwrap();

        assert_eq!(report.rows_inserted, 3);
        assert_eq!(report.rows_failed(), 2);
        assert_eq!(report.failures[0].row_index, 1);
        assert!(report.failures[0].message.contains("claimant_age"));
        assert_eq!(report.failures[1].row_index, 3);
        assert_eq!(report.rows_inserted + report.rows_failed(), report.rows_read);
    }

    #[tokio::test]
    async fn test_metadata_trails_every_row() {
        let warehouse = InMemoryWarehouse::with_source_tables();
        load_autobi(&warehouse, AUTOBI, 100).await.unwrap();

        let rows = warehouse
            .committed_rows("insurance_raw.customer_b_claims")
            .unwrap();
        let last = rows[0].len() - 1;
        assert!(matches!(rows[0][last - 1], SqlValue::Timestamp(_)));
        assert_eq!(rows[0][last], SqlValue::Text("AutoBi.csv".to_string()));
    }

    #[tokio::test]
    async fn test_missing_table_aborts() {
        let warehouse = InMemoryWarehouse::new();
        let err = load_autobi(&warehouse, AUTOBI, 100).await.unwrap_err();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }

    #[tokio::test]
    async fn test_statement_mismatch_aborts_instead_of_skipping() {
        let warehouse = InMemoryWarehouse::new();
        warehouse.create_table(
            "insurance_raw.customer_b_claims",
            vec![TargetColumn::new("something_else", ColumnType::Text)],
        );
        let err = load_autobi(&warehouse, AUTOBI, 100).await.unwrap_err();
        assert!(!err.is_row_level());
    }
}
