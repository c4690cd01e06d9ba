//! Post-load verification summaries

use crate::ingest::{QualityCheck, SourceSchema, SqlValue};
use crate::load::writer::{LoadReport, RowFailure};
use crate::warehouse::{FlagStats, Warehouse};
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Number of row errors repeated in the summary
pub const REPORTED_ERRORS: usize = 5;

/// Post-load diagnostics for one table
#[derive(Debug, Clone, Serialize)]
pub struct VerificationSummary {
    pub table: String,
    pub rows_inserted: usize,
    pub rows_failed: usize,
    /// Row count after the load, if the query succeeded
    pub row_count: Option<u64>,
    pub sample_columns: Vec<String>,
    pub sample: Vec<Vec<SqlValue>>,
    pub first_errors: Vec<RowFailure>,
    pub claim_stats: Option<FlagStats>,
    /// Queries that failed; diagnostic only
    pub issues: Vec<String>,
}

/// Runs read-only checks after a load. Failures here never fail the load.
pub struct LoadReporter<'a> {
    warehouse: &'a dyn Warehouse,
}

impl<'a> LoadReporter<'a> {
    pub fn new(warehouse: &'a dyn Warehouse) -> Self {
        Self { warehouse }
    }

    pub async fn verify(&self, schema: &SourceSchema, report: &LoadReport) -> VerificationSummary {
        let mut summary = VerificationSummary {
            table: schema.table.to_string(),
            rows_inserted: report.rows_inserted,
            rows_failed: report.rows_failed(),
            row_count: None,
            sample_columns: schema.sample.columns.iter().map(|c| c.to_string()).collect(),
            sample: Vec::new(),
            first_errors: report.failures.iter().take(REPORTED_ERRORS).cloned().collect(),
            claim_stats: None,
            issues: Vec::new(),
        };

        match self.warehouse.count_rows(schema.table).await {
            Ok(count) => summary.row_count = Some(count),
            Err(e) => summary.issue("row count", e),
        }

        match self.warehouse.sample_rows(schema.table, &schema.sample).await {
            Ok(rows) => summary.sample = rows,
            Err(e) => summary.issue("sample", e),
        }

        if let Some(QualityCheck::ClaimRate { flag_column }) = schema.quality {
            match self.warehouse.flag_stats(schema.table, flag_column).await {
                Ok(stats) => summary.claim_stats = Some(stats),
                Err(e) => summary.issue("claim rate", e),
            }
        }

        summary
    }
}

impl VerificationSummary {
    fn issue(&mut self, check: &str, error: impl fmt::Display) {
        warn!(table = %self.table, check = check, error = %error, "Verification query failed");
        self.issues.push(format!("{}: {}", check, error));
    }

    /// Post-load count agrees with the rows the writer inserted
    pub fn count_matches(&self) -> bool {
        self.row_count == Some(self.rows_inserted as u64)
    }
}

impl fmt::Display for VerificationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "   ✓ Successfully inserted {} records", self.rows_inserted)?;
        if self.rows_failed > 0 {
            writeln!(f, "   ⚠ {} records failed", self.rows_failed)?;
            for failure in &self.first_errors {
                writeln!(f, "     - row {}: {}", failure.row_index, failure.message)?;
            }
        }

        if let Some(count) = self.row_count {
            writeln!(f, "   ✓ Table now contains {} records", count)?;
        }

        if !self.sample.is_empty() {
            writeln!(f)?;
            writeln!(f, "   Sample data:")?;
            writeln!(f, "   {}", self.sample_columns.join(" | "))?;
            for row in &self.sample {
                let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                writeln!(f, "   {}", cells.join(" | "))?;
            }
        }

        if let Some(stats) = self.claim_stats {
            writeln!(f)?;
            writeln!(f, "   Data quality statistics:")?;
            writeln!(f, "   Total records: {}", stats.total)?;
            writeln!(f, "   Total claims: {}", stats.flagged)?;
            writeln!(f, "   Claim rate: {:.1}%", stats.rate_pct())?;
        }

        for issue in &self.issues {
            writeln!(f, "   ⚠ verification skipped ({})", issue)?;
        }
        Ok(())
    }
}
