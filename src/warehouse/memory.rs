//! In-memory backend for tests and dry runs

use crate::error::{AppError, Result};
use crate::ingest::{SampleSpec, SourceKind, SqlValue, TargetColumn};
use crate::ml::ClaimFact;
use crate::warehouse::{FlagStats, InsertStatement, Warehouse};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<TargetColumn>,
    committed: Vec<Vec<SqlValue>>,
    pending: Vec<Vec<SqlValue>>,
}

impl MemoryTable {
    fn visible_rows(&self) -> impl Iterator<Item = &Vec<SqlValue>> {
        self.committed.iter().chain(self.pending.iter())
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| AppError::Database(format!("column \"{}\" does not exist", name)))
    }
}

/// In-memory warehouse (for tests and dry runs)
#[derive(Clone, Default)]
pub struct InMemoryWarehouse {
    tables: Arc<DashMap<String, MemoryTable>>,
    claim_facts: Arc<RwLock<Vec<ClaimFact>>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warehouse with the three raw tables created from the source catalog
    pub fn with_source_tables() -> Self {
        let warehouse = Self::new();
        for kind in SourceKind::all() {
            let schema = kind.schema();
            warehouse.create_table(schema.table, schema.declared_table_columns());
        }
        warehouse
    }

    /// Create or replace a table
    pub fn create_table(&self, table: &str, columns: Vec<TargetColumn>) {
        self.tables.insert(
            table.to_string(),
            MemoryTable {
                columns,
                ..Default::default()
            },
        );
    }

    /// Replace the contents of the claims fact view
    pub async fn set_claim_facts(&self, facts: Vec<ClaimFact>) {
        *self.claim_facts.write().await = facts;
    }

    /// Committed rows of a table
    pub fn committed_rows(&self, table: &str) -> Option<Vec<Vec<SqlValue>>> {
        self.tables.get(table).map(|t| t.committed.clone())
    }

    fn missing_table(table: &str) -> AppError {
        AppError::Database(format!("relation \"{}\" does not exist", table))
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn truncate(&self, table: &str) -> Result<()> {
        let mut entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Self::missing_table(table))?;
        entry.committed.clear();
        entry.pending.clear();
        tracing::debug!(table = table, "Table truncated");
        Ok(())
    }

    async fn insert(&self, statement: &InsertStatement, values: &[SqlValue]) -> Result<()> {
        let mut entry = self
            .tables
            .get_mut(&statement.table)
            .ok_or_else(|| Self::missing_table(&statement.table))?;

        let table_columns: Vec<&str> = entry.columns.iter().map(|c| c.name.as_str()).collect();
        if table_columns != statement.column_names() {
            return Err(AppError::Database(format!(
                "insert columns do not match table {}",
                statement.table
            )));
        }
        if values.len() != entry.columns.len() {
            return Err(AppError::RowRejected(format!(
                "INSERT has {} values for {} columns",
                values.len(),
                entry.columns.len()
            )));
        }
        if let Some((value, column)) = values
            .iter()
            .zip(entry.columns.iter())
            .find(|(value, column)| !value.fits(column.ty))
        {
            return Err(AppError::RowRejected(format!(
                "invalid input for column {}: {}",
                column.name, value
            )));
        }

        entry.pending.push(values.to_vec());
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        for mut entry in self.tables.iter_mut() {
            let pending = std::mem::take(&mut entry.pending);
            entry.committed.extend(pending);
        }
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let entry = self
            .tables
            .get(table)
            .ok_or_else(|| Self::missing_table(table))?;
        Ok(entry.visible_rows().count() as u64)
    }

    async fn sample_rows(&self, table: &str, spec: &SampleSpec) -> Result<Vec<Vec<SqlValue>>> {
        let entry = self
            .tables
            .get(table)
            .ok_or_else(|| Self::missing_table(table))?;
        let indices = spec
            .columns
            .iter()
            .map(|name| entry.column_index(name))
            .collect::<Result<Vec<usize>>>()?;
        let filter = spec.non_null.map(|name| entry.column_index(name)).transpose()?;

        Ok(entry
            .visible_rows()
            .filter(|row| filter.map_or(true, |idx| !row[idx].is_null()))
            .take(spec.limit)
            .map(|row| indices.iter().map(|&idx| row[idx].clone()).collect())
            .collect())
    }

    async fn flag_stats(&self, table: &str, flag_column: &str) -> Result<FlagStats> {
        let entry = self
            .tables
            .get(table)
            .ok_or_else(|| Self::missing_table(table))?;
        let idx = entry.column_index(flag_column)?;

        let mut stats = FlagStats::default();
        for row in entry.visible_rows() {
            stats.total += 1;
            if row[idx].as_f64() == Some(1.0) {
                stats.flagged += 1;
            }
        }
        Ok(stats)
    }

    async fn fetch_claim_facts(&self) -> Result<Vec<ClaimFact>> {
        Ok(self
            .claim_facts
            .read()
            .await
            .iter()
            .filter(|fact| fact.in_modeling_scope())
            .cloned()
            .collect())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
