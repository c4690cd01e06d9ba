//! Schema normalization: source headers to warehouse columns

use crate::error::{AppError, Result};
use crate::ingest::catalog::SourceSchema;
use crate::ingest::coerce::ColumnType;
use crate::ingest::reader::{RawTable, RawValue};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// A named, typed warehouse column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetColumn {
    pub name: String,
    pub ty: ColumnType,
}

impl TargetColumn {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Source header → target column entry of a fixed mapping table
#[derive(Debug, Clone, Copy)]
pub struct ColumnMap {
    pub source: &'static str,
    pub target: &'static str,
    pub ty: ColumnType,
}

impl ColumnMap {
    pub const fn new(source: &'static str, target: &'static str, ty: ColumnType) -> Self {
        Self { source, target, ty }
    }
}

/// How a source's headers become target columns
#[derive(Debug, Clone, Copy)]
pub enum ColumnRule {
    /// Fixed rename table; target order is the table order
    Mapped(&'static [ColumnMap]),
    /// Generic cleanup of every header; known columns carry a type, the rest
    /// pass through as text
    Cleaned {
        known: &'static [(&'static str, ColumnType)],
    },
}

/// Lowercase and replace dashes and spaces with underscores
pub fn clean_column_name(col: &str) -> String {
    col.trim().to_lowercase().replace('-', "_").replace(' ', "_")
}

/// Result of normalizing a header row
#[derive(Debug, Clone)]
pub struct NormalizedLayout {
    /// Target columns in insert order
    pub columns: Vec<TargetColumn>,
    /// Raw header names that were not carried into the target
    pub dropped: Vec<String>,
    source_indices: Vec<usize>,
    source_width: usize,
}

impl NormalizedLayout {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Reorder one raw row into target order. A row whose width differs from
    /// the header row cannot be aligned and is refused.
    pub fn project(&self, row: &[RawValue]) -> std::result::Result<Vec<RawValue>, String> {
        if row.len() != self.source_width {
            return Err(format!(
                "expected {} fields, found {}",
                self.source_width,
                row.len()
            ));
        }
        Ok(self
            .source_indices
            .iter()
            .map(|&idx| row[idx].clone())
            .collect())
    }
}

/// Applies a source's column rule to a parsed table
pub struct SchemaNormalizer<'a> {
    schema: &'a SourceSchema,
}

impl<'a> SchemaNormalizer<'a> {
    pub fn new(schema: &'a SourceSchema) -> Self {
        Self { schema }
    }

    pub fn normalize(&self, table: &RawTable) -> Result<NormalizedLayout> {
        let layout = match self.schema.rule {
            ColumnRule::Mapped(mapping) => self.apply_mapping(table, mapping)?,
            ColumnRule::Cleaned { known } => self.apply_cleanup(table, known)?,
        };

        let present: HashSet<&str> = layout.columns.iter().map(|c| c.name.as_str()).collect();
        let missing: Vec<&str> = self
            .schema
            .required
            .iter()
            .copied()
            .filter(|name| !present.contains(name))
            .collect();
        if !missing.is_empty() {
            return Err(AppError::source_error(
                self.schema.file_hint,
                format!("missing required columns: {}", missing.join(", ")),
            ));
        }

        if !layout.dropped.is_empty() {
            warn!(
                table = self.schema.table,
                dropped = ?layout.dropped,
                "Source columns not carried into the warehouse"
            );
        }
        debug!(
            table = self.schema.table,
            columns = layout.columns.len(),
            "Column names standardized"
        );

        Ok(layout)
    }

    fn apply_mapping(&self, table: &RawTable, mapping: &[ColumnMap]) -> Result<NormalizedLayout> {
        let mut columns = Vec::with_capacity(mapping.len());
        let mut source_indices = Vec::with_capacity(mapping.len());

        for entry in mapping {
            // Already-normalized headers are accepted too
            let idx = table
                .column_index(entry.source)
                .or_else(|| table.column_index(entry.target));
            if let Some(idx) = idx {
                columns.push(TargetColumn::new(entry.target, entry.ty));
                source_indices.push(idx);
            }
        }

        let dropped = table
            .headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| !source_indices.contains(idx))
            .map(|(_, h)| h.clone())
            .collect();

        Ok(NormalizedLayout {
            columns,
            dropped,
            source_indices,
            source_width: table.n_columns(),
        })
    }

    fn apply_cleanup(
        &self,
        table: &RawTable,
        known: &[(&'static str, ColumnType)],
    ) -> Result<NormalizedLayout> {
        let mut columns = Vec::new();
        let mut source_indices = Vec::new();
        let mut dropped = Vec::new();
        let mut seen = HashSet::new();

        for (idx, header) in table.headers.iter().enumerate() {
            let name = clean_column_name(header);
            if self.schema.dropped.contains(&name.as_str()) {
                if !table.is_all_null(idx) {
                    warn!(column = %name, "Dropping artifact column that carries data");
                }
                dropped.push(header.clone());
                continue;
            }
            if !seen.insert(name.clone()) {
                return Err(AppError::source_error(
                    self.schema.file_hint,
                    format!("duplicate column after cleanup: {}", name),
                ));
            }
            let ty = known
                .iter()
                .find(|(known_name, _)| *known_name == name)
                .map(|(_, ty)| *ty)
                .unwrap_or(ColumnType::Text);
            columns.push(TargetColumn::new(name, ty));
            source_indices.push(idx);
        }

        Ok(NormalizedLayout {
            columns,
            dropped,
            source_indices,
            source_width: table.n_columns(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::catalog::SourceKind;
    use crate::ingest::reader::SourceReader;

    fn table(csv: &str) -> RawTable {
        SourceReader::new().read_from(csv.as_bytes(), "inline").unwrap()
    }

    #[test]
    fn test_clean_column_name() {
        assert_eq!(clean_column_name("capital-gains"), "capital_gains");
        assert_eq!(clean_column_name("Policy Number"), "policy_number");
        assert_eq!(clean_column_name("_c39"), "_c39");
    }

    #[test]
    fn test_mapping_renames_in_table_order() {
        let schema = SourceKind::CustomerB.schema();
        let t = table(
            "LOSS,Index,CASENUM,ATTORNEY,CLMSEX,MARITAL,CLMINSUR,SEATBELT,CLMAGE,EXTRA\n\
             1.5,1,5,1,1,2,2,1,50,x\n",
        );

        let layout = SchemaNormalizer::new(&schema).normalize(&t).unwrap();
        assert_eq!(layout.columns[0].name, "index_id");
        assert_eq!(layout.columns[8].name, "loss_amount");
        assert_eq!(layout.dropped, vec!["EXTRA".to_string()]);

        let projected = layout.project(&t.rows[0]).unwrap();
        assert_eq!(projected[0], RawValue::Integer(1, "1".to_string()));
        assert_eq!(projected[8], RawValue::Float(1.5, "1.5".to_string()));
    }

    #[test]
    fn test_mapping_missing_required_column_fails_fast() {
        let schema = SourceKind::CustomerB.schema();
        let t = table("Index,CASENUM\n1,2\n");
        let err = SchemaNormalizer::new(&schema).normalize(&t).unwrap_err();
        assert_eq!(err.error_code(), "SOURCE_ERROR");
        assert!(err.to_string().contains("loss_amount"));
    }

    #[test]
    fn test_cleanup_drops_artifact_and_types_known_columns() {
        let schema = SourceKind::CustomerA.schema();
        let t = table(
            "policy_number,age,incident_type,total_claim_amount,capital-gains,hobby note,_c39\n\
             521585,48,Single Vehicle Collision,71610,53300,chess,\n",
        );

        let layout = SchemaNormalizer::new(&schema).normalize(&t).unwrap();
        assert_eq!(
            layout.column_names(),
            vec![
                "policy_number",
                "age",
                "incident_type",
                "total_claim_amount",
                "capital_gains",
                "hobby_note"
            ]
        );
        assert_eq!(layout.columns[1].ty, ColumnType::Integer);
        assert_eq!(layout.columns[5].ty, ColumnType::Text);
        assert_eq!(layout.dropped, vec!["_c39".to_string()]);
    }

    #[test]
    fn test_cleanup_rejects_duplicate_names() {
        let schema = SourceKind::CustomerA.schema();
        let t = table("policy_number,age,Age,incident_type,total_claim_amount\n1,2,3,x,4\n");
        assert!(SchemaNormalizer::new(&schema).normalize(&t).is_err());
    }

    #[test]
    fn test_project_refuses_misaligned_rows() {
        let schema = SourceKind::CustomerA.schema();
        let t = table("policy_number,age,incident_type,total_claim_amount\n1,2,x,4,99\n");
        let layout = SchemaNormalizer::new(&schema).normalize(&t).unwrap();
        assert!(layout.project(&t.rows[0]).is_err());
    }
}
