//! Per-source load flow from the extract file to the verification summary

use crate::config::Config;
use crate::error::Result;
use crate::ingest::{SchemaNormalizer, SourceKind, SourceReader};
use crate::load::reporter::{LoadReporter, VerificationSummary};
use crate::load::writer::{LoadMetadata, LoadReport, WarehouseWriter};
use crate::warehouse::{InsertStatement, Warehouse};
use serde::Serialize;
use tracing::info;

/// Everything produced by loading one source
#[derive(Debug, Clone, Serialize)]
pub struct SourceLoadOutcome {
    pub kind: SourceKind,
    pub report: LoadReport,
    pub verification: VerificationSummary,
}

/// Read, normalize, write and verify one source.
///
/// The file is read and its columns checked before the table is touched, so
/// a source error leaves the previous contents in place.
pub async fn load_source(
    kind: SourceKind,
    config: &Config,
    warehouse: &dyn Warehouse,
) -> Result<SourceLoadOutcome> {
    let schema = kind.schema();
    let file = config.sources.file_config(kind);
    let path = config.sources.path_for(kind);

    info!(source = %kind, system = schema.system, path = %path.display(), "Reading source file");
    let table = SourceReader::new().read_path(&path)?;
    info!(
        source = %kind,
        rows = table.n_rows(),
        columns = table.n_columns(),
        "Source file loaded"
    );

    let layout = SchemaNormalizer::new(&schema).normalize(&table)?;
    let statement = InsertStatement::new(schema.table, &layout.columns);
    let metadata = LoadMetadata::now(file.file_name.clone());

    let report = WarehouseWriter::new(warehouse, file.commit_every)
        .load(&table.rows, &layout, &statement, &metadata)
        .await?;

    let verification = LoadReporter::new(warehouse).verify(&schema, &report).await;

    Ok(SourceLoadOutcome {
        kind,
        report,
        verification,
    })
}

/// Load sources in order, stopping at the first fatal error
pub async fn load_sources(
    kinds: &[SourceKind],
    config: &Config,
    warehouse: &dyn Warehouse,
) -> Result<Vec<SourceLoadOutcome>> {
    let mut outcomes = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        outcomes.push(load_source(kind, config, warehouse).await?);
    }
    Ok(outcomes)
}
