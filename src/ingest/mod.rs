//! Source ingestion: reading extracts and shaping them for the warehouse

pub mod catalog;
pub mod coerce;
pub mod reader;
pub mod schema;

pub use catalog::{
    metadata_columns, QualityCheck, SampleSpec, SourceKind, SourceSchema, LOAD_TIMESTAMP_COLUMN,
    SOURCE_FILE_COLUMN,
};
pub use coerce::{coerce_row, coerce_value, ColumnType, SqlValue};
pub use reader::{ColumnKind, RawTable, RawValue, SourceReader, NULL_MARKERS};
pub use schema::{
    clean_column_name, ColumnMap, ColumnRule, NormalizedLayout, SchemaNormalizer, TargetColumn,
};
