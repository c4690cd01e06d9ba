//! Full-replace loading of the claim extracts into the raw tables

pub mod pipeline;
pub mod reporter;
pub mod writer;

pub use pipeline::{load_source, load_sources, SourceLoadOutcome};
pub use reporter::{LoadReporter, VerificationSummary, REPORTED_ERRORS};
pub use writer::{LoadMetadata, LoadReport, RowFailure, WarehouseWriter};
