//! Claims warehouse: loads three insurance claim extracts into PostgreSQL
//! raw tables and trains a claim-severity classifier on the analytic view.

pub mod config;
pub mod error;
pub mod ingest;
pub mod load;
pub mod ml;
pub mod warehouse;

pub use config::Config;
pub use error::{AppError, Result};
