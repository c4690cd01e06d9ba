use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Input file missing, unreadable or structurally unusable
    #[error("Source error ({path}): {message}")]
    Source { path: String, message: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Warehouse unreachable or credentials rejected
    #[error("Connection error: {0}")]
    Connection(String),

    /// Statement-level warehouse failures that are not tied to a single row
    #[error("Database error: {0}")]
    Database(String),

    /// A single record failed type coercion
    #[error("Coercion error: {0}")]
    Coercion(String),

    /// A single record was refused by the warehouse
    #[error("Row rejected: {0}")]
    RowRejected(String),

    /// Model training or scoring failures
    #[error("Model error: {0}")]
    Model(String),
}

impl AppError {
    pub fn source_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Source {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Row-level failures are recorded by the loader and never abort a run
    pub fn is_row_level(&self) -> bool {
        matches!(self, AppError::Coercion(_) | AppError::RowRejected(_))
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::Source { .. } => "SOURCE_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Coercion(_) => "COERCION_ERROR",
            AppError::RowRejected(_) => "ROW_REJECTED",
            AppError::Model(_) => "MODEL_ERROR",
        }
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Server-reported failures (constraint, type, syntax) carry an SQLSTATE and
/// are scoped to the statement; everything else means the session is gone.
impl From<tokio_postgres::Error> for AppError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db) => AppError::Database(format!("{} ({})", db.message(), db.code().code())),
            None => AppError::Connection(err.to_string()),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::source_error("a.csv", "missing").error_code(),
            "SOURCE_ERROR"
        );
        assert_eq!(
            AppError::Connection("refused".to_string()).error_code(),
            "CONNECTION_ERROR"
        );
        assert_eq!(AppError::Model("x".to_string()).error_code(), "MODEL_ERROR");
    }

    #[test]
    fn test_row_level_classification() {
        assert!(AppError::Coercion("bad int".to_string()).is_row_level());
        assert!(AppError::RowRejected("not null".to_string()).is_row_level());
        assert!(!AppError::Connection("closed".to_string()).is_row_level());
        assert!(!AppError::Database("no relation".to_string()).is_row_level());
    }

    #[test]
    fn test_source_error_display() {
        let err = AppError::source_error("/data/AutoBi.csv", "No such file or directory");
        assert_eq!(
            err.to_string(),
            "Source error (/data/AutoBi.csv): No such file or directory"
        );
    }
}
