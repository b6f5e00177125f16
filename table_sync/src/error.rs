//! Error types for table_sync

use thiserror::Error;

/// Result type for table_sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for table_sync
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Schema analysis error: {0}")]
    SchemaAnalysisError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    /// The database rejected a statement we built.
    #[error("Error executing '{sql}': {source}")]
    Query {
        sql: String,
        #[source]
        source: Box<Error>,
    },

    /// A value could not be decoded from or rendered for the database.
    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl Error {
    /// Attach the statement text to an error raised while running it.
    pub fn with_sql(self, sql: &str) -> Self {
        match self {
            Error::Query { .. } => self,
            other => Error::Query {
                sql: sql.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// True if the error came back from the database rather than from
    /// building the statement.
    pub fn is_database_error(&self) -> bool {
        match self {
            Error::DatabaseError(_) | Error::SqlxError(_) => true,
            Error::Query { source, .. } => source.is_database_error(),
            _ => false,
        }
    }
}

/// Convert Serde JSON errors to table_sync errors
impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

/// Convert YAML errors to table_sync errors
impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}

/// Convert TOML deserialization errors to table_sync errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_keeps_sql() {
        let err = Error::DatabaseError("relation does not exist".into()).with_sql("SELECT 1");
        match &err {
            Error::Query { sql, .. } => assert_eq!(sql, "SELECT 1"),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.is_database_error());
        assert!(err.to_string().contains("SELECT 1"));
    }

    #[test]
    fn test_conversion_is_not_database_error() {
        let err = Error::Conversion("bad blob".into()).with_sql("INSERT ...");
        assert!(!err.is_database_error());
    }
}
