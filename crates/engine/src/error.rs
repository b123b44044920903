use compiler::CompileError;
use thiserror::Error;

/// Errors coming from the database layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Connection or pool failure.
    #[error("MySQL error: {0}")]
    MySql(#[from] mysql_async::Error),

    /// A statement failed. The SQL is kept for logging only.
    #[error("Query failed: {source}")]
    Query {
        sql: String,
        source: mysql_async::Error,
    },

    #[error("Failed to convert column `{column}`: {message}")]
    Conversion { column: String, message: String },

    #[error("No database is configured")]
    Unavailable,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Data selector {0} does not exist")]
    NotFound(i64),

    #[error("Failed to read stored selector: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to load stored selector: {0}")]
    Database(#[from] DbError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Missing required setting {0}")]
    Missing(String),
}

/// Everything a selector request can fail with.
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred while running the data selector";

impl SelectorError {
    /// HTTP-style status for the response.
    pub fn status_code(&self) -> u16 {
        match self {
            SelectorError::Compile(CompileError::MissingInclude(_)) => 404,
            SelectorError::Compile(_) => 400,
            SelectorError::Store(StoreError::NotFound(_)) => 404,
            SelectorError::Store(_) => 500,
            SelectorError::Database(_) => 500,
            SelectorError::Forbidden(_) => 403,
        }
    }

    /// Message safe to return to the caller. Server-side failures never
    /// expose SQL or driver details.
    pub fn public_message(&self) -> String {
        if self.status_code() >= 500 {
            INTERNAL_ERROR_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let invalid: SelectorError = CompileError::validation("main", "entity must not be empty").into();
        assert_eq!(invalid.status_code(), 400);
        assert_eq!(
            SelectorError::from(CompileError::CircularInclude(vec![1, 1])).status_code(),
            400
        );
        assert_eq!(
            SelectorError::from(CompileError::MissingInclude(3)).status_code(),
            404
        );
        assert_eq!(SelectorError::from(StoreError::NotFound(3)).status_code(), 404);
        assert_eq!(SelectorError::Forbidden("login required".into()).status_code(), 403);
    }

    #[test]
    fn test_database_errors_are_not_exposed() {
        let err = SelectorError::Database(DbError::Conversion {
            column: "main.price".into(),
            message: "bad decimal".into(),
        });
        assert_eq!(err.status_code(), 500);
        assert!(!err.public_message().contains("main.price"));

        let invalid: SelectorError = CompileError::validation("main.fields[0]", "field key must not be empty").into();
        assert_eq!(
            invalid.public_message(),
            "Invalid selector at main.fields[0]: field key must not be empty"
        );
    }
}
