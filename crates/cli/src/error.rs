use engine::{
    SelectorError,
    error::{ConfigError, DbError},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Settings(#[from] ConfigError),

    #[error("Failed to read the selector file: {0}")]
    SelectorFileRead(#[from] std::io::Error),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Invalid variable `{0}` (expected NAME=VALUE)")]
    InvalidVariable(String),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Data selector finished with status {0}")]
    Status(u16),
}
