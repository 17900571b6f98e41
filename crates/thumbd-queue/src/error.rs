//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Table {0} does not exist")]
    SchemaMissing(String),

    #[error("Table {table} is missing columns: {}", columns.join(", "))]
    ColumnsMissing { table: String, columns: Vec<String> },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn schema_missing(table: impl Into<String>) -> Self {
        Self::SchemaMissing(table.into())
    }
}
