//! Error types for the SQLite data source.

use tablesync_engine::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid table name: {0:?}")]
    InvalidTable(String),

    #[error("row {id} in {table} is not a JSON object: {message}")]
    CorruptRow {
        table: String,
        id: String,
        message: String,
    },

    #[error("row in {0} has no string id")]
    MissingId(String),
}

impl From<Error> for StoreError {
    fn from(err: Error) -> Self {
        match err {
            Error::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                StoreError::Backend(e.to_string())
            }
            Error::InvalidTable(table) => StoreError::InvalidTable(table),
            Error::CorruptRow { table, id, message } => StoreError::CorruptRow {
                table,
                message: format!("row {id}: {message}"),
            },
            Error::MissingId(table) => StoreError::CorruptRow {
                table,
                message: "row has no string id".into(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
