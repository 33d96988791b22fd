//! Error types for the sync engine.

use crate::{
    condenser::RejectReason, conflict::ConflictRecord, push::PushStatus, remote::RemoteError,
    ConflictId, ItemId, SequenceId, TableName,
};
use thiserror::Error;

/// Failures reported by a [`DataSource`](crate::DataSource) implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("invalid table name: {0}")]
    InvalidTable(String),

    #[error("corrupt row in {table}: {message}")]
    CorruptRow { table: TableName, message: String },
}

impl StoreError {
    /// Shorthand for a backend failure.
    pub fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend(message.into())
    }
}

/// All possible errors from the sync engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Caller errors, returned before anything is written
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("operation on {table}/{item_id} rejected: {reason}")]
    DuplicateOperation {
        table: TableName,
        item_id: ItemId,
        reason: RejectReason,
    },

    #[error("a pending operation already exists for {table}/{item_id}")]
    DuplicatePendingOperation { table: TableName, item_id: ItemId },

    #[error("operation not found: {0}")]
    OperationNotFound(SequenceId),

    #[error("conflict not found: {0}")]
    ConflictNotFound(ConflictId),

    // Collaborator errors
    #[error("local store error: {0}")]
    Store(#[from] StoreError),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("serialization error: {0}")]
    Serialization(String),

    // Sync errors
    #[error("push {status}: {} unresolved conflict(s)", conflicts.len())]
    PushFailed {
        status: PushStatus,
        conflicts: Vec<ConflictRecord>,
    },

    #[error("{count} pending operation(s) exist for table {table}")]
    PendingOperationsExist { table: TableName, count: usize },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
