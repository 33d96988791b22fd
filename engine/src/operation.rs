//! Queued table operations.
//!
//! Local mutations are recorded as [`OperationRecord`]s and sent to the
//! remote table later, in sequence order.

use crate::{error::Result, Error, Item, ItemId, SequenceId, TableName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Insert => write!(f, "insert"),
            OperationType::Update => write!(f, "update"),
            OperationType::Delete => write!(f, "delete"),
        }
    }
}

/// Lifecycle state of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    /// Waiting to be pushed
    #[default]
    Pending,
    /// Currently being sent; not condensed or sent again
    Locked,
    /// Accepted by the server
    Completed,
    /// Rejected by the server; a conflict was recorded
    Errored,
}

/// One pending mutation against a remote table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    /// Push order
    pub sequence_id: SequenceId,
    /// Target table
    pub table: TableName,
    /// Target row
    pub item_id: ItemId,
    /// Kind of mutation
    pub operation_type: OperationType,
    /// Full payload to send. For deletes, the last known row.
    pub item: Item,
    /// Lifecycle state
    #[serde(default)]
    pub state: OperationState,
    /// When the operation was enqueued
    pub created_at: DateTime<Utc>,
}

impl OperationRecord {
    /// Create a new pending operation.
    pub fn new(
        sequence_id: SequenceId,
        table: impl Into<TableName>,
        item_id: impl Into<ItemId>,
        operation_type: OperationType,
        item: Item,
    ) -> Self {
        Self {
            sequence_id,
            table: table.into(),
            item_id: item_id.into(),
            operation_type,
            item,
            state: OperationState::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == OperationState::Pending
    }

    pub fn is_locked(&self) -> bool {
        self.state == OperationState::Locked
    }

    /// Row key in the operation table.
    pub fn row_id(&self) -> String {
        self.sequence_id.to_string()
    }

    /// Serialize into a row for the operation table.
    pub fn to_row(&self) -> Result<Item> {
        match serde_json::to_value(self)? {
            Value::Object(mut row) => {
                row.insert("id".to_string(), Value::String(self.row_id()));
                Ok(row)
            }
            other => Err(Error::Serialization(format!(
                "operation serialized to non-object: {other}"
            ))),
        }
    }

    /// Restore from an operation table row.
    pub fn from_row(row: &Item) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(row.clone()))?)
    }
}
