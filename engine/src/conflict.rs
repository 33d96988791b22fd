//! Push conflicts awaiting resolution.
//!
//! When the server refuses an operation, the operation leaves the queue and a
//! [`ConflictRecord`] takes its place in the conflict log until the app
//! resolves it.

use crate::{
    datasource::DataSource,
    error::Result,
    query::Query,
    remote::RemoteError,
    ConflictId, Error, Item, ItemId, OperationRecord, OperationType, SequenceId, TableName,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Where a push failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictKind {
    /// The server's version did not match
    PreconditionFailed,
    /// Any other 4xx response
    ClientError,
    /// 5xx response
    ServerError,
    /// Refused by the sync delegate before sending
    Rejected,
}

/// A failed push attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub id: ConflictId,
    /// Sequence id of the operation that failed
    pub sequence_id: SequenceId,
    pub table: TableName,
    pub item_id: ItemId,
    pub operation_type: OperationType,
    /// What the client tried to send
    pub client_item: Item,
    /// The server's copy, for precondition failures
    pub server_item: Option<Item>,
    pub status: Option<u16>,
    pub kind: ConflictKind,
    pub message: String,
    #[serde(default)]
    pub handled: bool,
    pub created_at: DateTime<Utc>,
}

impl ConflictRecord {
    fn new(operation: &OperationRecord, kind: ConflictKind, status: Option<u16>, message: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sequence_id: operation.sequence_id,
            table: operation.table.clone(),
            item_id: operation.item_id.clone(),
            operation_type: operation.operation_type,
            client_item: operation.item.clone(),
            server_item: None,
            status,
            kind,
            message,
            handled: false,
            created_at: Utc::now(),
        }
    }

    /// Record a server refusal. Returns `None` for errors that are not
    /// conflicts (transient and auth failures).
    pub fn from_remote(operation: &OperationRecord, err: &RemoteError) -> Option<Self> {
        let status = err.status();
        let record = match err {
            RemoteError::Transient(_) | RemoteError::Unauthorized(_) => return None,
            RemoteError::PreconditionFailed {
                server_item,
                message,
            } => {
                let mut record = Self::new(
                    operation,
                    ConflictKind::PreconditionFailed,
                    status,
                    message.clone(),
                );
                record.server_item = server_item.clone();
                record
            }
            RemoteError::Client { message, .. } => {
                Self::new(operation, ConflictKind::ClientError, status, message.clone())
            }
            RemoteError::Server { message, .. } => {
                Self::new(operation, ConflictKind::ServerError, status, message.clone())
            }
        };
        Some(record)
    }

    /// Record a refusal by the sync delegate.
    pub fn rejected(operation: &OperationRecord, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::new(operation, ConflictKind::Rejected, status, message.into())
    }

    pub fn to_row(&self) -> Result<Item> {
        match serde_json::to_value(self)? {
            Value::Object(row) => Ok(row),
            other => Err(Error::Serialization(format!(
                "conflict serialized to non-object: {other}"
            ))),
        }
    }

    pub fn from_row(row: &Item) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(row.clone()))?)
    }
}

/// Persisted conflicts, ordered by the failed operation's sequence id.
pub struct ConflictLog {
    source: Arc<dyn DataSource>,
    records: Vec<ConflictRecord>,
}

impl ConflictLog {
    pub async fn load(source: Arc<dyn DataSource>) -> Result<Self> {
        let table = source.conflict_table_name().to_string();
        let rows = source.read_query(&Query::table(&table)).await?;
        let mut records = rows
            .items
            .iter()
            .map(ConflictRecord::from_row)
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|c| (c.sequence_id, c.created_at));
        debug!(count = records.len(), "loaded conflict log");
        Ok(Self { source, records })
    }

    pub async fn add(&mut self, record: ConflictRecord) -> Result<()> {
        self.write(&record).await?;
        let at = self
            .records
            .partition_point(|c| c.sequence_id <= record.sequence_id);
        self.records.insert(at, record);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ConflictRecord> {
        self.records.iter().find(|c| c.id == id)
    }

    pub fn list(&self) -> &[ConflictRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub async fn mark_handled(&mut self, id: &str) -> Result<()> {
        let record = self
            .records
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::ConflictNotFound(id.to_string()))?;
        let mut updated = record.clone();
        updated.handled = true;
        self.source
            .upsert_rows(self.source.conflict_table_name(), vec![updated.to_row()?])
            .await?;
        record.handled = true;
        Ok(())
    }

    pub async fn remove(&mut self, id: &str) -> Result<ConflictRecord> {
        let at = self
            .records
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| Error::ConflictNotFound(id.to_string()))?;
        self.source
            .delete_rows(self.source.conflict_table_name(), &[id.to_string()])
            .await?;
        Ok(self.records.remove(at))
    }

    /// Drop conflicts of `table`, optionally only those for `ids`.
    pub async fn remove_for_table(&mut self, table: &str, ids: Option<&[ItemId]>) -> Result<usize> {
        let doomed: Vec<ConflictId> = self
            .records
            .iter()
            .filter(|c| c.table == table)
            .filter(|c| ids.map_or(true, |ids| ids.contains(&c.item_id)))
            .map(|c| c.id.clone())
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        self.source
            .delete_rows(self.source.conflict_table_name(), &doomed)
            .await?;
        self.records.retain(|c| !doomed.contains(&c.id));
        Ok(doomed.len())
    }

    /// Conflicts of `table` nobody has looked at yet.
    pub fn unhandled_for_table(&self, table: &str) -> usize {
        self.records
            .iter()
            .filter(|c| c.table == table && !c.handled)
            .count()
    }

    async fn write(&self, record: &ConflictRecord) -> Result<()> {
        self.source
            .upsert_rows(self.source.conflict_table_name(), vec![record.to_row()?])
            .await?;
        Ok(())
    }
}
