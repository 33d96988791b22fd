//! OperationStore - the durable queue of pending operations.
//!
//! Operations live in one ordered map keyed by sequence id. Every change is
//! written through to the data source's operation table before the in-memory
//! copy is touched, so a failed write leaves the queue as it was.

use crate::{
    datasource::DataSource,
    error::Result,
    settings::{load_sequence, save_sequence},
    query::Query,
    Error, ItemId, OperationRecord, OperationState, SequenceId,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Ordered arena of queued operations.
pub struct OperationStore {
    source: Arc<dyn DataSource>,
    operations: BTreeMap<SequenceId, OperationRecord>,
    next_sequence: SequenceId,
}

impl std::fmt::Debug for OperationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationStore")
            .field("operations", &self.operations)
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

impl OperationStore {
    /// Load the queue from the data source.
    ///
    /// Lock state is not persisted: every loaded operation is pending.
    pub async fn load(source: Arc<dyn DataSource>) -> Result<Self> {
        let table = source.operation_table_name().to_string();
        let rows = source.read_query(&Query::table(&table)).await?;

        let mut operations = BTreeMap::new();
        for row in &rows.items {
            let mut op = OperationRecord::from_row(row)?;
            op.state = OperationState::Pending;
            operations.insert(op.sequence_id, op);
        }

        let after_last = operations.keys().next_back().map_or(0, |seq| seq + 1);
        let persisted = load_sequence(source.as_ref()).await?.unwrap_or(0);
        let next_sequence = after_last.max(persisted);

        debug!(
            count = operations.len(),
            next_sequence, "loaded operation queue"
        );

        Ok(Self {
            source,
            operations,
            next_sequence,
        })
    }

    /// Sequence id the next appended operation must use.
    pub fn next_sequence_id(&self) -> SequenceId {
        self.next_sequence
    }

    /// Append a new operation.
    ///
    /// Fails if a pending operation already exists for the same item: callers
    /// must run the condenser first.
    pub async fn append(&mut self, record: OperationRecord) -> Result<()> {
        if record.sequence_id < self.next_sequence {
            return Err(Error::Validation(format!(
                "sequence id {} is behind the queue (next is {})",
                record.sequence_id, self.next_sequence
            )));
        }
        if self
            .operations_for(&record.table, Some(&record.item_id))
            .iter()
            .any(|op| op.is_pending())
        {
            return Err(Error::DuplicatePendingOperation {
                table: record.table.clone(),
                item_id: record.item_id.clone(),
            });
        }

        let next = record.sequence_id + 1;
        self.write(&record).await?;
        save_sequence(self.source.as_ref(), next).await?;

        debug!(
            sequence_id = record.sequence_id,
            table = %record.table,
            item_id = %record.item_id,
            operation = %record.operation_type,
            "queued operation"
        );
        self.next_sequence = next;
        self.operations.insert(record.sequence_id, record);
        Ok(())
    }

    /// Replace the type and item of a queued operation.
    pub async fn update(&mut self, record: OperationRecord) -> Result<()> {
        let existing = self
            .operations
            .get(&record.sequence_id)
            .ok_or(Error::OperationNotFound(record.sequence_id))?;
        let mut updated = record;
        updated.state = existing.state;
        updated.created_at = existing.created_at;

        self.write(&updated).await?;
        self.operations.insert(updated.sequence_id, updated);
        Ok(())
    }

    /// Remove an operation, returning it.
    pub async fn remove(&mut self, sequence_id: SequenceId) -> Result<OperationRecord> {
        if !self.operations.contains_key(&sequence_id) {
            return Err(Error::OperationNotFound(sequence_id));
        }
        self.source
            .delete_rows(
                self.source.operation_table_name(),
                &[sequence_id.to_string()],
            )
            .await?;
        self.operations
            .remove(&sequence_id)
            .ok_or(Error::OperationNotFound(sequence_id))
    }

    /// Remove every operation of `table`, optionally only those for `ids`.
    pub async fn remove_for_table(&mut self, table: &str, ids: Option<&[ItemId]>) -> Result<usize> {
        let doomed: Vec<SequenceId> = self
            .operations
            .values()
            .filter(|op| op.table == table)
            .filter(|op| ids.map_or(true, |ids| ids.contains(&op.item_id)))
            .map(|op| op.sequence_id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let row_ids: Vec<String> = doomed.iter().map(|seq| seq.to_string()).collect();
        self.source
            .delete_rows(self.source.operation_table_name(), &row_ids)
            .await?;
        for seq in &doomed {
            self.operations.remove(seq);
        }
        Ok(doomed.len())
    }

    /// Mark an operation as in flight. Returns false if it is absent or
    /// already locked.
    pub fn lock(&mut self, sequence_id: SequenceId) -> bool {
        match self.operations.get_mut(&sequence_id) {
            Some(op) if op.is_pending() => {
                op.state = OperationState::Locked;
                true
            }
            _ => false,
        }
    }

    /// Return a locked operation to the pending state.
    pub fn unlock(&mut self, sequence_id: SequenceId) -> Result<()> {
        let op = self
            .operations
            .get_mut(&sequence_id)
            .ok_or(Error::OperationNotFound(sequence_id))?;
        op.state = OperationState::Pending;
        Ok(())
    }

    /// The pending operation with the lowest sequence id.
    pub fn peek(&self) -> Option<&OperationRecord> {
        self.operations.values().find(|op| op.is_pending())
    }

    /// The pending operation with the lowest sequence id above `sequence_id`.
    pub fn next_after(&self, sequence_id: SequenceId) -> Option<&OperationRecord> {
        self.operations
            .range(sequence_id.saturating_add(1)..)
            .map(|(_, op)| op)
            .find(|op| op.is_pending())
    }

    pub fn get(&self, sequence_id: SequenceId) -> Option<&OperationRecord> {
        self.operations.get(&sequence_id)
    }

    /// Every queued operation of `table`, optionally for one item, in
    /// sequence order.
    pub fn operations_for(&self, table: &str, item_id: Option<&str>) -> Vec<&OperationRecord> {
        self.operations
            .values()
            .filter(|op| op.table == table)
            .filter(|op| item_id.map_or(true, |id| op.item_id == id))
            .collect()
    }

    /// The most recently queued operation for an item.
    pub fn latest_for(&self, table: &str, item_id: &str) -> Option<&OperationRecord> {
        self.operations
            .values()
            .rev()
            .find(|op| op.table == table && op.item_id == item_id)
    }

    /// All queued operations in sequence order.
    pub fn all(&self) -> impl Iterator<Item = &OperationRecord> {
        self.operations.values()
    }

    /// Number of queued operations.
    pub fn count(&self) -> usize {
        self.operations.len()
    }

    pub fn count_for_table(&self, table: &str) -> usize {
        self.operations.values().filter(|op| op.table == table).count()
    }

    async fn write(&self, record: &OperationRecord) -> Result<()> {
        let mut persisted = record.clone();
        persisted.state = OperationState::Pending;
        self.source
            .upsert_rows(self.source.operation_table_name(), vec![persisted.to_row()?])
            .await?;
        Ok(())
    }
}
