//! The sync engine: local mutations in, queued operations out.

use crate::{
    condenser::{condense, CondenseAction, RejectReason},
    config::SyncConfig,
    conflict::{ConflictLog, ConflictRecord},
    datasource::DataSource,
    delegate::{DefaultDelegate, SyncDelegate},
    error::Result,
    item::{ensure_id, item_id, validate_id, version},
    pull::{PullExecutor, PullReport},
    purge::{PurgeExecutor, PurgeReport},
    push::{PushExecutor, PushReport},
    query::{Query, ReadResult},
    remote::RemoteTable,
    settings::SyncSettings,
    store::OperationStore,
    Error, Item, ItemId, OperationRecord, OperationType, SequenceId,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::Mutex;

type PushFlight = Shared<BoxFuture<'static, Result<PushReport>>>;

/// Queue change decided by the condenser for one mutation.
enum QueueWrite {
    Append,
    Replace(OperationRecord),
    Remove(SequenceId),
    Nothing,
}

/// Everything that must change together under the queue lock.
pub(crate) struct SyncState {
    pub(crate) operations: OperationStore,
    pub(crate) conflicts: ConflictLog,
    pub(crate) settings: SyncSettings,
}

pub(crate) struct Inner {
    pub(crate) state: Mutex<SyncState>,
    pub(crate) source: Arc<dyn DataSource>,
    pub(crate) remote: Arc<dyn RemoteTable>,
    pub(crate) delegate: Arc<dyn SyncDelegate>,
    pub(crate) config: SyncConfig,
    push_flight: StdMutex<Option<PushFlight>>,
}

/// Offline sync engine. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct SyncEngine {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Open an engine over `source`, loading the persisted queue, conflicts
    /// and settings.
    pub async fn open(
        source: Arc<dyn DataSource>,
        remote: Arc<dyn RemoteTable>,
        config: SyncConfig,
    ) -> Result<Self> {
        Self::open_with_delegate(source, remote, Arc::new(DefaultDelegate), config).await
    }

    pub async fn open_with_delegate(
        source: Arc<dyn DataSource>,
        remote: Arc<dyn RemoteTable>,
        delegate: Arc<dyn SyncDelegate>,
        config: SyncConfig,
    ) -> Result<Self> {
        if config.page_size == 0 {
            return Err(Error::Validation("page size must be positive".into()));
        }

        let operations = OperationStore::load(source.clone()).await?;
        let conflicts = ConflictLog::load(source.clone()).await?;
        let settings = SyncSettings::new(source.clone());

        tracing::info!(
            pending = operations.count(),
            conflicts = conflicts.len(),
            "sync engine opened"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SyncState {
                    operations,
                    conflicts,
                    settings,
                }),
                source,
                remote,
                delegate,
                config,
                push_flight: StdMutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    // ---- local mutations ----

    /// Record a local mutation: write it to the local store and queue it for
    /// the next push. Returns the item id.
    ///
    /// On `Error::Store` nothing was queued and the local row was put back as
    /// it was; the call can be retried as is.
    pub async fn enqueue(
        &self,
        table: &str,
        item: Item,
        operation_type: OperationType,
    ) -> Result<ItemId> {
        validate_table(table)?;
        let mut item = item;
        let id = match operation_type {
            OperationType::Insert => ensure_id(&mut item)?,
            OperationType::Update | OperationType::Delete => item_id(&item)
                .ok_or_else(|| {
                    Error::Validation(format!("{operation_type} requires an item with a string id"))
                })?
                .to_string(),
        };
        validate_id(&id)?;

        let mut state = self.inner.state.lock().await;
        self.queue_locked(&mut state, table, id, operation_type, item, true)
            .await
    }

    /// Queue an insert. Assigns a fresh id when the item has none and returns
    /// the item as stored.
    pub async fn enqueue_insert(&self, table: &str, item: Item) -> Result<Item> {
        let mut item = item;
        ensure_id(&mut item)?;
        self.enqueue(table, item.clone(), OperationType::Insert)
            .await?;
        Ok(item)
    }

    pub async fn enqueue_update(&self, table: &str, item: Item) -> Result<ItemId> {
        self.enqueue(table, item, OperationType::Update).await
    }

    pub async fn enqueue_delete(&self, table: &str, item: Item) -> Result<ItemId> {
        self.enqueue(table, item, OperationType::Delete).await
    }

    /// Condense and queue one mutation. The local write happens before the
    /// queue write and is undone if the queue write fails.
    async fn queue_locked(
        &self,
        state: &mut SyncState,
        table: &str,
        id: ItemId,
        operation_type: OperationType,
        mut item: Item,
        reject_existing_row: bool,
    ) -> Result<ItemId> {
        let existing = state.operations.latest_for(table, &id).cloned();
        let action = condense(operation_type, existing.as_ref());
        let first_for_item = existing.is_none();
        let write = match (action, existing) {
            (CondenseAction::Reject(reason), _) => {
                return Err(Error::DuplicateOperation {
                    table: table.to_string(),
                    item_id: id,
                    reason,
                })
            }
            (CondenseAction::AppendNew, _) | (_, None) => QueueWrite::Append,
            (CondenseAction::Keep, Some(_)) if operation_type == OperationType::Delete => {
                QueueWrite::Nothing
            }
            (CondenseAction::Keep, Some(queued)) => QueueWrite::Replace(queued),
            (CondenseAction::Remove, Some(queued)) => QueueWrite::Remove(queued.sequence_id),
            (CondenseAction::ConvertToDelete, Some(mut queued)) => {
                queued.operation_type = OperationType::Delete;
                QueueWrite::Replace(queued)
            }
        };

        let source = &self.inner.source;
        let previous = source.read_row(table, &id).await?;
        if reject_existing_row
            && operation_type == OperationType::Insert
            && first_for_item
            && previous.is_some()
        {
            return Err(Error::DuplicateOperation {
                table: table.to_string(),
                item_id: id,
                reason: RejectReason::DuplicateInsert,
            });
        }

        // Deletes carry the last known row so its version goes out as the
        // precondition.
        if operation_type == OperationType::Delete && version(&item).is_none() {
            if let Some(local) = &previous {
                item = local.clone();
            }
        }

        match operation_type {
            OperationType::Delete => source.delete_rows(table, std::slice::from_ref(&id)).await?,
            OperationType::Insert | OperationType::Update => {
                source.upsert_rows(table, vec![item.clone()]).await?
            }
        }

        let queued = match write {
            QueueWrite::Append => {
                let seq = state.operations.next_sequence_id();
                let record = OperationRecord::new(seq, table, id.clone(), operation_type, item);
                state.operations.append(record).await
            }
            QueueWrite::Replace(mut queued) => {
                queued.item = item;
                state.operations.update(queued).await
            }
            QueueWrite::Remove(seq) => state.operations.remove(seq).await.map(drop),
            QueueWrite::Nothing => Ok(()),
        };
        if let Err(err) = queued {
            self.restore_row(table, &id, previous).await;
            return Err(err);
        }

        tracing::debug!(%table, item_id = %id, operation = %operation_type, ?action, "local change recorded");
        Ok(id)
    }

    /// Put a local row back after a failed queue write.
    async fn restore_row(&self, table: &str, id: &str, previous: Option<Item>) {
        let source = &self.inner.source;
        let restored = match previous {
            Some(row) => source.upsert_rows(table, vec![row]).await,
            None => source.delete_rows(table, &[id.to_string()]).await,
        };
        if let Err(err) = restored {
            tracing::error!(%table, item_id = %id, error = %err, "could not restore local row");
        }
    }

    // ---- sync ----

    /// Send every queued operation to the remote table.
    ///
    /// Only one push runs at a time; concurrent callers share its result.
    pub async fn push(&self) -> Result<PushReport> {
        let flight = {
            let mut slot = self
                .inner
                .push_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(flight) => {
                    tracing::debug!("joining push in progress");
                    flight.clone()
                }
                None => {
                    let engine = self.clone();
                    let flight = async move {
                        let result = PushExecutor::new(engine.clone()).execute().await;
                        *engine
                            .inner
                            .push_flight
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner) = None;
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Pull `query` into the local store with the configured page size.
    ///
    /// With a `query_id` the pull is incremental: only items updated since
    /// the last pull under that id are fetched.
    pub async fn pull(&self, query: Query, query_id: Option<&str>) -> Result<PullReport> {
        self.pull_with_page_size(query, query_id, self.inner.config.page_size)
            .await
    }

    #[tracing::instrument(skip(self, query), fields(table = %query.table))]
    pub async fn pull_with_page_size(
        &self,
        query: Query,
        query_id: Option<&str>,
        page_size: usize,
    ) -> Result<PullReport> {
        PullExecutor::new(self, query, query_id.map(str::to_string), page_size)
            .execute()
            .await
    }

    /// Delete local rows of `table` matching `query` (all rows when `None`).
    ///
    /// Without `force`, fails if operations are queued for the affected
    /// items. With `force`, those operations and their conflicts are dropped
    /// along with every delta token of the table.
    #[tracing::instrument(skip(self, query))]
    pub async fn purge(
        &self,
        table: &str,
        query: Option<Query>,
        query_id: Option<&str>,
        force: bool,
    ) -> Result<PurgeReport> {
        PurgeExecutor::new(self, table, query, query_id, force)
            .execute()
            .await
    }

    pub async fn force_purge(&self, table: &str, query: Option<Query>) -> Result<PurgeReport> {
        self.purge(table, query, None, true).await
    }

    // ---- reads ----

    pub async fn read(&self, query: &Query) -> Result<ReadResult> {
        validate_table(&query.table)?;
        Ok(self.inner.source.read_query(query).await?)
    }

    pub async fn lookup(&self, table: &str, id: &str) -> Result<Option<Item>> {
        validate_table(table)?;
        Ok(self.inner.source.read_row(table, id).await?)
    }

    pub async fn pending_operations_count(&self) -> usize {
        self.inner.state.lock().await.operations.count()
    }

    /// Queued operations in push order, optionally for one table.
    pub async fn pending_operations(&self, table: Option<&str>) -> Vec<OperationRecord> {
        let state = self.inner.state.lock().await;
        state
            .operations
            .all()
            .filter(|op| table.map_or(true, |t| op.table == t))
            .cloned()
            .collect()
    }

    // ---- conflicts ----

    pub async fn conflicts(&self) -> Vec<ConflictRecord> {
        self.inner.state.lock().await.conflicts.list().to_vec()
    }

    pub async fn conflict(&self, id: &str) -> Option<ConflictRecord> {
        self.inner.state.lock().await.conflicts.get(id).cloned()
    }

    /// Acknowledge a conflict without resolving it. Handled conflicts no
    /// longer fail a push.
    pub async fn mark_conflict_handled(&self, id: &str) -> Result<()> {
        self.inner.state.lock().await.conflicts.mark_handled(id).await
    }

    /// Resolve a conflict by writing `item` to the local store. Nothing is
    /// queued.
    pub async fn resolve_updating_item(&self, id: &str, item: Item) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let conflict = find_conflict(&state, id)?;
        check_item_matches(&conflict, &item)?;

        self.inner
            .source
            .upsert_rows(&conflict.table, vec![item])
            .await?;
        state.conflicts.remove(id).await?;
        tracing::debug!(conflict_id = id, "conflict resolved with local update");
        Ok(())
    }

    /// Resolve a conflict by dropping the local row.
    pub async fn resolve_discarding(&self, id: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let conflict = find_conflict(&state, id)?;

        self.inner
            .source
            .delete_rows(&conflict.table, std::slice::from_ref(&conflict.item_id))
            .await?;
        state.conflicts.remove(id).await?;
        tracing::debug!(conflict_id = id, "conflict resolved by discarding item");
        Ok(())
    }

    /// Resolve a conflict by queueing the failed operation again with
    /// `item`, typically the server item merged with the local edit.
    pub async fn resolve_retrying(&self, id: &str, item: Item) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let conflict = find_conflict(&state, id)?;
        check_item_matches(&conflict, &item)?;

        self.queue_locked(
            &mut state,
            &conflict.table,
            conflict.item_id.clone(),
            conflict.operation_type,
            item,
            false,
        )
        .await?;
        state.conflicts.remove(id).await?;
        tracing::debug!(conflict_id = id, "conflict requeued");
        Ok(())
    }
}

fn validate_table(table: &str) -> Result<()> {
    if table.is_empty() {
        return Err(Error::Validation("table name must not be empty".into()));
    }
    Ok(())
}

fn find_conflict(state: &SyncState, id: &str) -> Result<ConflictRecord> {
    state
        .conflicts
        .get(id)
        .cloned()
        .ok_or_else(|| Error::ConflictNotFound(id.to_string()))
}

fn check_item_matches(conflict: &ConflictRecord, item: &Item) -> Result<()> {
    match item_id(item) {
        Some(id) if id == conflict.item_id => Ok(()),
        _ => Err(Error::Validation(format!(
            "resolution item must have id {}",
            conflict.item_id
        ))),
    }
}
