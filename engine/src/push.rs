//! Push: drain the operation queue to the remote table.
//!
//! Operations are sent one at a time in sequence order. The queue lock is
//! only held while picking an operation and while applying its result, never
//! across a network call, so the app can keep enqueueing during a push.

use crate::{
    conflict::ConflictRecord,
    delegate::DelegateError,
    engine::{SyncEngine, SyncState},
    error::Result,
    item::copy_version,
    remote::RemoteError,
    store::OperationStore,
    Error, Item, OperationRecord, OperationState, OperationType, SequenceId,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a push drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PushStatus {
    /// Every operation was attempted
    Complete,
    /// A network failure stopped the drain
    CancelledByNetworkError,
    /// The server refused our credentials
    CancelledByAuthenticationError,
    /// The sync delegate aborted the drain
    CancelledByDelegate,
    /// A result could not be written to the local store
    CancelledByStoreError,
}

impl fmt::Display for PushStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PushStatus::Complete => "complete",
            PushStatus::CancelledByNetworkError => "cancelled by network error",
            PushStatus::CancelledByAuthenticationError => "cancelled by authentication error",
            PushStatus::CancelledByDelegate => "cancelled by delegate",
            PushStatus::CancelledByStoreError => "cancelled by store error",
        };
        f.write_str(text)
    }
}

/// What one push drain did.
#[derive(Debug, Clone, PartialEq)]
pub struct PushReport {
    pub status: PushStatus,
    /// Operations accepted by the server, in the order they were sent
    pub completed: Vec<OperationRecord>,
    /// Conflicts recorded by this drain
    pub conflicts: Vec<ConflictRecord>,
}

impl PushReport {
    fn new() -> Self {
        Self {
            status: PushStatus::Complete,
            completed: Vec::new(),
            conflicts: Vec::new(),
        }
    }
}

/// Outcome of sending one operation.
enum Step {
    Continue,
    Stop(PushStatus),
}

pub(crate) struct PushExecutor {
    engine: SyncEngine,
}

impl PushExecutor {
    pub(crate) fn new(engine: SyncEngine) -> Self {
        Self { engine }
    }

    pub(crate) async fn execute(self) -> Result<PushReport> {
        let inner = &self.engine.inner;
        let mut report = PushReport::new();

        loop {
            let operation = {
                let mut state = inner.state.lock().await;
                match lock_next(&mut state.operations) {
                    Some(op) => op,
                    None => break,
                }
            };

            if let Step::Stop(status) = self.push_one(operation, &mut report).await {
                report.status = status;
                break;
            }
        }

        tracing::info!(
            status = %report.status,
            completed = report.completed.len(),
            conflicts = report.conflicts.len(),
            "push finished"
        );

        inner.delegate.on_push_complete(&self.engine, &report).await;

        let unhandled: Vec<ConflictRecord> = {
            let state = inner.state.lock().await;
            report
                .conflicts
                .iter()
                .filter_map(|c| state.conflicts.get(&c.id))
                .filter(|c| !c.handled)
                .cloned()
                .collect()
        };

        if report.status == PushStatus::Complete && unhandled.is_empty() {
            Ok(report)
        } else {
            Err(Error::PushFailed {
                status: report.status,
                conflicts: unhandled,
            })
        }
    }

    async fn push_one(&self, operation: OperationRecord, report: &mut PushReport) -> Step {
        let inner = &self.engine.inner;
        let seq = operation.sequence_id;

        let item = match inner
            .delegate
            .on_operation(&operation, operation.item.clone())
            .await
        {
            Ok(item) => item,
            Err(DelegateError::Abort(reason)) => {
                tracing::info!(sequence_id = seq, %reason, "delegate aborted push");
                self.unlock(seq).await;
                return Step::Stop(PushStatus::CancelledByDelegate);
            }
            Err(DelegateError::Reject { code, message }) => {
                tracing::debug!(sequence_id = seq, %message, "delegate rejected operation");
                let conflict = ConflictRecord::rejected(&operation, code, message);
                return self.record_conflict(seq, conflict, report).await;
            }
        };

        let mut outgoing = operation;
        outgoing.item = item;

        match inner.remote.send(&outgoing).await {
            Ok(server_item) => self.complete(outgoing, server_item, report).await,
            Err(RemoteError::Transient(reason)) => {
                tracing::warn!(sequence_id = seq, %reason, "network failure, stopping push");
                self.unlock(seq).await;
                Step::Stop(PushStatus::CancelledByNetworkError)
            }
            Err(RemoteError::Unauthorized(reason)) => {
                tracing::warn!(sequence_id = seq, %reason, "unauthorized, stopping push");
                self.unlock(seq).await;
                Step::Stop(PushStatus::CancelledByAuthenticationError)
            }
            Err(err) => match ConflictRecord::from_remote(&outgoing, &err) {
                Some(conflict) => {
                    tracing::debug!(sequence_id = seq, error = %err, "operation refused");
                    self.record_conflict(seq, conflict, report).await
                }
                None => {
                    self.unlock(seq).await;
                    Step::Stop(PushStatus::CancelledByNetworkError)
                }
            },
        }
    }

    /// Apply a server acceptance to the local store and drop the operation.
    async fn complete(
        &self,
        operation: OperationRecord,
        server_item: Option<Item>,
        report: &mut PushReport,
    ) -> Step {
        let inner = &self.engine.inner;
        let seq = operation.sequence_id;
        let mut state = inner.state.lock().await;

        // Force-purged while in flight.
        if state.operations.get(seq).is_none() {
            tracing::debug!(sequence_id = seq, "operation purged during send, dropping result");
            return Step::Continue;
        }

        let applied = async {
            if operation.operation_type != OperationType::Delete {
                if let Some(server_item) = &server_item {
                    apply_server_item(&self.engine, &mut state, &operation, server_item).await?;
                }
            }
            state.operations.remove(seq).await
        }
        .await;

        match applied {
            Ok(mut done) => {
                done.state = OperationState::Completed;
                if let Some(server_item) = server_item {
                    done.item = server_item;
                }
                report.completed.push(done);
                Step::Continue
            }
            Err(err) => {
                tracing::warn!(sequence_id = seq, error = %err, "could not apply push result");
                let _ = state.operations.unlock(seq);
                Step::Stop(PushStatus::CancelledByStoreError)
            }
        }
    }

    async fn record_conflict(
        &self,
        seq: SequenceId,
        conflict: ConflictRecord,
        report: &mut PushReport,
    ) -> Step {
        let mut state = self.engine.inner.state.lock().await;
        if state.operations.get(seq).is_none() {
            tracing::debug!(sequence_id = seq, "operation purged during send, dropping conflict");
            return Step::Continue;
        }

        // The conflict row and the queue removal land together or not at all.
        let recorded = match state.conflicts.add(conflict.clone()).await {
            Ok(()) => match state.operations.remove(seq).await {
                Ok(_) => Ok(()),
                Err(err) => {
                    if let Err(undo) = state.conflicts.remove(&conflict.id).await {
                        tracing::error!(
                            conflict_id = %conflict.id,
                            error = %undo,
                            "could not roll back conflict"
                        );
                    }
                    Err(err)
                }
            },
            Err(err) => Err(err),
        };

        match recorded {
            Ok(()) => {
                report.conflicts.push(conflict);
                Step::Continue
            }
            Err(err) => {
                tracing::warn!(sequence_id = seq, error = %err, "could not record conflict");
                let _ = state.operations.unlock(seq);
                Step::Stop(PushStatus::CancelledByStoreError)
            }
        }
    }

    async fn unlock(&self, seq: SequenceId) {
        let mut state = self.engine.inner.state.lock().await;
        // Gone if purged during the send.
        let _ = state.operations.unlock(seq);
    }
}

/// Lock the lowest pending operation.
fn lock_next(store: &mut OperationStore) -> Option<OperationRecord> {
    let mut candidate = store.peek().map(|op| op.sequence_id);
    while let Some(seq) = candidate {
        if store.lock(seq) {
            return store.get(seq).cloned();
        }
        candidate = store.next_after(seq).map(|op| op.sequence_id);
    }
    None
}

/// Write the server's item locally. If the app queued another edit of the
/// same item while this one was in flight, keep the app's edit and only take
/// the new version, on the local row and on the queued operation.
async fn apply_server_item(
    engine: &SyncEngine,
    state: &mut SyncState,
    operation: &OperationRecord,
    server_item: &Item,
) -> Result<()> {
    let source = &engine.inner.source;
    let newer = state
        .operations
        .operations_for(&operation.table, Some(&operation.item_id))
        .into_iter()
        .find(|op| op.sequence_id > operation.sequence_id)
        .cloned();

    match newer {
        None => {
            source
                .upsert_rows(&operation.table, vec![server_item.clone()])
                .await?;
        }
        Some(mut newer) => {
            if let Some(mut local) = source.read_row(&operation.table, &operation.item_id).await? {
                copy_version(server_item, &mut local);
                source.upsert_rows(&operation.table, vec![local]).await?;
            }
            copy_version(server_item, &mut newer.item);
            state.operations.update(newer).await?;
        }
    }
    Ok(())
}
