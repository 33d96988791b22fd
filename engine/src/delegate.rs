//! Hooks the app can install around a push.

use crate::{push::PushReport, Item, OperationRecord, SyncEngine};
use async_trait::async_trait;
use thiserror::Error;

/// Returned from [`SyncDelegate::on_operation`] to stop an operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DelegateError {
    /// Refuse this operation. It leaves the queue and is recorded as a
    /// conflict of kind `Rejected`.
    #[error("operation rejected: {message}")]
    Reject { code: Option<u16>, message: String },

    /// Stop the push. The operation stays queued.
    #[error("push aborted: {0}")]
    Abort(String),
}

/// Push hooks. Every method has a default that changes nothing.
#[async_trait]
pub trait SyncDelegate: Send + Sync {
    /// Called before each operation is sent. The returned item is sent in
    /// place of the queued one.
    async fn on_operation(
        &self,
        _operation: &OperationRecord,
        item: Item,
    ) -> Result<Item, DelegateError> {
        Ok(item)
    }

    /// Called once a push drain finishes, before `push()` returns. Conflicts
    /// marked handled or resolved here do not fail the push.
    ///
    /// Must not call [`SyncEngine::push`]: it would wait on itself.
    async fn on_push_complete(&self, _engine: &SyncEngine, _report: &PushReport) {}
}

/// A delegate that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDelegate;

impl SyncDelegate for DefaultDelegate {}
