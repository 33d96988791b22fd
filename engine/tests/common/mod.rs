//! Shared test fixtures: a scripted remote table and small helpers.

#![allow(dead_code)]

use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tablesync_engine::{
    async_trait, DataSource, Item, ItemId, MemoryDataSource, OperationRecord, OperationType,
    Page, Query, ReadResult, RemoteError, RemoteTable, StoreError, StoreResult, SyncConfig,
    SyncEngine,
};
use tokio::sync::Notify;

/// Build an item from a JSON object literal.
pub fn item(value: Value) -> Item {
    value.as_object().cloned().expect("item must be a JSON object")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scripted reply to one `send`.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Echo the item with a fresh server version
    Accept,
    Fail(RemoteError),
}

/// One `fetch_page` call as seen by the remote.
#[derive(Debug, Clone)]
pub struct Fetch {
    pub query: Query,
    pub offset: usize,
    pub page_size: usize,
}

/// A remote table whose responses are scripted by the test.
#[derive(Default)]
pub struct MockRemote {
    replies: Mutex<VecDeque<Reply>>,
    sent: Mutex<Vec<OperationRecord>>,
    versions: Mutex<u64>,
    rows: Mutex<Vec<Item>>,
    fetches: Mutex<Vec<Fetch>>,
    page_error: Mutex<Option<RemoteError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    /// Signalled whenever `send` is entered
    pub entered: Notify,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue replies for the next sends. Sends past the script are accepted.
    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.replies.lock().unwrap().extend(replies);
    }

    /// Hold every send until the returned notify is signalled, once per send.
    pub fn hold_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn sent(&self) -> Vec<OperationRecord> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_summary(&self) -> Vec<(OperationType, String)> {
        self.sent()
            .into_iter()
            .map(|op| (op.operation_type, op.item_id))
            .collect()
    }

    pub fn set_rows(&self, rows: Vec<Item>) {
        *self.rows.lock().unwrap() = rows;
    }

    pub fn fail_pages(&self, err: RemoteError) {
        *self.page_error.lock().unwrap() = Some(err);
    }

    pub fn fetches(&self) -> Vec<Fetch> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteTable for MockRemote {
    async fn send(&self, operation: &OperationRecord) -> Result<Option<Item>, RemoteError> {
        self.entered.notify_one();
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.sent.lock().unwrap().push(operation.clone());
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Accept);
        match reply {
            Reply::Fail(err) => Err(err),
            Reply::Accept if operation.operation_type == OperationType::Delete => Ok(None),
            Reply::Accept => {
                let mut versions = self.versions.lock().unwrap();
                *versions += 1;
                let mut server_item = operation.item.clone();
                server_item.insert("version".into(), Value::String(format!("v{versions}")));
                Ok(Some(server_item))
            }
        }
    }

    async fn fetch_page(
        &self,
        query: &Query,
        offset: usize,
        page_size: usize,
    ) -> Result<Page, RemoteError> {
        self.fetches.lock().unwrap().push(Fetch {
            query: query.clone(),
            offset,
            page_size,
        });
        if let Some(err) = self.page_error.lock().unwrap().clone() {
            return Err(err);
        }

        let rows = self.rows.lock().unwrap();
        let matched = query.apply(rows.iter()).items;
        Ok(Page::new(
            matched.into_iter().skip(offset).take(page_size).collect(),
        ))
    }
}

/// An engine over a fresh in-memory store.
pub async fn engine() -> (SyncEngine, Arc<MockRemote>, Arc<MemoryDataSource>) {
    init_tracing();
    let source = Arc::new(MemoryDataSource::new());
    let remote = MockRemote::new();
    let engine = SyncEngine::open(source.clone(), remote.clone(), SyncConfig::default())
        .await
        .unwrap();
    (engine, remote, source)
}

/// Open a second engine over an existing store, as after an app restart.
pub async fn reopen(source: Arc<dyn DataSource>, remote: Arc<MockRemote>) -> SyncEngine {
    SyncEngine::open(source, remote, SyncConfig::default())
        .await
        .unwrap()
}

pub fn precondition_failed(server_item: Item) -> Reply {
    Reply::Fail(RemoteError::PreconditionFailed {
        server_item: Some(server_item),
        message: "version mismatch".into(),
    })
}

pub fn transient() -> Reply {
    Reply::Fail(RemoteError::Transient("connection reset".into()))
}

/// Which write a [`FailingSource`] should refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Write {
    Upsert,
    Delete,
}

/// An in-memory store that fails writes armed by the test, once each.
pub struct FailingSource {
    inner: MemoryDataSource,
    armed: Mutex<Vec<(Write, String)>>,
}

impl FailingSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryDataSource::new(),
            armed: Mutex::new(Vec::new()),
        })
    }

    /// Fail the next `write` to `table`.
    pub fn fail_next(&self, write: Write, table: &str) {
        self.armed.lock().unwrap().push((write, table.to_string()));
    }

    fn trip(&self, write: Write, table: &str) -> StoreResult<()> {
        let mut armed = self.armed.lock().unwrap();
        match armed.iter().position(|(w, t)| *w == write && t == table) {
            Some(at) => {
                armed.remove(at);
                Err(StoreError::backend(format!("disk full writing {table}")))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DataSource for FailingSource {
    async fn read_row(&self, table: &str, id: &str) -> StoreResult<Option<Item>> {
        self.inner.read_row(table, id).await
    }

    async fn read_query(&self, query: &Query) -> StoreResult<ReadResult> {
        self.inner.read_query(query).await
    }

    async fn upsert_rows(&self, table: &str, items: Vec<Item>) -> StoreResult<()> {
        self.trip(Write::Upsert, table)?;
        self.inner.upsert_rows(table, items).await
    }

    async fn delete_rows(&self, table: &str, ids: &[ItemId]) -> StoreResult<()> {
        self.trip(Write::Delete, table)?;
        self.inner.delete_rows(table, ids).await
    }

    async fn delete_by_query(&self, query: &Query) -> StoreResult<()> {
        self.inner.delete_by_query(query).await
    }
}

/// An engine over a store whose writes can be made to fail.
pub async fn failing_engine() -> (SyncEngine, Arc<MockRemote>, Arc<FailingSource>) {
    init_tracing();
    let source = FailingSource::new();
    let remote = MockRemote::new();
    let engine = SyncEngine::open(source.clone(), remote.clone(), SyncConfig::default())
        .await
        .unwrap();
    (engine, remote, source)
}
