//! # Tablesync Engine
//!
//! An offline sync engine for mobile table clients.
//!
//! Apps write to a local store and keep working without a connection. Every
//! local mutation is recorded as a queued operation; a later push sends the
//! queue to the remote table in order, and pulls bring remote changes back
//! without overwriting edits that have not been pushed yet.
//!
//! ## Design Principles
//!
//! - **No IO of its own**: the local store ([`DataSource`]) and the remote
//!   table ([`RemoteTable`]) come in through traits
//! - **Ordered**: operations are pushed in the order they were made
//! - **Durable**: the queue, conflicts and pull cursors live in the data
//!   source and survive restarts
//!
//! ## Core Concepts
//!
//! ### Operations
//!
//! Each local insert, update or delete becomes an [`OperationRecord`]. A new
//! mutation of an item that already has one queued is condensed into it
//! (see [`condense`]): insert then update is still one insert, insert then
//! delete is nothing at all.
//!
//! ### Push
//!
//! [`SyncEngine::push`] drains the queue. A network failure stops the drain
//! and keeps the remaining operations; a server refusal becomes a
//! [`ConflictRecord`] that the app resolves with one of the `resolve_*`
//! methods.
//!
//! ### Pull and purge
//!
//! [`SyncEngine::pull`] pages remote items into the local store, optionally
//! incrementally by `updatedAt`. [`SyncEngine::purge`] drops local rows and
//! refuses to discard queued changes unless forced.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use tablesync_engine::{
//!     async_trait, Item, MemoryDataSource, OperationRecord, Page, Query, RemoteError,
//!     RemoteTable, SyncConfig, SyncEngine,
//! };
//!
//! struct Offline;
//!
//! #[async_trait]
//! impl RemoteTable for Offline {
//!     async fn send(&self, _op: &OperationRecord) -> Result<Option<Item>, RemoteError> {
//!         Err(RemoteError::Transient("no connection".into()))
//!     }
//!
//!     async fn fetch_page(
//!         &self,
//!         _query: &Query,
//!         _offset: usize,
//!         _page_size: usize,
//!     ) -> Result<Page, RemoteError> {
//!         Err(RemoteError::Transient("no connection".into()))
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let engine = SyncEngine::open(
//!     Arc::new(MemoryDataSource::new()),
//!     Arc::new(Offline),
//!     SyncConfig::default(),
//! )
//! .await?;
//!
//! let todo = json!({"text": "buy milk"}).as_object().cloned().unwrap();
//! let stored = engine.enqueue_insert("todo", todo).await?;
//! assert!(stored.contains_key("id"));
//!
//! // Offline: the push stops and the insert stays queued.
//! assert!(engine.push().await.is_err());
//! assert_eq!(engine.pending_operations_count().await, 1);
//! # Ok::<(), tablesync_engine::Error>(())
//! # }).unwrap();
//! ```

pub mod condenser;
pub mod config;
pub mod conflict;
pub mod datasource;
pub mod delegate;
pub mod engine;
pub mod error;
pub mod item;
pub mod memory;
pub mod operation;
pub mod pull;
pub mod purge;
pub mod push;
pub mod query;
pub mod remote;
pub mod settings;
pub mod store;

// Re-export main types at crate root
pub use async_trait::async_trait;
pub use condenser::{condense, CondenseAction, RejectReason};
pub use config::{ConfigError, SyncConfig};
pub use conflict::{ConflictKind, ConflictLog, ConflictRecord};
pub use datasource::{DataSource, StoreResult};
pub use delegate::{DefaultDelegate, DelegateError, SyncDelegate};
pub use engine::SyncEngine;
pub use error::{Error, Result, StoreError};
pub use memory::MemoryDataSource;
pub use operation::{OperationRecord, OperationState, OperationType};
pub use pull::PullReport;
pub use purge::PurgeReport;
pub use push::{PushReport, PushStatus};
pub use query::{Filter, OrderBy, Query, ReadResult};
pub use remote::{Page, RemoteError, RemoteTable};
pub use settings::SyncSettings;
pub use store::OperationStore;

/// Type aliases for clarity
pub type TableName = String;
pub type ItemId = String;
pub type SequenceId = u64;
pub type ConflictId = String;
pub type Item = serde_json::Map<String, serde_json::Value>;
