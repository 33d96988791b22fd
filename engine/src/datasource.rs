//! Local data source abstraction.
//!
//! The engine keeps user rows and its own metadata (operation queue, conflict
//! log, config) in one [`DataSource`]. Implementations decide how rows are
//! stored; the engine only needs keyed rows and query evaluation.

use crate::{
    error::StoreError,
    query::{Query, ReadResult},
    Item, ItemId,
};
use async_trait::async_trait;

/// Result type for data source calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Default name of the table holding queued operations.
pub const OPERATION_TABLE: &str = "__operations";
/// Default name of the table holding unresolved conflicts.
pub const CONFLICT_TABLE: &str = "__errors";
/// Default name of the table holding sync settings and delta tokens.
pub const CONFIG_TABLE: &str = "__config";

/// Durable row store consumed by the engine.
///
/// Rows are keyed by their `id` field within a table. Writes of several rows
/// in one call should be atomic where the backend allows it.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Read one row, or `None` if it does not exist.
    async fn read_row(&self, table: &str, id: &str) -> StoreResult<Option<Item>>;

    /// Read every row of `query.table` matching the query.
    async fn read_query(&self, query: &Query) -> StoreResult<ReadResult>;

    /// Insert or replace rows.
    async fn upsert_rows(&self, table: &str, items: Vec<Item>) -> StoreResult<()>;

    /// Delete rows by id. Missing ids are ignored.
    async fn delete_rows(&self, table: &str, ids: &[ItemId]) -> StoreResult<()>;

    /// Delete every row of `query.table` matching the query's filter.
    async fn delete_by_query(&self, query: &Query) -> StoreResult<()>;

    fn operation_table_name(&self) -> &str {
        OPERATION_TABLE
    }

    fn conflict_table_name(&self) -> &str {
        CONFLICT_TABLE
    }

    fn config_table_name(&self) -> &str {
        CONFIG_TABLE
    }
}
