//! In-memory data source.
//!
//! Keeps every table in process memory. Useful for tests, previews and apps
//! that do not need the queue to survive a restart.

use crate::{
    datasource::{DataSource, StoreResult},
    error::StoreError,
    item::item_id,
    query::{Query, ReadResult},
    Item, ItemId, TableName,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// The rows of one table.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    rows: BTreeMap<ItemId, Item>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }

    /// Get a row by id.
    pub fn get(&self, id: &str) -> Option<&Item> {
        self.rows.get(id)
    }

    /// Insert or replace a row. Rows without a string id are rejected.
    pub fn upsert(&mut self, table: &str, item: Item) -> StoreResult<()> {
        let id = item_id(&item).ok_or_else(|| StoreError::CorruptRow {
            table: table.to_string(),
            message: "row has no string id".into(),
        })?;
        self.rows.insert(id.to_string(), item);
        Ok(())
    }

    /// Remove a row.
    pub fn remove(&mut self, id: &str) -> Option<Item> {
        self.rows.remove(id)
    }

    /// Iterate all rows in id order.
    pub fn rows(&self) -> impl Iterator<Item = &Item> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A [`DataSource`] backed by hash maps.
#[derive(Debug, Default)]
pub struct MemoryDataSource {
    tables: Mutex<HashMap<TableName, Collection>>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, HashMap<TableName, Collection>>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::backend("memory store lock poisoned"))
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables()
            .map(|t| t.get(table).map_or(0, Collection::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn read_row(&self, table: &str, id: &str) -> StoreResult<Option<Item>> {
        Ok(self
            .tables()?
            .get(table)
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn read_query(&self, query: &Query) -> StoreResult<ReadResult> {
        let tables = self.tables()?;
        Ok(match tables.get(&query.table) {
            Some(collection) => query.apply(collection.rows()),
            None => query.apply(std::iter::empty()),
        })
    }

    async fn upsert_rows(&self, table: &str, items: Vec<Item>) -> StoreResult<()> {
        let mut tables = self.tables()?;
        // Validate first so a bad row leaves the table untouched.
        let mut staged = tables.get(table).cloned().unwrap_or_default();
        for item in items {
            staged.upsert(table, item)?;
        }
        tables.insert(table.to_string(), staged);
        Ok(())
    }

    async fn delete_rows(&self, table: &str, ids: &[ItemId]) -> StoreResult<()> {
        if let Some(collection) = self.tables()?.get_mut(table) {
            for id in ids {
                collection.remove(id);
            }
        }
        Ok(())
    }

    async fn delete_by_query(&self, query: &Query) -> StoreResult<()> {
        if let Some(collection) = self.tables()?.get_mut(&query.table) {
            collection.rows.retain(|_, item| !query.matches(item));
        }
        Ok(())
    }
}
