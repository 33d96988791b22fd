//! [`DataSource`] implementation over a SQLite pool.
//!
//! Every table, including the engine's own queue, conflict and config
//! tables, is stored as `(id TEXT PRIMARY KEY, data TEXT)` with the row
//! serialized as a JSON object. Queries are evaluated in process.

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Mutex;
use tablesync_engine::{
    async_trait, item::item_id, DataSource, Item, ItemId, Query, ReadResult, StoreResult,
};

/// SQLite-backed data source.
pub struct SqliteDataSource {
    pool: SqlitePool,
    /// Tables already created in this process
    known: Mutex<HashSet<String>>,
}

impl SqliteDataSource {
    /// Connect to the database described by `config`, creating the file if
    /// needed.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;
        tracing::info!(url = %config.database_url, "opened sqlite data source");
        Ok(Self::from_pool(pool))
    }

    /// A private in-memory database. It lives as long as this value.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // One connection that never expires: each connection would otherwise
        // get its own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            known: Mutex::new(HashSet::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_table(&self, table: &str) -> Result<()> {
        validate_table(table)?;
        let known = self
            .known
            .lock()
            .map(|known| known.contains(table))
            .unwrap_or(false);
        if known {
            return Ok(());
        }

        let sql = format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" (id TEXT PRIMARY KEY NOT NULL, data TEXT NOT NULL)"#
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        if let Ok(mut known) = self.known.lock() {
            known.insert(table.to_string());
        }
        Ok(())
    }

    async fn fetch_row(&self, table: &str, id: &str) -> Result<Option<Item>> {
        self.ensure_table(table).await?;
        let sql = format!(r#"SELECT data FROM "{table}" WHERE id = ?"#);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let data: String = row.try_get("data")?;
        decode(table, id, &data).map(Some)
    }

    async fn fetch_all(&self, table: &str) -> Result<Vec<Item>> {
        self.ensure_table(table).await?;
        let sql = format!(r#"SELECT id, data FROM "{table}" ORDER BY id"#);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let data: String = row.try_get("data")?;
                decode(table, &id, &data)
            })
            .collect()
    }

    async fn upsert(&self, table: &str, items: Vec<Item>) -> Result<()> {
        self.ensure_table(table).await?;
        let sql = format!(
            r#"INSERT INTO "{table}" (id, data) VALUES (?, ?)
               ON CONFLICT (id) DO UPDATE SET data = excluded.data"#
        );

        let mut tx = self.pool.begin().await?;
        for item in &items {
            let id = item_id(item).ok_or_else(|| Error::MissingId(table.to_string()))?;
            let data = serde_json::to_string(item).map_err(|e| Error::CorruptRow {
                table: table.to_string(),
                id: id.to_string(),
                message: e.to_string(),
            })?;
            sqlx::query(&sql)
                .bind(id)
                .bind(data)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_ids(&self, table: &str, ids: &[ItemId]) -> Result<()> {
        self.ensure_table(table).await?;
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!(r#"DELETE FROM "{table}" WHERE id = ?"#);

        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query(&sql).bind(id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_matching(&self, query: &Query) -> Result<()> {
        let table = &query.table;
        if query.filter.is_none() {
            self.ensure_table(table).await?;
            sqlx::query(&format!(r#"DELETE FROM "{table}""#))
                .execute(&self.pool)
                .await?;
            return Ok(());
        }

        let ids: Vec<ItemId> = self
            .fetch_all(table)
            .await?
            .iter()
            .filter(|item| query.matches(item))
            .filter_map(|item| item_id(item).map(str::to_string))
            .collect();
        self.delete_ids(table, &ids).await
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidTable(table.to_string()))
    }
}

fn decode(table: &str, id: &str, data: &str) -> Result<Item> {
    let corrupt = |message: String| Error::CorruptRow {
        table: table.to_string(),
        id: id.to_string(),
        message,
    };
    match serde_json::from_str(data).map_err(|e| corrupt(e.to_string()))? {
        serde_json::Value::Object(item) => Ok(item),
        other => Err(corrupt(format!("expected an object, found {other}"))),
    }
}

#[async_trait]
impl DataSource for SqliteDataSource {
    async fn read_row(&self, table: &str, id: &str) -> StoreResult<Option<Item>> {
        Ok(self.fetch_row(table, id).await?)
    }

    async fn read_query(&self, query: &Query) -> StoreResult<ReadResult> {
        let rows = self.fetch_all(&query.table).await?;
        Ok(query.apply(rows.iter()))
    }

    async fn upsert_rows(&self, table: &str, items: Vec<Item>) -> StoreResult<()> {
        Ok(self.upsert(table, items).await?)
    }

    async fn delete_rows(&self, table: &str, ids: &[ItemId]) -> StoreResult<()> {
        Ok(self.delete_ids(table, ids).await?)
    }

    async fn delete_by_query(&self, query: &Query) -> StoreResult<()> {
        Ok(self.delete_matching(query).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names() {
        assert!(validate_table("todo_items").is_ok());
        assert!(validate_table("__operations").is_ok());
        assert!(validate_table("").is_err());
        assert!(validate_table("todo\"; DROP TABLE x; --").is_err());
        assert!(validate_table("with space").is_err());
    }

    #[test]
    fn decode_rejects_non_objects() {
        assert!(decode("todo", "1", r#"{"id":"1"}"#).is_ok());
        assert!(matches!(
            decode("todo", "1", "[1,2]"),
            Err(Error::CorruptRow { .. })
        ));
        assert!(matches!(
            decode("todo", "1", "not json"),
            Err(Error::CorruptRow { .. })
        ));
    }
}
