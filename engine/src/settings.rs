//! Sync settings kept in the config table.
//!
//! Holds the per-query delta tokens used by incremental pulls and the
//! operation sequence counter.

use crate::{
    datasource::DataSource,
    error::{Result, StoreError},
    query::{Filter, Query},
    Item,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Config key of the persisted operation sequence counter.
pub(crate) const SEQUENCE_KEY: &str = "operationSequence";

const KIND_DELTA_TOKEN: &str = "deltaToken";
const KIND_SEQUENCE: &str = "sequence";

/// Build a config table row.
fn config_row(
    key: &str,
    kind: &str,
    table: Option<&str>,
    query_id: Option<&str>,
    value: Value,
) -> Item {
    let mut row = Item::new();
    row.insert("id".into(), json!(key));
    row.insert("kind".into(), json!(kind));
    row.insert("table".into(), json!(table));
    row.insert("queryId".into(), json!(query_id));
    row.insert("value".into(), value);
    row
}

fn delta_token_key(table: &str, query_id: &str) -> String {
    format!("{KIND_DELTA_TOKEN}|{table}|{query_id}")
}

/// Read the persisted sequence counter.
pub(crate) async fn load_sequence(source: &dyn DataSource) -> Result<Option<u64>> {
    let row = source
        .read_row(source.config_table_name(), SEQUENCE_KEY)
        .await?;
    Ok(row.and_then(|r| r.get("value").and_then(Value::as_u64)))
}

/// Persist the sequence counter.
pub(crate) async fn save_sequence(source: &dyn DataSource, next: u64) -> Result<()> {
    let row = config_row(SEQUENCE_KEY, KIND_SEQUENCE, None, None, json!(next));
    source
        .upsert_rows(source.config_table_name(), vec![row])
        .await?;
    Ok(())
}

/// Delta token access with a read-through cache.
pub struct SyncSettings {
    source: Arc<dyn DataSource>,
    cache: HashMap<String, Option<DateTime<Utc>>>,
}

impl SyncSettings {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self {
            source,
            cache: HashMap::new(),
        }
    }

    /// The high-water `updatedAt` seen by an incremental pull.
    pub async fn delta_token(&mut self, table: &str, query_id: &str) -> Result<Option<DateTime<Utc>>> {
        let key = delta_token_key(table, query_id);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(*cached);
        }

        let config_table = self.source.config_table_name().to_string();
        let token = match self.source.read_row(&config_table, &key).await? {
            None => None,
            Some(row) => {
                let raw = row.get("value").and_then(Value::as_str).ok_or_else(|| {
                    StoreError::CorruptRow {
                        table: config_table.clone(),
                        message: format!("delta token {key} has no value"),
                    }
                })?;
                let parsed = DateTime::parse_from_rfc3339(raw).map_err(|e| StoreError::CorruptRow {
                    table: config_table.clone(),
                    message: format!("delta token {key}: {e}"),
                })?;
                Some(parsed.with_timezone(&Utc))
            }
        };

        self.cache.insert(key, token);
        Ok(token)
    }

    pub async fn set_delta_token(
        &mut self,
        table: &str,
        query_id: &str,
        token: DateTime<Utc>,
    ) -> Result<()> {
        let key = delta_token_key(table, query_id);
        let row = config_row(
            &key,
            KIND_DELTA_TOKEN,
            Some(table),
            Some(query_id),
            json!(token.to_rfc3339()),
        );
        self.source
            .upsert_rows(self.source.config_table_name(), vec![row])
            .await?;
        self.cache.insert(key, Some(token));
        Ok(())
    }

    pub async fn reset_delta_token(&mut self, table: &str, query_id: &str) -> Result<()> {
        let key = delta_token_key(table, query_id);
        self.source
            .delete_rows(self.source.config_table_name(), std::slice::from_ref(&key))
            .await?;
        self.cache.insert(key, None);
        Ok(())
    }

    /// Forget every delta token of `table`. Returns how many were removed.
    pub async fn reset_table(&mut self, table: &str) -> Result<usize> {
        let query = Query::table(self.source.config_table_name())
            .with_filter(Filter::eq("kind", KIND_DELTA_TOKEN).and(Filter::eq("table", table)));
        let keys: Vec<String> = self
            .source
            .read_query(&query)
            .await?
            .items
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_str).map(str::to_string))
            .collect();

        if !keys.is_empty() {
            self.source
                .delete_rows(self.source.config_table_name(), &keys)
                .await?;
        }
        let prefix = format!("{KIND_DELTA_TOKEN}|{table}|");
        self.cache.retain(|k, _| !k.starts_with(&prefix));
        Ok(keys.len())
    }
}
