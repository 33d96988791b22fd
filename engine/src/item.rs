//! Item helpers.
//!
//! Rows travel through the engine as [`Item`]s: insertion-ordered maps from
//! field name to JSON value. Unknown fields round-trip untouched; the engine
//! only looks at the system fields defined here.

use crate::{Error, Item, ItemId};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Primary key of every row.
pub const ID_FIELD: &str = "id";
/// Opaque optimistic-concurrency token assigned by the server.
pub const VERSION_FIELD: &str = "version";
/// Server-side modification time, drives incremental pulls.
pub const UPDATED_AT_FIELD: &str = "updatedAt";
/// Soft-delete marker returned by the server on pulls.
pub const DELETED_FIELD: &str = "deleted";

const MAX_ID_LEN: usize = 255;

/// Get the item's id, if it carries a string id.
pub fn item_id(item: &Item) -> Option<&str> {
    item.get(ID_FIELD).and_then(Value::as_str)
}

/// Assign a fresh id to an item whose id is absent or null. Returns the id in
/// use. Any other non-string id is an error, never replaced.
pub fn ensure_id(item: &mut Item) -> Result<ItemId, Error> {
    match item.get(ID_FIELD) {
        Some(Value::String(id)) => return Ok(id.clone()),
        None | Some(Value::Null) => {}
        Some(other) => {
            return Err(Error::Validation(format!(
                "item id must be a string, found {other}"
            )))
        }
    }
    let id = uuid::Uuid::new_v4().to_string();
    item.insert(ID_FIELD.to_string(), Value::String(id.clone()));
    Ok(id)
}

/// Check that an id is usable as a row key.
pub fn validate_id(id: &str) -> Result<(), Error> {
    if id.is_empty() {
        return Err(Error::Validation("item id must not be empty".into()));
    }
    if id.len() > MAX_ID_LEN {
        return Err(Error::Validation(format!(
            "item id must be at most {MAX_ID_LEN} characters"
        )));
    }
    if id.chars().any(char::is_control) {
        return Err(Error::Validation(
            "item id must not contain control characters".into(),
        ));
    }
    Ok(())
}

/// Get the item's version token.
pub fn version(item: &Item) -> Option<&Value> {
    item.get(VERSION_FIELD).filter(|v| !v.is_null())
}

/// Copy the version token from `source` onto `target`. No-op if `source` has none.
pub fn copy_version(source: &Item, target: &mut Item) {
    if let Some(v) = version(source) {
        target.insert(VERSION_FIELD.to_string(), v.clone());
    }
}

/// Parse the item's `updatedAt` field.
pub fn updated_at(item: &Item) -> Option<DateTime<Utc>> {
    item.get(UPDATED_AT_FIELD)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Check the soft-delete flag.
pub fn is_deleted(item: &Item) -> bool {
    item.get(DELETED_FIELD)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
