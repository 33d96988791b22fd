//! Remote table client abstraction.

use crate::{query::Query, Item, OperationRecord};
use async_trait::async_trait;
use thiserror::Error;

/// One page of pulled items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    /// Whether the server reports more items after this page, when it says.
    pub has_more: Option<bool>,
}

impl Page {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            has_more: None,
        }
    }
}

/// Failures reported by a [`RemoteTable`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    /// Timeout, connection reset, DNS failure. Worth retrying later.
    #[error("network failure: {0}")]
    Transient(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The item's version did not match the server's.
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        server_item: Option<Item>,
        message: String,
    },

    #[error("client error {status}: {message}")]
    Client { status: u16, message: String },

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
}

impl RemoteError {
    /// HTTP-like status code, when one applies.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Transient(_) => None,
            RemoteError::Unauthorized(_) => Some(401),
            RemoteError::PreconditionFailed { .. } => Some(412),
            RemoteError::Client { status, .. } | RemoteError::Server { status, .. } => {
                Some(*status)
            }
        }
    }
}

/// The online side of a table: sends queued operations and serves pulls.
#[async_trait]
pub trait RemoteTable: Send + Sync {
    /// Send one operation. Returns the server's copy of the item for inserts
    /// and updates, `None` for deletes.
    async fn send(&self, operation: &OperationRecord) -> Result<Option<Item>, RemoteError>;

    /// Fetch up to `page_size` items matching `query`, starting at `offset`.
    async fn fetch_page(
        &self,
        query: &Query,
        offset: usize,
        page_size: usize,
    ) -> Result<Page, RemoteError>;
}
