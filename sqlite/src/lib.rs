//! # Tablesync SQLite
//!
//! A durable [`DataSource`](tablesync_engine::DataSource) for the tablesync
//! engine, built on `sqlx`. App tables and the engine's queue, conflict and
//! config tables all live in one SQLite database, so pending changes survive
//! restarts.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tablesync_sqlite::{SqliteDataSource, StoreConfig};
//!
//! # async fn open() -> Result<(), Box<dyn std::error::Error>> {
//! let source = SqliteDataSource::connect(&StoreConfig::from_env()?).await?;
//! let source = Arc::new(source);
//! // Hand `source` to `SyncEngine::open` along with a remote table.
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod source;

pub use config::{ConfigError, StoreConfig};
pub use error::Error;
pub use source::SqliteDataSource;
