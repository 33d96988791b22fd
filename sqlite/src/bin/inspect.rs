//! tablesync-inspect - print the pending queue and conflicts of a database.
//!
//! Reads `TABLESYNC_DATABASE_URL` (or a `.env` file) and lists what the next
//! push would send.

use std::sync::Arc;
use tablesync_engine::{ConflictLog, DataSource, OperationStore};
use tablesync_sqlite::{SqliteDataSource, StoreConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tablesync_sqlite=info,tablesync_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = StoreConfig::from_env()?;

    let source: Arc<dyn DataSource> = Arc::new(SqliteDataSource::connect(&config).await?);
    let operations = OperationStore::load(source.clone()).await?;
    let conflicts = ConflictLog::load(source).await?;

    println!("{} pending operation(s)", operations.count());
    for op in operations.all() {
        println!(
            "  #{:<6} {:<7} {}/{}  queued {}",
            op.sequence_id,
            op.operation_type.to_string(),
            op.table,
            op.item_id,
            op.created_at.to_rfc3339()
        );
    }

    println!("{} conflict(s)", conflicts.len());
    for conflict in conflicts.list() {
        println!(
            "  {} {} {}/{} {:?}{}: {}",
            conflict.id,
            conflict.operation_type,
            conflict.table,
            conflict.item_id,
            conflict.kind,
            if conflict.handled { " (handled)" } else { "" },
            conflict.message
        );
    }

    Ok(())
}
