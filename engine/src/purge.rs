//! Purge: drop local rows without telling the server.

use crate::{engine::SyncEngine, error::Result, query::Query, Error, ItemId};

/// What one purge removed besides rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub operations_removed: usize,
    pub conflicts_removed: usize,
}

pub(crate) struct PurgeExecutor<'a> {
    engine: &'a SyncEngine,
    table: &'a str,
    query: Option<Query>,
    query_id: Option<&'a str>,
    force: bool,
}

impl<'a> PurgeExecutor<'a> {
    pub(crate) fn new(
        engine: &'a SyncEngine,
        table: &'a str,
        query: Option<Query>,
        query_id: Option<&'a str>,
        force: bool,
    ) -> Self {
        Self {
            engine,
            table,
            query,
            query_id,
            force,
        }
    }

    pub(crate) async fn execute(self) -> Result<PurgeReport> {
        if self.table.is_empty() {
            return Err(Error::Validation("table name must not be empty".into()));
        }
        let query = match self.query {
            Some(query) if query.table != self.table => {
                return Err(Error::Validation(format!(
                    "purge query targets {} but table is {}",
                    query.table, self.table
                )));
            }
            Some(query) => query,
            None => Query::table(self.table),
        };
        if self.query_id.is_some_and(str::is_empty) {
            return Err(Error::Validation("query id must not be empty".into()));
        }

        let ids: Option<Vec<ItemId>> = query.filter.as_ref().and_then(|f| f.id_set());
        let inner = &self.engine.inner;
        let mut state = inner.state.lock().await;
        let mut report = PurgeReport::default();

        if self.force {
            report.operations_removed = state
                .operations
                .remove_for_table(self.table, ids.as_deref())
                .await?;
            report.conflicts_removed = state
                .conflicts
                .remove_for_table(self.table, ids.as_deref())
                .await?;
            state.settings.reset_table(self.table).await?;
        } else {
            let count = state
                .operations
                .operations_for(self.table, None)
                .into_iter()
                .filter(|op| ids.as_ref().map_or(true, |ids| ids.contains(&op.item_id)))
                .count();
            if count > 0 {
                return Err(Error::PendingOperationsExist {
                    table: self.table.to_string(),
                    count,
                });
            }
            if let Some(query_id) = self.query_id {
                state.settings.reset_delta_token(self.table, query_id).await?;
            }
        }

        inner.source.delete_by_query(&query).await?;

        tracing::info!(
            table = self.table,
            force = self.force,
            operations_removed = report.operations_removed,
            conflicts_removed = report.conflicts_removed,
            "purge finished"
        );
        Ok(report)
    }
}
