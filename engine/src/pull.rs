//! Pull: page remote items into the local store.

use crate::{
    engine::SyncEngine,
    error::Result,
    item::{is_deleted, item_id, updated_at, UPDATED_AT_FIELD},
    query::{Filter, OrderBy, Query},
    Error, Item, ItemId,
};
use chrono::{DateTime, SecondsFormat, Utc};

/// What one pull did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullReport {
    /// Pages fetched
    pub pages: usize,
    /// Items written to the local store
    pub upserted: usize,
    /// Items removed locally because the server flagged them deleted
    pub deleted: usize,
    /// Items left alone because an operation is queued for them
    pub skipped: usize,
    /// Delta token after the pull, for incremental pulls
    pub delta_token: Option<DateTime<Utc>>,
}

pub(crate) struct PullExecutor<'a> {
    engine: &'a SyncEngine,
    query: Query,
    query_id: Option<String>,
    page_size: usize,
}

impl<'a> PullExecutor<'a> {
    pub(crate) fn new(
        engine: &'a SyncEngine,
        query: Query,
        query_id: Option<String>,
        page_size: usize,
    ) -> Self {
        Self {
            engine,
            query,
            query_id,
            page_size,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.query.table.is_empty() {
            return Err(Error::Validation("table name must not be empty".into()));
        }
        if self.page_size == 0 {
            return Err(Error::Validation("page size must be positive".into()));
        }
        if let Some(query_id) = &self.query_id {
            if query_id.is_empty() {
                return Err(Error::Validation("query id must not be empty".into()));
            }
            if !self.query.order_by.is_empty() || self.query.skip.is_some() || self.query.top.is_some() {
                return Err(Error::Validation(
                    "incremental pull query must not use ordering, skip or top".into(),
                ));
            }
        }
        Ok(())
    }

    pub(crate) async fn execute(self) -> Result<PullReport> {
        self.validate()?;
        let inner = &self.engine.inner;
        let table = self.query.table.clone();

        // Push local changes first so the pull cannot overwrite them.
        let queued = inner.state.lock().await.operations.count_for_table(&table);
        if queued > 0 {
            tracing::debug!(%table, queued, "pushing before pull");
            if let Err(err) = self.engine.push().await {
                let state = inner.state.lock().await;
                if state.operations.count_for_table(&table) > 0
                    || state.conflicts.unhandled_for_table(&table) > 0
                {
                    tracing::info!(%table, error = %err, "pull aborted by failed push");
                    return Err(err);
                }
            }
        }

        let mut token = match &self.query_id {
            Some(query_id) => {
                let mut state = inner.state.lock().await;
                state.settings.delta_token(&table, query_id).await?
            }
            None => None,
        };

        let mut report = PullReport {
            delta_token: token,
            ..PullReport::default()
        };
        let mut request = self.request_query(token);
        let mut offset = self.query.skip.unwrap_or(0);
        let mut remaining = self.query.top;

        loop {
            let wanted = remaining.map_or(self.page_size, |left| left.min(self.page_size));
            if wanted == 0 {
                break;
            }

            let page = inner.remote.fetch_page(&request, offset, wanted).await?;
            let fetched = page.items.len();
            report.pages += 1;

            let page_max = self.apply_page(page.items, &mut report).await?;

            if let Some(left) = remaining.as_mut() {
                *left -= fetched.min(*left);
            }
            if fetched < wanted || page.has_more == Some(false) {
                break;
            }

            match (&self.query_id, page_max) {
                // The filter moved forward: start over from the new token.
                (Some(query_id), Some(seen)) if token.map_or(true, |t| seen > t) => {
                    let mut state = inner.state.lock().await;
                    state.settings.set_delta_token(&table, query_id, seen).await?;
                    token = Some(seen);
                    report.delta_token = token;
                    request = self.request_query(token);
                    offset = 0;
                }
                _ => offset += fetched,
            }
        }

        if let (Some(query_id), Some(latest)) = (&self.query_id, report.delta_token) {
            if token != Some(latest) {
                let mut state = inner.state.lock().await;
                state.settings.set_delta_token(&table, query_id, latest).await?;
            }
        }

        tracing::info!(
            %table,
            pages = report.pages,
            upserted = report.upserted,
            deleted = report.deleted,
            skipped = report.skipped,
            "pull finished"
        );
        Ok(report)
    }

    /// The query sent to the remote. Paging is passed separately.
    fn request_query(&self, token: Option<DateTime<Utc>>) -> Query {
        let mut query = self.query.clone();
        query.skip = None;
        query.top = None;
        if self.query_id.is_some() {
            if let Some(token) = token {
                query = query.and_filter(Filter::ge(
                    UPDATED_AT_FIELD,
                    token.to_rfc3339_opts(SecondsFormat::Millis, true),
                ));
            }
            query.order_by = vec![OrderBy::asc(UPDATED_AT_FIELD)];
        }
        query
    }

    /// Write one page under the queue lock. Returns the page's latest
    /// `updatedAt`.
    async fn apply_page(&self, items: Vec<Item>, report: &mut PullReport) -> Result<Option<DateTime<Utc>>> {
        let table = &self.query.table;
        let state = self.engine.inner.state.lock().await;

        let mut upserts = Vec::new();
        let mut deletes: Vec<ItemId> = Vec::new();
        let mut page_max: Option<DateTime<Utc>> = None;

        for item in items {
            if let Some(seen) = updated_at(&item) {
                page_max = Some(page_max.map_or(seen, |max| max.max(seen)));
            }
            let Some(id) = item_id(&item).map(str::to_string) else {
                continue;
            };
            if !state.operations.operations_for(table, Some(&id)).is_empty() {
                report.skipped += 1;
            } else if is_deleted(&item) {
                deletes.push(id);
            } else {
                upserts.push(item);
            }
        }

        let source = &self.engine.inner.source;
        if !upserts.is_empty() {
            report.upserted += upserts.len();
            source.upsert_rows(table, upserts).await?;
        }
        if !deletes.is_empty() {
            report.deleted += deletes.len();
            source.delete_rows(table, &deletes).await?;
        }

        if self.query_id.is_some() {
            if let Some(seen) = page_max {
                if report.delta_token.map_or(true, |t| seen > t) {
                    report.delta_token = Some(seen);
                }
            }
        }
        Ok(page_max)
    }
}
