//! Queries used to target reads, pulls and purges.
//!
//! The engine treats a [`Query`] as opaque apart from its table and, for
//! purges, the id set its filter is constrained to. Translation to a wire
//! format belongs to the remote client. [`Query::apply`] evaluates a query
//! in-process for data sources that keep rows as [`Item`]s.

use crate::{item::ID_FIELD, Item, ItemId, TableName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A row predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Filter {
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Gt { field: String, value: Value },
    Ge { field: String, value: Value },
    Lt { field: String, value: Value },
    Le { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    And { filters: Vec<Filter> },
    Or { filters: Vec<Filter> },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ge {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Match rows whose `id` is one of `ids`.
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::In {
            field: ID_FIELD.to_string(),
            values: ids.into_iter().map(|id| Value::String(id.into())).collect(),
        }
    }

    /// Conjunction of two filters, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And { mut filters } => {
                filters.push(other);
                Filter::And { filters }
            }
            first => Filter::And {
                filters: vec![first, other],
            },
        }
    }

    /// Evaluate the predicate against an item. Missing fields compare as null.
    pub fn matches(&self, item: &Item) -> bool {
        let field_cmp = |field: &str, value: &Value| {
            compare_values(item.get(field).unwrap_or(&Value::Null), value)
        };

        match self {
            Filter::Eq { field, value } => field_cmp(field, value) == Some(Ordering::Equal),
            Filter::Ne { field, value } => field_cmp(field, value) != Some(Ordering::Equal),
            Filter::Gt { field, value } => field_cmp(field, value) == Some(Ordering::Greater),
            Filter::Ge { field, value } => matches!(
                field_cmp(field, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lt { field, value } => field_cmp(field, value) == Some(Ordering::Less),
            Filter::Le { field, value } => matches!(
                field_cmp(field, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::In { field, values } => values
                .iter()
                .any(|v| field_cmp(field, v) == Some(Ordering::Equal)),
            Filter::And { filters } => filters.iter().all(|f| f.matches(item)),
            Filter::Or { filters } => filters.iter().any(|f| f.matches(item)),
        }
    }

    /// The set of ids this filter is constrained to, if it can be determined.
    ///
    /// `id == x` and `id in [..]` constrain directly; an `And` is constrained
    /// by the intersection of its constrained children. Anything else returns
    /// `None`, meaning "potentially every row".
    pub fn id_set(&self) -> Option<Vec<ItemId>> {
        match self {
            Filter::Eq { field, value } if field == ID_FIELD => {
                Some(value.as_str().map(str::to_string).into_iter().collect())
            }
            Filter::In { field, values } if field == ID_FIELD => Some(
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            ),
            Filter::And { filters } => {
                let mut constrained: Option<Vec<ItemId>> = None;
                for ids in filters.iter().filter_map(Filter::id_set) {
                    constrained = Some(match constrained {
                        None => ids,
                        Some(prev) => prev.into_iter().filter(|id| ids.contains(id)).collect(),
                    });
                }
                constrained
            }
            _ => None,
        }
    }
}

/// Order values of the same JSON kind. Values of different kinds, arrays and
/// objects are unordered, except that null equals null.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Predicate, ordering and paging against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub table: TableName,
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    pub skip: Option<usize>,
    pub top: Option<usize>,
    pub include_total_count: bool,
}

impl Query {
    /// A query matching every row of `table`.
    pub fn table(table: impl Into<TableName>) -> Self {
        Self {
            table: table.into(),
            filter: None,
            order_by: Vec::new(),
            skip: None,
            top: None,
            include_total_count: false,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add a filter, combining with any existing one.
    pub fn and_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    pub fn with_total_count(mut self) -> Self {
        self.include_total_count = true;
        self
    }

    /// Check whether an item satisfies the filter.
    pub fn matches(&self, item: &Item) -> bool {
        self.filter.as_ref().map_or(true, |f| f.matches(item))
    }

    /// Evaluate this query over a table's rows.
    pub fn apply<'a, I>(&self, rows: I) -> ReadResult
    where
        I: IntoIterator<Item = &'a Item>,
    {
        let mut items: Vec<Item> = rows
            .into_iter()
            .filter(|item| self.matches(item))
            .cloned()
            .collect();

        if !self.order_by.is_empty() {
            items.sort_by(|a, b| {
                for key in &self.order_by {
                    let ord = compare_values(
                        a.get(&key.field).unwrap_or(&Value::Null),
                        b.get(&key.field).unwrap_or(&Value::Null),
                    )
                    .unwrap_or(Ordering::Equal);
                    let ord = if key.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let total_count = self.include_total_count.then_some(items.len());
        let items = items
            .into_iter()
            .skip(self.skip.unwrap_or(0))
            .take(self.top.unwrap_or(usize::MAX))
            .collect();

        ReadResult { items, total_count }
    }
}

/// Rows returned by a local read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadResult {
    pub items: Vec<Item>,
    /// Count before skip/top, when requested.
    pub total_count: Option<usize>,
}
