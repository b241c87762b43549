//! Listing query planner with seek pagination.
//!
//! Request parameters are parsed leniently: malformed or out-of-range values
//! fall back to defaults instead of failing. The planned statement is built
//! only from `'static` fragments; every caller-supplied value travels as a
//! bind parameter.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use serde::Serialize;
use tracing::debug;

use crate::{
    error::StoreError,
    source::ItemSource,
    sqlite::{Params, SqlQuery},
    value::{Row, Value},
};

pub const ITEMS_TABLE: &str = "items";
pub const ID_COLUMN: &str = "id";
pub const DEFAULT_PER_PAGE: u32 = 50;
pub const MAX_PER_PAGE: u32 = 200;

/// Columns that may be filtered by exact match, in predicate order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterField {
    Category,
    Material,
}

impl FilterField {
    pub const ALL: [FilterField; 2] = [FilterField::Category, FilterField::Material];

    /// Query-string parameter name, identical to the column name.
    pub fn param(self) -> &'static str {
        match self {
            FilterField::Category => "category",
            FilterField::Material => "material",
        }
    }

    pub fn from_param(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.param() == name)
    }

    fn predicate(self) -> &'static str {
        match self {
            FilterField::Category => "category = ?",
            FilterField::Material => "material = ?",
        }
    }
}

/// Active equality filters. Blank values never make it in.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FilterSet {
    filters: BTreeMap<FilterField, String>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `field` to the trimmed `value`, or clear it when blank.
    pub fn set(&mut self, field: FilterField, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            self.filters.remove(&field);
        } else {
            self.filters.insert(field, value.to_string());
        }
    }

    pub fn get(&self, field: FilterField) -> Option<&str> {
        self.filters.get(&field).map(String::as_str)
    }

    /// Active filters in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (FilterField, &str)> {
        self.filters.iter().map(|(field, value)| (*field, value.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    per_page: u32,
    after_id: Option<i64>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            after_id: None,
        }
    }
}

impl PageRequest {
    /// `per_page < 1` falls back to the default, `> MAX_PER_PAGE` is clamped.
    /// A non-positive `after_id` means the first page.
    pub fn new(per_page: i64, after_id: Option<i64>) -> Self {
        let per_page = if per_page < 1 {
            DEFAULT_PER_PAGE
        } else {
            per_page.min(i64::from(MAX_PER_PAGE)) as u32
        };
        Self {
            per_page,
            after_id: after_id.filter(|id| *id > 0),
        }
    }

    /// Parse raw query-string values; anything unparsable counts as absent.
    pub fn parse(per_page: Option<&str>, after_id: Option<&str>) -> Self {
        let per_page = per_page
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(i64::from(DEFAULT_PER_PAGE));
        let after_id = after_id.and_then(|raw| raw.parse::<i64>().ok());
        Self::new(per_page, after_id)
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn after_id(&self) -> Option<i64> {
        self.after_id
    }
}

/// Everything a listing call needs from the query string.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ListRequest {
    pub filters: FilterSet,
    pub page: PageRequest,
}

impl ListRequest {
    /// Build from decoded query-string pairs. Unknown keys are ignored and
    /// the first occurrence of a repeated key wins.
    pub fn from_query_pairs<K, V, I>(pairs: I) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in pairs {
            seen.entry(key.as_ref().to_string())
                .or_insert_with(|| value.as_ref().to_string());
        }

        let mut filters = FilterSet::new();
        for (key, value) in &seen {
            if let Some(field) = FilterField::from_param(key) {
                filters.set(field, value);
            }
        }
        let page = PageRequest::parse(
            seen.get("per_page").map(String::as_str),
            seen.get("after_id").map(String::as_str),
        );
        Self { filters, page }
    }

    /// Plan the parameterized SELECT for this request.
    pub fn plan(&self) -> SqlQuery {
        let mut predicates: Vec<&'static str> = vec!["1=1"];
        let mut params = Params::new();

        for (field, value) in self.filters.iter() {
            predicates.push(field.predicate());
            params.push(value);
        }
        if let Some(after_id) = self.page.after_id {
            predicates.push("id < ?");
            params.push(after_id);
        }
        params.push(self.page.per_page);

        let statement = format!(
            "SELECT * FROM {ITEMS_TABLE} WHERE {} ORDER BY {ID_COLUMN} DESC LIMIT ?",
            predicates.join(" AND ")
        );
        SqlQuery::new(statement).with_params(params)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageMeta {
    pub per_page: u32,
    pub count: usize,
    pub next_after_id: Option<Value>,
}

/// One page of listing results, shaped for the JSON response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub meta: PageMeta,
    pub items: Vec<Row>,
}

impl Page {
    /// `items` must already be in descending id order; the last row's id is
    /// the exclusive bound for the next page.
    pub fn new(per_page: u32, items: Vec<Row>) -> Self {
        let next_after_id = items.last().and_then(|row| row.get(ID_COLUMN)).cloned();
        Self {
            meta: PageMeta {
                per_page,
                count: items.len(),
                next_after_id,
            },
            items,
        }
    }
}

/// Plan, run and package one listing page. `budget` starts counting before
/// planning.
pub async fn list_items(
    source: &dyn ItemSource,
    request: &ListRequest,
    budget: Duration,
) -> Result<Page, StoreError> {
    let deadline = Instant::now() + budget;
    let query = request.plan();
    debug!(statement = %query.statement, "planned listing query");
    let items = source.fetch(query, deadline).await?;
    Ok(Page::new(request.page.per_page, items))
}
