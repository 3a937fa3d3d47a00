//! ============================================================================
//! Store Module - Namespaced key-value store collaborators
//! ============================================================================
//! The reconciliation engine only relies on the `MemoryStore` contract:
//! namespaced search / get / put / delete. Two backends ship with the crate:
//!
//! - `InMemoryStore`: process-local map, handy for embedding and tests
//! - `RedbStore`: embedded redb database on disk
//!
//! ## Usage
//! ```rust,ignore
//! use recall_core::store::{MemoryStore, RedbStore, SearchRequest};
//!
//! let store = RedbStore::open(None)?;
//! store.put(&ns, "prefs", json!({"kind": "Memory", "content": {"content": "likes sushi"}})).await?;
//! let hits = store.search(&ns, &SearchRequest::query("sushi", 5)).await?;
//! ```
//! ============================================================================

mod memory;
mod redb_store;

pub use memory::InMemoryStore;
pub use redb_store::{NamespaceStats, RedbStore, StoreStats};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::error::Result;
use crate::memory::MemoryValue;

/// Default number of results for a search without an explicit limit
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// An entry returned from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreItem {
    pub namespace: Vec<String>,
    pub key: String,
    pub value: Value,
    /// Unix timestamp of the first write
    pub created_at: i64,
    /// Unix timestamp of the latest write
    pub updated_at: i64,
    /// Relevance score, only set for query searches
    #[serde(default)]
    pub score: Option<f64>,
}

/// Arguments for a ranked search under a namespace prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,
    /// Field equality filter against the value's `content` object
    #[serde(default)]
    pub filter: Option<Map<String, Value>>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: None,
            filter: None,
            limit: DEFAULT_SEARCH_LIMIT,
            offset: 0,
        }
    }
}

impl SearchRequest {
    pub fn query(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: Some(query.into()),
            limit,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: Map<String, Value>) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Namespaced key-value store with ranked search.
///
/// Reads fail with `MemoryError::StoreRead`, writes with `MemoryError::StoreWrite`.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Search every namespace that starts with `namespace_prefix`
    async fn search(
        &self,
        namespace_prefix: &[String],
        request: &SearchRequest,
    ) -> Result<Vec<StoreItem>>;

    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<StoreItem>>;

    /// Insert or overwrite `(namespace, key)`
    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<()>;

    /// Remove `(namespace, key)`; removing a missing key is not an error
    async fn delete(&self, namespace: &[String], key: &str) -> Result<()>;
}

/// Split a `a/b/c` CLI-style namespace into segments
pub fn parse_namespace(raw: &str) -> Vec<String> {
    raw.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Apply filter, scoring, ordering and pagination to candidate items.
///
/// Shared by the bundled backends so they rank identically.
pub(crate) fn rank_items(items: Vec<StoreItem>, request: &SearchRequest) -> Vec<StoreItem> {
    let terms = request
        .query
        .as_deref()
        .map(query_terms)
        .unwrap_or_default();

    let mut ranked: Vec<StoreItem> = items
        .into_iter()
        .filter(|item| {
            request
                .filter
                .as_ref()
                .map_or(true, |f| matches_filter(&item.value, f))
        })
        .filter_map(|mut item| {
            if terms.is_empty() {
                item.score = None;
                return Some(item);
            }
            let score = score_value(&item.value, &terms);
            if score <= 0.0 {
                return None;
            }
            item.score = Some(score);
            Some(item)
        })
        .collect();

    if terms.is_empty() {
        ranked.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    } else {
        ranked.sort_by(|a, b| {
            b.score
                .unwrap_or(0.0)
                .partial_cmp(&a.score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    ranked
        .into_iter()
        .skip(request.offset)
        .take(request.limit)
        .collect()
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in tokens(query) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Collect tokens from string leaves only; object keys never match.
fn collect_tokens(value: &Value, out: &mut HashSet<String>) {
    match value {
        Value::String(s) => out.extend(tokens(s)),
        Value::Array(values) => values.iter().for_each(|v| collect_tokens(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_tokens(v, out)),
        _ => {}
    }
}

/// Fraction of query terms present as whole tokens in the memory content
fn score_value(value: &Value, terms: &[String]) -> f64 {
    let mut words = HashSet::new();
    collect_tokens(&MemoryValue::from_value(value).content, &mut words);
    let hits = terms.iter().filter(|t| words.contains(t.as_str())).count();
    hits as f64 / terms.len() as f64
}

fn matches_filter(value: &Value, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(field, expected)| {
        let actual = value
            .get("content")
            .and_then(|c| c.get(field))
            .or_else(|| value.get(field));
        actual == Some(expected)
    })
}
