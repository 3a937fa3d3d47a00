//! ============================================================================
//! Search Aggregation - Store snapshot for a reconciliation run
//! ============================================================================
//! Runs the generated queries, collapses duplicates by (namespace, key), ranks
//! by score and keys every surviving entry by its stable id.
//! ============================================================================

use futures_util::future::try_join_all;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::types::{MemoryValue, Record};
use crate::config::ExecutionMode;
use crate::error::Result;
use crate::extractor::SearchQuery;
use crate::store::{MemoryStore, StoreItem};

/// Deterministic record id for a store entry.
///
/// Version-5 UUID over a length-prefixed encoding of the namespace segments
/// and key, rendered as 32 hex characters.
pub fn stable_id(namespace: &[String], key: &str) -> String {
    let mut name = String::new();
    for segment in namespace.iter().map(String::as_str).chain(std::iter::once(key)) {
        name.push_str(&segment.len().to_string());
        name.push(':');
        name.push_str(segment);
        name.push('|');
    }
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes())
        .simple()
        .to_string()
}

/// Issue every query against `namespace`, in parallel or in order.
///
/// Results come back in query order either way.
pub async fn run_queries(
    store: &dyn MemoryStore,
    namespace: &[String],
    queries: &[SearchQuery],
    limit: usize,
    mode: ExecutionMode,
) -> Result<Vec<Vec<StoreItem>>> {
    debug!(
        "Running {} search queries under {:?} ({:?})",
        queries.len(),
        namespace,
        mode
    );

    match mode {
        ExecutionMode::Concurrent => {
            let requests: Vec<_> = queries.iter().map(|q| q.to_request(limit)).collect();
            try_join_all(requests.iter().map(|r| store.search(namespace, r))).await
        }
        ExecutionMode::Sequential => {
            let mut results = Vec::with_capacity(queries.len());
            for query in queries {
                results.push(store.search(namespace, &query.to_request(limit)).await?);
            }
            Ok(results)
        }
    }
}

/// Deduplicate by (namespace, key) and sort by score, highest first.
///
/// A later duplicate replaces the earlier value but keeps its position. A
/// missing score ranks below every present score; ties keep dedup order.
pub fn merge_results(result_lists: Vec<Vec<StoreItem>>, limit: Option<usize>) -> Vec<StoreItem> {
    let mut merged: Vec<StoreItem> = Vec::new();
    let mut positions: HashMap<(Vec<String>, String), usize> = HashMap::new();

    for item in result_lists.into_iter().flatten() {
        let entry_key = (item.namespace.clone(), item.key.clone());
        match positions.get(&entry_key) {
            Some(&pos) => merged[pos] = item,
            None => {
                positions.insert(entry_key, merged.len());
                merged.push(item);
            }
        }
    }

    merged.sort_by(|a, b| {
        let a = a.score.unwrap_or(f64::NEG_INFINITY);
        let b = b.score.unwrap_or(f64::NEG_INFINITY);
        b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
    });

    if let Some(limit) = limit {
        merged.truncate(limit);
    }
    merged
}

/// A store entry located at the start of a run
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub id: String,
    pub item: StoreItem,
}

impl SnapshotEntry {
    pub fn value(&self) -> MemoryValue {
        MemoryValue::from_value(&self.item.value)
    }

    /// The record this entry seeds the run with
    pub fn to_record(&self) -> Record {
        let value = self.value();
        Record::new(self.id.clone(), value.kind, value.content)
    }
}

/// Original store state of a run, keyed by stable id in rank order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    entries: Vec<SnapshotEntry>,
    index: HashMap<String, usize>,
}

impl StoreSnapshot {
    /// Aggregate raw query results into a snapshot of at most `limit` entries
    pub fn from_results(result_lists: Vec<Vec<StoreItem>>, limit: usize) -> Self {
        Self::from_items(merge_results(result_lists, Some(limit)))
    }

    pub fn from_items(items: Vec<StoreItem>) -> Self {
        let mut snapshot = Self::default();
        for item in items {
            let id = stable_id(&item.namespace, &item.key);
            if snapshot.index.contains_key(&id) {
                continue;
            }
            snapshot.index.insert(id.clone(), snapshot.entries.len());
            snapshot.entries.push(SnapshotEntry { id, item });
        }
        snapshot
    }

    pub fn get(&self, id: &str) -> Option<&SnapshotEntry> {
        self.index.get(id).map(|&pos| &self.entries[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store-backed records to seed the first phase with
    pub fn records(&self) -> Vec<Record> {
        self.entries.iter().map(SnapshotEntry::to_record).collect()
    }
}
