//! ============================================================================
//! In-Memory Store - Process-local MemoryStore backend
//! ============================================================================

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::{rank_items, MemoryStore, SearchRequest, StoreItem};
use crate::error::Result;

type ItemKey = (Vec<String>, String);

/// Memory store kept entirely in process memory
#[derive(Default)]
pub struct InMemoryStore {
    items: RwLock<BTreeMap<ItemKey, StoreItem>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items across all namespaces
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Snapshot of every stored item, ordered by (namespace, key)
    pub async fn items(&self) -> Vec<StoreItem> {
        self.items.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn search(
        &self,
        namespace_prefix: &[String],
        request: &SearchRequest,
    ) -> Result<Vec<StoreItem>> {
        let candidates: Vec<StoreItem> = self
            .items
            .read()
            .await
            .values()
            .filter(|item| item.namespace.starts_with(namespace_prefix))
            .cloned()
            .collect();

        let results = rank_items(candidates, request);
        debug!(
            "In-memory search under {:?} returned {} items",
            namespace_prefix,
            results.len()
        );
        Ok(results)
    }

    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<StoreItem>> {
        let items = self.items.read().await;
        Ok(items.get(&(namespace.to_vec(), key.to_string())).cloned())
    }

    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut items = self.items.write().await;
        let entry_key = (namespace.to_vec(), key.to_string());
        let created_at = items.get(&entry_key).map_or(now, |i| i.created_at);

        items.insert(
            entry_key,
            StoreItem {
                namespace: namespace.to_vec(),
                key: key.to_string(),
                value,
                created_at,
                updated_at: now,
                score: None,
            },
        );
        Ok(())
    }

    async fn delete(&self, namespace: &[String], key: &str) -> Result<()> {
        self.items
            .write()
            .await
            .remove(&(namespace.to_vec(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ns(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryStore::new();
        let namespace = ns(&["memories", "u1"]);

        store
            .put(&namespace, "k1", json!({"content": "likes sushi"}))
            .await
            .unwrap();
        let item = store.get(&namespace, "k1").await.unwrap().unwrap();
        assert_eq!(item.value["content"], "likes sushi");

        store.delete(&namespace, "k1").await.unwrap();
        assert!(store.get(&namespace, "k1").await.unwrap().is_none());
        // Deleting twice is fine
        store.delete(&namespace, "k1").await.unwrap();
    }

    #[tokio::test]
    async fn test_search_respects_namespace_prefix() {
        let store = InMemoryStore::new();
        store
            .put(&ns(&["memories", "u1"]), "a", json!({"content": "sushi"}))
            .await
            .unwrap();
        store
            .put(&ns(&["memories", "u2"]), "b", json!({"content": "sushi"}))
            .await
            .unwrap();

        let u1 = store
            .search(&ns(&["memories", "u1"]), &SearchRequest::query("sushi", 10))
            .await
            .unwrap();
        assert_eq!(u1.len(), 1);
        assert_eq!(u1[0].key, "a");

        let all = store
            .search(&ns(&["memories"]), &SearchRequest::query("sushi", 10))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_created_at() {
        let store = InMemoryStore::new();
        let namespace = ns(&["memories"]);
        store.put(&namespace, "k", json!(1)).await.unwrap();
        let first = store.get(&namespace, "k").await.unwrap().unwrap();
        store.put(&namespace, "k", json!(2)).await.unwrap();
        let second = store.get(&namespace, "k").await.unwrap().unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.value, json!(2));
        assert_eq!(store.len().await, 1);
    }
}
