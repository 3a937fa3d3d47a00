//! Read-only retrieval: generated queries, merged and ranked, no write-back.

use std::sync::Arc;
use tracing::debug;

use super::namespace::{NamespaceTemplate, RunContext};
use super::search::{merge_results, run_queries};
use super::types::Message;
use crate::config::{ExecutionMode, DEFAULT_NAMESPACE, DEFAULT_QUERY_LIMIT};
use crate::error::Result;
use crate::extractor::QueryGenerator;
use crate::store::{MemoryStore, StoreItem};

pub struct MemorySearcher {
    query_generator: Arc<dyn QueryGenerator>,
    namespace: NamespaceTemplate,
    /// Per-query result limit
    limit: usize,
    execution: ExecutionMode,
}

impl MemorySearcher {
    pub fn new(query_generator: Arc<dyn QueryGenerator>) -> Result<Self> {
        let namespace: Vec<String> = DEFAULT_NAMESPACE.iter().map(|s| s.to_string()).collect();
        Self::with_namespace(query_generator, &namespace)
    }

    pub fn with_namespace(
        query_generator: Arc<dyn QueryGenerator>,
        namespace: &[String],
    ) -> Result<Self> {
        Ok(Self {
            query_generator,
            namespace: NamespaceTemplate::parse(namespace)?,
            limit: DEFAULT_QUERY_LIMIT,
            execution: ExecutionMode::default(),
        })
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    /// Every distinct match across all queries, highest score first
    pub async fn search(
        &self,
        store: &dyn MemoryStore,
        messages: &[Message],
        run: &RunContext,
    ) -> Result<Vec<StoreItem>> {
        let namespace = self.namespace.resolve(run)?;
        let queries = self.query_generator.generate_queries(messages).await?;
        let results = run_queries(store, &namespace, &queries, self.limit, self.execution).await?;
        let merged = merge_results(results, None);
        debug!("Searcher found {} memories for {} queries", merged.len(), queries.len());
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::FixedQueries;
    use crate::store::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_search_merges_without_truncation() {
        let store = InMemoryStore::new();
        let ns = vec!["memories".to_string(), "u1".to_string()];
        for (key, text) in [("a", "likes sushi"), ("b", "sushi and chess"), ("c", "plays chess")] {
            store
                .put(&ns, key, json!({"kind": "Memory", "content": {"content": text}}))
                .await
                .unwrap();
        }
        let other = vec!["memories".to_string(), "u2".to_string()];
        store
            .put(&other, "z", json!({"kind": "Memory", "content": {"content": "sushi"}}))
            .await
            .unwrap();

        let searcher = MemorySearcher::new(Arc::new(FixedQueries::new(&["sushi", "chess"])))
            .unwrap()
            .with_limit(2);

        let items = searcher
            .search(&store, &[Message::user("hi")], &RunContext::for_user("u1"))
            .await
            .unwrap();

        let mut keys: Vec<_> = items.iter().map(|i| i.key.as_str()).collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert!(items.iter().all(|i| i.namespace == ns));
    }
}
