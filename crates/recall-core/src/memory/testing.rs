//! Scripted collaborators for engine tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use super::types::{ExtractedOperation, Message};
use crate::error::{MemoryError, Result};
use crate::extractor::{
    ExtractionRequest, ExtractionResponse, Extractor, MemorySchema, QueryGenerator,
    ResponseMetadata, SearchQuery, StructuredOutput,
};
use crate::store::{InMemoryStore, MemoryStore, SearchRequest, StoreItem};

/// Replays one scripted result per call and records every request
pub struct ScriptedExtractor {
    script: Mutex<VecDeque<Result<Vec<ExtractedOperation>>>>,
    requests: Mutex<Vec<ExtractionRequest>>,
}

impl ScriptedExtractor {
    pub fn new(script: Vec<Result<Vec<ExtractedOperation>>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ExtractionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let operations = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))?;

        let mut response = ExtractionResponse::default();
        for op in operations {
            response.push(op.payload, ResponseMetadata::for_doc(op.id));
        }
        Ok(response)
    }
}

/// Always proposes the same queries
pub struct FixedQueries(pub Vec<SearchQuery>);

impl FixedQueries {
    pub fn new(queries: &[&str]) -> Self {
        Self(queries.iter().map(|q| SearchQuery::new(*q)).collect())
    }
}

#[async_trait]
impl QueryGenerator for FixedQueries {
    async fn generate_queries(&self, _messages: &[Message]) -> Result<Vec<SearchQuery>> {
        Ok(self.0.clone())
    }
}

/// Returns a canned value for every structured call
pub struct CannedOutput(pub Value);

#[async_trait]
impl StructuredOutput for CannedOutput {
    async fn structured_call(
        &self,
        _instructions: &str,
        _user_content: &str,
        _schema: &MemorySchema,
    ) -> Result<Value> {
        Ok(self.0.clone())
    }
}

/// In-memory store whose writes fail for chosen keys
pub struct FailingStore {
    pub inner: InMemoryStore,
    failing_keys: HashSet<String>,
    fail_search: bool,
}

impl FailingStore {
    pub fn new(inner: InMemoryStore, failing_keys: &[&str]) -> Self {
        Self {
            inner,
            failing_keys: failing_keys.iter().map(|k| k.to_string()).collect(),
            fail_search: false,
        }
    }

    pub fn failing_search(inner: InMemoryStore) -> Self {
        Self {
            inner,
            failing_keys: HashSet::new(),
            fail_search: true,
        }
    }
}

#[async_trait]
impl MemoryStore for FailingStore {
    async fn search(&self, namespace: &[String], request: &SearchRequest) -> Result<Vec<StoreItem>> {
        if self.fail_search {
            return Err(MemoryError::StoreRead("search unavailable".into()));
        }
        self.inner.search(namespace, request).await
    }

    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<StoreItem>> {
        self.inner.get(namespace, key).await
    }

    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<()> {
        if self.failing_keys.contains(key) {
            return Err(MemoryError::StoreWrite(format!("put {} rejected", key)));
        }
        self.inner.put(namespace, key, value).await
    }

    async fn delete(&self, namespace: &[String], key: &str) -> Result<()> {
        if self.failing_keys.contains(key) {
            return Err(MemoryError::StoreWrite(format!("delete {} rejected", key)));
        }
        self.inner.delete(namespace, key).await
    }
}
