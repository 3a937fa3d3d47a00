//! ============================================================================
//! Extractor Module - Structured-output collaborators
//! ============================================================================
//! The reconciliation engine talks to the model through two traits:
//! - `Extractor`: conversation + existing records -> insert/update/delete ops
//! - `QueryGenerator`: conversation -> search queries for existing records
//! - `StructuredOutput`: one forced call against a single schema
//!
//! `LlmClient` implements all three over an OpenAI-compatible tool-calling API.
//! ============================================================================

mod llm;
mod retry;

pub use llm::{LlmClient, REMOVE_DOC_TOOL, SEARCH_TOOL};
pub use retry::{calculate_delay, classify_error, retry_async, ErrorKind, RetryConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::memory::{ExtractedOperation, Message, OperationPayload, Record, DEFAULT_KIND};
use crate::store::SearchRequest;

/// A memory schema offered to the model as a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySchema {
    /// Tool name, also used as the record kind
    pub name: String,
    pub description: String,
    /// JSON Schema of the content object
    pub parameters: Value,
}

impl MemorySchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Free-text memory schema used when no schema is configured
    pub fn memory() -> Self {
        Self::new(
            DEFAULT_KIND,
            "Call this tool once for each new memory you want to record. \
             Use multi-tool calling to record multiple new memories.",
            json!({
                "type": "object",
                "properties": {
                    "content": {
                        "type": "string",
                        "description": "The memory as a well-written, standalone episode/fact/note/preference/etc. \
                            Refer to the user's instructions for more information the preferred memory organization."
                    }
                },
                "required": ["content"]
            }),
        )
    }
}

/// Input for one structured-output extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    /// Empty when the phase excludes the conversation
    pub messages: Vec<Message>,
    /// Candidate records the model may update or delete
    pub existing: Vec<Record>,
    pub instructions: String,
    pub enable_inserts: bool,
    pub enable_deletes: bool,
}

/// Per-response metadata from the structured-output call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Id of the existing record this response updates or deletes
    #[serde(default)]
    pub json_doc_id: Option<String>,
}

impl ResponseMetadata {
    pub fn for_doc(id: impl Into<String>) -> Self {
        Self {
            json_doc_id: Some(id.into()),
        }
    }
}

/// Raw output of an extractor: parallel lists of payloads and metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResponse {
    pub responses: Vec<OperationPayload>,
    pub metadata: Vec<ResponseMetadata>,
}

impl ExtractionResponse {
    pub fn push(&mut self, payload: OperationPayload, metadata: ResponseMetadata) {
        self.responses.push(payload);
        self.metadata.push(metadata);
    }

    /// Pair payloads with their ids. Responses without a `json_doc_id` are
    /// new records and get a fresh id.
    pub fn into_operations(self) -> Vec<ExtractedOperation> {
        let mut metadata = self.metadata.into_iter();
        self.responses
            .into_iter()
            .map(|payload| {
                let doc_id = metadata.next().and_then(|m| m.json_doc_id);
                let id = match &payload {
                    OperationPayload::Delete { target } => target.clone(),
                    OperationPayload::Upsert { .. } => {
                        doc_id.unwrap_or_else(|| Uuid::new_v4().to_string())
                    }
                };
                ExtractedOperation { id, payload }
            })
            .collect()
    }
}

/// One search the query generator wants issued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub filter: Option<Map<String, Value>>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filter: None,
        }
    }

    /// Store request for this query with the run's shared limit
    pub fn to_request(&self, limit: usize) -> SearchRequest {
        SearchRequest {
            query: Some(self.query.clone()),
            filter: self.filter.clone(),
            limit,
            offset: 0,
        }
    }
}

/// Turns a conversation plus candidate records into proposed operations.
///
/// Implementations own their retry policy and fail with
/// `MemoryError::Extraction` once it is exhausted. An extractor should not
/// emit inserts or deletes that the request disables.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResponse>;
}

/// Produces search queries for locating existing memories
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate_queries(&self, messages: &[Message]) -> Result<Vec<SearchQuery>>;
}

/// A single forced call against one schema, returning the filled arguments
#[async_trait]
pub trait StructuredOutput: Send + Sync {
    async fn structured_call(
        &self,
        instructions: &str,
        user_content: &str,
        schema: &MemorySchema,
    ) -> Result<Value>;
}
