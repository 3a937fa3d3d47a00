//! Conversation summaries via a single forced structured call.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::types::{format_conversation, Message};
use crate::error::{MemoryError, Result};
use crate::extractor::{MemorySchema, StructuredOutput};

const SUMMARY_INSTRUCTIONS: &str =
    "You are a thread summarizer. Summarize the conversation so it can be recalled later.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub title: String,
    pub summary: String,
}

impl ThreadSummary {
    pub fn schema() -> MemorySchema {
        MemorySchema::new(
            "ThreadSummary",
            "Record a short title and a concise summary of the conversation.",
            json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Short title for the thread" },
                    "summary": { "type": "string", "description": "Concise summary of the thread" }
                },
                "required": ["title", "summary"]
            }),
        )
    }
}

pub struct ThreadSummarizer {
    client: Arc<dyn StructuredOutput>,
    instructions: String,
}

impl ThreadSummarizer {
    pub fn new(client: Arc<dyn StructuredOutput>) -> Self {
        Self {
            client,
            instructions: SUMMARY_INSTRUCTIONS.to_string(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub async fn summarize(&self, messages: &[Message]) -> Result<ThreadSummary> {
        let value = self.summarize_with(messages, &ThreadSummary::schema()).await?;
        serde_json::from_value(value).map_err(|e| {
            MemoryError::Extraction(format!("Summary did not match ThreadSummary: {}", e))
        })
    }

    /// Summarize into a caller-provided schema, returned as raw JSON
    pub async fn summarize_with(&self, messages: &[Message], schema: &MemorySchema) -> Result<Value> {
        let content = format!(
            "Summarize the following thread:\n\n<thread>\n{}\n</thread>",
            format_conversation(messages)
        );
        self.client
            .structured_call(&self.instructions, &content, schema)
            .await
    }
}
