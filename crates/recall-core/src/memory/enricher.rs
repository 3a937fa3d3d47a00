//! Single-pass extraction over caller-supplied memories, no store involved.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::merge::ReconcileState;
use super::search::StoreSnapshot;
use super::types::{Message, OperationPayload, Record};
use crate::config::MEMORY_INSTRUCTIONS;
use crate::error::Result;
use crate::extractor::{ExtractionRequest, Extractor};

/// An existing memory handed in by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExistingMemory {
    Text(String),
    Record(Record),
}

impl ExistingMemory {
    pub fn into_record(self) -> Record {
        match self {
            ExistingMemory::Text(text) => Record::from_text(&text),
            ExistingMemory::Record(record) => record,
        }
    }
}

impl From<&str> for ExistingMemory {
    fn from(text: &str) -> Self {
        ExistingMemory::Text(text.to_string())
    }
}

impl From<String> for ExistingMemory {
    fn from(text: String) -> Self {
        ExistingMemory::Text(text)
    }
}

impl From<Record> for ExistingMemory {
    fn from(record: Record) -> Self {
        ExistingMemory::Record(record)
    }
}

pub struct MemoryEnricher {
    extractor: Arc<dyn Extractor>,
    instructions: String,
    enable_inserts: bool,
    enable_deletes: bool,
}

impl MemoryEnricher {
    pub fn new(extractor: Arc<dyn Extractor>) -> Self {
        Self {
            extractor,
            instructions: MEMORY_INSTRUCTIONS.to_string(),
            enable_inserts: true,
            enable_deletes: false,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_flags(mut self, enable_inserts: bool, enable_deletes: bool) -> Self {
        self.enable_inserts = enable_inserts;
        self.enable_deletes = enable_deletes;
        self
    }

    /// Records written or rewritten by the model, followed by every existing
    /// record it left alone. Deleted records are omitted.
    pub async fn enrich(
        &self,
        messages: &[Message],
        existing: Vec<ExistingMemory>,
    ) -> Result<Vec<Record>> {
        let existing: Vec<Record> = existing.into_iter().map(ExistingMemory::into_record).collect();

        let request = ExtractionRequest {
            messages: messages.to_vec(),
            existing: existing.clone(),
            instructions: self.instructions.clone(),
            enable_inserts: self.enable_inserts,
            enable_deletes: self.enable_deletes,
        };
        let operations = self.extractor.extract(&request).await?.into_operations();
        debug!("Extractor proposed {} operations", operations.len());

        let mut state = ReconcileState {
            ephemeral: existing,
            ..Default::default()
        };
        state.apply(&operations, &StoreSnapshot::default());

        let mut touched = HashSet::new();
        let mut records = Vec::new();
        for op in &operations {
            if !matches!(op.payload, OperationPayload::Upsert { .. }) || !touched.insert(op.id.as_str()) {
                continue;
            }
            if let Some(record) = state.ephemeral.iter().find(|r| r.id == op.id) {
                records.push(record.clone());
            }
        }
        records.extend(
            state
                .ephemeral
                .iter()
                .filter(|r| !touched.contains(r.id.as_str()))
                .cloned(),
        );

        Ok(records)
    }
}
