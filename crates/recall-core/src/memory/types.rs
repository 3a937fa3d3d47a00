//! ============================================================================
//! Memory Types - Records, operations and mutations
//! ============================================================================
//! Defines the reconciled record, the operations proposed by an extractor and
//! the store mutations a run produces.
//! ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Kind tag used when neither the extractor nor a prior record names one
pub const DEFAULT_KIND: &str = "Memory";

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// "user", "assistant", "system" or "tool"
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Render a conversation as `role: content` lines for prompting
pub fn format_conversation(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A reconciled unit of knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable id for store-backed records, extractor id for ephemeral ones
    pub id: String,
    /// Schema tag (e.g. "Memory", "PreferenceMemory")
    pub kind: String,
    /// Schema-dependent payload
    pub content: Value,
}

impl Record {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, content: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            content,
        }
    }

    /// Wrap a plain-text memory in the default schema under a fresh id
    pub fn from_text(text: &str) -> Self {
        Self::new(
            Uuid::new_v4().to_string(),
            DEFAULT_KIND,
            json!({ "content": text }),
        )
    }

    /// The `{kind, content}` pair persisted for this record
    pub fn value(&self) -> MemoryValue {
        MemoryValue {
            kind: self.kind.clone(),
            content: self.content.clone(),
        }
    }

    /// JSON view handed to the model as an existing memory
    pub fn to_prompt_json(&self) -> Value {
        json!({
            "id": self.id,
            "kind": self.kind,
            "content": self.content,
        })
    }
}

/// Value shape written to the store: `{"kind": ..., "content": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryValue {
    pub kind: String,
    pub content: Value,
}

impl MemoryValue {
    /// Read a stored value, tolerating entries written without the envelope
    pub fn from_value(value: &Value) -> Self {
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .unwrap_or(DEFAULT_KIND)
            .to_string();
        let content = match value.get("content") {
            Some(content) if value.get("kind").is_some() => content.clone(),
            _ => value.clone(),
        };
        Self { kind, content }
    }

    pub fn to_value(&self) -> Value {
        json!({ "kind": self.kind, "content": self.content })
    }
}

/// What an extractor proposes for a single id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationPayload {
    /// Insert or update content; `kind` is the schema the extractor used
    Upsert {
        kind: Option<String>,
        content: Value,
    },
    /// Retire the record with this id
    Delete { target: String },
}

/// An (operation id, payload) pair returned by an extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedOperation {
    pub id: String,
    pub payload: OperationPayload,
}

impl ExtractedOperation {
    /// A new record under a freshly generated id
    pub fn insert(kind: Option<&str>, content: Value) -> Self {
        Self::upsert(Uuid::new_v4().to_string(), kind, content)
    }

    pub fn upsert(id: impl Into<String>, kind: Option<&str>, content: Value) -> Self {
        Self {
            id: id.into(),
            payload: OperationPayload::Upsert {
                kind: kind.map(str::to_string),
                content,
            },
        }
    }

    pub fn delete(target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            id: target.clone(),
            payload: OperationPayload::Delete { target },
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.payload, OperationPayload::Delete { .. })
    }
}

/// A write against `(namespace, key)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutOp {
    pub namespace: Vec<String>,
    pub key: String,
    pub value: MemoryValue,
}

/// A removal of `(namespace, key)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteOp {
    pub namespace: Vec<String>,
    pub key: String,
}

/// A single store mutation planned by a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingMutation {
    Put(PutOp),
    Delete(DeleteOp),
}

impl PendingMutation {
    pub fn namespace(&self) -> &[String] {
        match self {
            PendingMutation::Put(p) => &p.namespace,
            PendingMutation::Delete(d) => &d.namespace,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            PendingMutation::Put(p) => &p.key,
            PendingMutation::Delete(d) => &d.key,
        }
    }
}
