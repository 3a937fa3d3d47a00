//! ============================================================================
//! Configuration - Model endpoint, enrichment and phase settings
//! ============================================================================
//! `LlmConfig` is read from the environment (a `.env` file is loaded by the
//! CLI). `EnricherConfig` is plain serde data so it can live in a JSON file.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{MemoryError, Result};
use crate::extractor::RetryConfig;

/// Override for the store location
pub const DB_PATH_ENV: &str = "RECALL_DB_PATH";
/// Primary model endpoint credentials
pub const API_KEY_ENV: &str = "RECALL_API_KEY";
pub const BASE_URL_ENV: &str = "RECALL_BASE_URL";
pub const MODEL_ENV: &str = "RECALL_MODEL";
pub const QUERY_MODEL_ENV: &str = "RECALL_QUERY_MODEL";
/// Fallback credentials
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default extraction instructions for the primary phase
pub const MEMORY_INSTRUCTIONS: &str = "You are tasked with extracting or upserting memories for all entities, concepts, etc.\n\n\
Extract all important facts or entities. If an existing MEMORY is incorrect or outdated, update it based on the new information.";

/// Instructions used by a refinement phase that does not set its own
pub const PHASE_INSTRUCTIONS: &str =
    "You are a memory manager. Deduplicate, consolidate, and enrich these memories.";

/// Default namespace template: one namespace per user
pub const DEFAULT_NAMESPACE: [&str; 2] = ["memories", "{user_id}"];

pub const DEFAULT_QUERY_LIMIT: usize = 5;

/// Connection settings for an OpenAI-compatible chat completions API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub base_url: String,
    /// Model used for extraction and summaries
    pub model: String,
    /// Optional cheaper model for search query generation
    #[serde(default)]
    pub query_model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl LlmConfig {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            query_model: None,
            temperature: Some(0.0),
            max_tokens: Some(4096),
            retry: RetryConfig::default(),
        }
    }

    /// Build from the environment, trying RECALL_* first, then OpenAI
    pub fn from_env() -> Result<Self> {
        let model = std::env::var(MODEL_ENV).unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let query_model = std::env::var(QUERY_MODEL_ENV).ok().filter(|m| !m.is_empty());

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                let base_url =
                    std::env::var(BASE_URL_ENV).unwrap_or_else(|_| OPENAI_BASE_URL.to_string());
                debug!("Using {} for model calls", base_url);
                let mut config = Self::new(key, base_url, model);
                config.query_model = query_model;
                return Ok(config);
            }
        }

        if let Ok(key) = std::env::var(OPENAI_API_KEY_ENV) {
            if !key.is_empty() {
                warn!("{} not set, falling back to OpenAI", API_KEY_ENV);
                let mut config = Self::new(key, OPENAI_BASE_URL.to_string(), model);
                config.query_model = query_model;
                return Ok(config);
            }
        }

        Err(MemoryError::Config(format!(
            "No model API key available (tried {} and {})",
            API_KEY_ENV, OPENAI_API_KEY_ENV
        )))
    }

    /// Model used for search query generation
    pub fn query_model(&self) -> &str {
        self.query_model.as_deref().unwrap_or(&self.model)
    }
}

/// How independent I/O inside a run is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Fire all searches / mutations, then wait for all of them
    #[default]
    Concurrent,
    /// Await each call in order
    Sequential,
}

/// One refinement round after the primary extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPhase {
    #[serde(default)]
    pub instructions: Option<String>,
    /// Whether the phase sees the original conversation
    #[serde(default)]
    pub include_messages: bool,
    #[serde(default = "default_true")]
    pub enable_inserts: bool,
    #[serde(default = "default_true")]
    pub enable_deletes: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MemoryPhase {
    fn default() -> Self {
        Self {
            instructions: None,
            include_messages: false,
            enable_inserts: true,
            enable_deletes: true,
        }
    }
}

impl MemoryPhase {
    /// A phase with its own instructions and default flags
    pub fn with_instructions(instructions: impl Into<String>) -> Self {
        Self {
            instructions: Some(instructions.into()),
            ..Default::default()
        }
    }

    pub fn instructions(&self) -> &str {
        self.instructions.as_deref().unwrap_or(PHASE_INSTRUCTIONS)
    }
}

/// Settings for a store-backed enrichment run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnricherConfig {
    #[serde(default = "default_instructions")]
    pub instructions: String,
    #[serde(default = "default_true")]
    pub enable_inserts: bool,
    #[serde(default = "default_true")]
    pub enable_deletes: bool,
    /// Maximum number of existing memories handed to the extractor
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
    /// Namespace template, e.g. `["memories", "{user_id}"]`
    #[serde(default = "default_namespace")]
    pub namespace: Vec<String>,
    #[serde(default)]
    pub phases: Vec<MemoryPhase>,
    #[serde(default)]
    pub execution: ExecutionMode,
}

fn default_instructions() -> String {
    MEMORY_INSTRUCTIONS.to_string()
}

fn default_query_limit() -> usize {
    DEFAULT_QUERY_LIMIT
}

fn default_namespace() -> Vec<String> {
    DEFAULT_NAMESPACE.iter().map(|s| s.to_string()).collect()
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            instructions: default_instructions(),
            enable_inserts: true,
            enable_deletes: true,
            query_limit: DEFAULT_QUERY_LIMIT,
            namespace: default_namespace(),
            phases: Vec::new(),
            execution: ExecutionMode::default(),
        }
    }
}

impl EnricherConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MemoryError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            MemoryError::Config(format!("Invalid enricher config {}: {}", path.display(), e))
        })
    }

    pub fn with_phase(mut self, phase: MemoryPhase) -> Self {
        self.phases.push(phase);
        self
    }
}
