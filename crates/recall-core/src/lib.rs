//! ============================================================================
//! RECALL-CORE: Long-term memory reconciliation
//! ============================================================================
//! This crate keeps a namespaced memory store in sync with conversations:
//! - Search-based location of existing memories via generated queries
//! - Tool-calling extraction of inserts, updates and deletes
//! - Multi-phase refinement and diffed write-back
//! - Embedded redb store plus an in-memory store for tests and embedding
//! ============================================================================

pub mod config;
pub mod error;
pub mod extractor;
pub mod memory;
pub mod store;

// Re-export main types for convenience
pub use config::{EnricherConfig, ExecutionMode, LlmConfig, MemoryPhase};
pub use error::{MemoryError, Result};
pub use extractor::{Extractor, LlmClient, MemorySchema, QueryGenerator, StructuredOutput};
pub use memory::{
    EnrichmentOutcome, MemoryEnricher, MemorySearcher, MemoryStoreEnricher, Message, Record,
    RunContext, ThreadSummarizer,
};
pub use store::{InMemoryStore, MemoryStore, RedbStore};
