//! ============================================================================
//! Memory Module - Reconcile conversations against long-term memory
//! ============================================================================
//! Turns a conversation into inserts, updates and deletes over records kept
//! in a namespaced key-value store.
//!
//! ## Flow
//! ```text
//! Conversation → QueryGenerator → store.search (per query)
//!                                        ↓
//!                     dedup + rank + truncate → StoreSnapshot
//!                                        ↓
//!          primary phase → refinement phases (Extractor + merge)
//!                                        ↓
//!                        diff → puts / deletes → store
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use recall_core::memory::{MemoryStoreEnricher, Message, RunContext};
//!
//! let client = Arc::new(LlmClient::new(LlmConfig::from_env()?));
//! let enricher = MemoryStoreEnricher::new(client.clone(), client, EnricherConfig::default())?;
//!
//! let outcome = enricher
//!     .enrich(&store, &[Message::user("I prefer sushi now")], &RunContext::for_user("u1"))
//!     .await?;
//! ```
//! ============================================================================

mod enricher;
mod merge;
mod namespace;
mod phases;
mod plan;
mod search;
mod searcher;
mod store_enricher;
mod thread;
mod types;

#[cfg(test)]
mod testing;

pub use enricher::{ExistingMemory, MemoryEnricher};
pub use merge::{apply_operations, ReconcileState};
pub use namespace::{NamespaceTemplate, RunContext};
pub use phases::{run_phases, PhaseSpec};
pub use plan::{apply_plan, plan_mutations, MutationFailure, MutationPlan};
pub use search::{merge_results, run_queries, stable_id, SnapshotEntry, StoreSnapshot};
pub use searcher::MemorySearcher;
pub use store_enricher::{EnrichmentOutcome, EnrichmentPlan, MemoryStoreEnricher};
pub use thread::{ThreadSummarizer, ThreadSummary};
pub use types::{
    format_conversation, DeleteOp, ExtractedOperation, MemoryValue, Message, OperationPayload,
    PendingMutation, PutOp, Record, DEFAULT_KIND,
};
