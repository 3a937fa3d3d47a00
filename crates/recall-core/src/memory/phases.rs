//! Phase orchestration: one primary extraction over the conversation, then
//! zero or more refinement phases over the evolving record set.

use tracing::{debug, info};

use super::merge::ReconcileState;
use super::search::StoreSnapshot;
use super::types::Message;
use crate::config::MemoryPhase;
use crate::error::Result;
use crate::extractor::{ExtractionRequest, Extractor};

/// Settings for one extraction round
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSpec {
    pub instructions: String,
    pub include_messages: bool,
    pub enable_inserts: bool,
    pub enable_deletes: bool,
}

impl PhaseSpec {
    /// The primary phase always sees the conversation
    pub fn primary(instructions: &str, enable_inserts: bool, enable_deletes: bool) -> Self {
        Self {
            instructions: instructions.to_string(),
            include_messages: true,
            enable_inserts,
            enable_deletes,
        }
    }
}

impl From<&MemoryPhase> for PhaseSpec {
    fn from(phase: &MemoryPhase) -> Self {
        Self {
            instructions: phase.instructions().to_string(),
            include_messages: phase.include_messages,
            enable_inserts: phase.enable_inserts,
            enable_deletes: phase.enable_deletes,
        }
    }
}

/// Run `phases` in order, threading the record sets through each one.
///
/// Any extractor failure aborts the run before anything is persisted.
pub async fn run_phases(
    extractor: &dyn Extractor,
    messages: &[Message],
    snapshot: &StoreSnapshot,
    phases: &[PhaseSpec],
) -> Result<ReconcileState> {
    let mut state = ReconcileState::from_snapshot(snapshot);

    for (index, phase) in phases.iter().enumerate() {
        let request = ExtractionRequest {
            messages: if phase.include_messages {
                messages.to_vec()
            } else {
                Vec::new()
            },
            existing: state.candidates(),
            instructions: phase.instructions.clone(),
            enable_inserts: phase.enable_inserts,
            enable_deletes: phase.enable_deletes,
        };

        debug!(
            "Phase {}: {} candidates, messages={}",
            index,
            request.existing.len(),
            phase.include_messages
        );

        let operations = extractor.extract(&request).await?.into_operations();
        state.apply(&operations, snapshot);

        info!(
            "Phase {} applied {} operations ({} store-backed, {} new, {} retired)",
            index,
            operations.len(),
            state.store_based.len(),
            state.ephemeral.len(),
            state.retired.len()
        );
    }

    Ok(state)
}
