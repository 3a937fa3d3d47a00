//! ============================================================================
//! Merge Engine - Applies extracted operations to the working record sets
//! ============================================================================
//! A run tracks two record sets:
//! - store-backed: located in the store at the start of the run, keyed by
//!   stable id, updated in place
//! - ephemeral: created during the run, persisted under the target namespace
//!   at the end
//!
//! Deletes are collected before any upsert in the same batch is applied, so a
//! delete of an id wins over an upsert of that id regardless of order.
//! ============================================================================

use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use super::search::StoreSnapshot;
use super::types::{ExtractedOperation, OperationPayload, Record, DEFAULT_KIND};

/// Working state of a reconciliation run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileState {
    /// Records that existed in the store at run start, in rank order
    pub store_based: Vec<Record>,
    /// Records created during the run, in creation order
    pub ephemeral: Vec<Record>,
    /// Store-backed ids to delete from the store
    pub retired: BTreeSet<String>,
    /// Ephemeral ids deleted before they were ever persisted
    pub discarded: BTreeSet<String>,
}

impl ReconcileState {
    /// Seed a run with the records found in the store
    pub fn from_snapshot(snapshot: &StoreSnapshot) -> Self {
        Self {
            store_based: snapshot.records(),
            ..Default::default()
        }
    }

    /// Ids a later phase must not see or persist
    pub fn is_excluded(&self, id: &str) -> bool {
        self.retired.contains(id) || self.discarded.contains(id)
    }

    /// Store-backed then ephemeral records, minus retired and discarded ids
    pub fn candidates(&self) -> Vec<Record> {
        self.store_based
            .iter()
            .chain(self.ephemeral.iter())
            .filter(|r| !self.is_excluded(&r.id))
            .cloned()
            .collect()
    }

    fn find(&self, id: &str) -> Option<&Record> {
        self.store_based
            .iter()
            .chain(self.ephemeral.iter())
            .find(|r| r.id == id)
    }

    /// Apply one batch of operations against the store snapshot
    pub fn apply(&mut self, operations: &[ExtractedOperation], snapshot: &StoreSnapshot) {
        let delete_targets: HashSet<&str> = operations
            .iter()
            .filter_map(|op| match &op.payload {
                OperationPayload::Delete { target } => Some(target.as_str()),
                OperationPayload::Upsert { .. } => None,
            })
            .collect();

        for op in operations {
            if let OperationPayload::Delete { target } = &op.payload {
                self.delete(target, snapshot);
            }
        }

        for op in operations {
            let OperationPayload::Upsert { kind, content } = &op.payload else {
                continue;
            };
            if delete_targets.contains(op.id.as_str()) {
                debug!("Skipping upsert of {}: deleted in the same batch", op.id);
                continue;
            }

            let kind = kind
                .clone()
                .or_else(|| self.find(&op.id).map(|r| r.kind.clone()))
                .unwrap_or_else(|| DEFAULT_KIND.to_string());
            let record = Record::new(op.id.clone(), kind, content.clone());

            if let Some(existing) = self.store_based.iter_mut().find(|r| r.id == op.id) {
                *existing = record;
            } else if let Some(existing) = self.ephemeral.iter_mut().find(|r| r.id == op.id) {
                *existing = record;
            } else {
                self.ephemeral.push(record);
            }
        }
    }

    fn delete(&mut self, target: &str, snapshot: &StoreSnapshot) {
        let was_ephemeral = self.ephemeral.iter().any(|r| r.id == target);
        self.store_based.retain(|r| r.id != target);
        self.ephemeral.retain(|r| r.id != target);

        if snapshot.contains(target) {
            self.retired.insert(target.to_string());
        } else if was_ephemeral {
            self.discarded.insert(target.to_string());
        } else {
            debug!("Ignoring delete of unknown id {}", target);
        }
    }
}

/// Apply `operations` to fresh copies of the record sets
pub fn apply_operations(
    operations: &[ExtractedOperation],
    store_based: Vec<Record>,
    ephemeral: Vec<Record>,
    snapshot: &StoreSnapshot,
) -> ReconcileState {
    let mut state = ReconcileState {
        store_based,
        ephemeral,
        ..Default::default()
    };
    state.apply(operations, snapshot);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::search::stable_id;
    use crate::store::StoreItem;
    use serde_json::json;

    fn namespace() -> Vec<String> {
        vec!["memories".to_string(), "u1".to_string()]
    }

    fn snapshot(keys: &[(&str, &str)]) -> StoreSnapshot {
        let items = keys
            .iter()
            .map(|(key, text)| StoreItem {
                namespace: namespace(),
                key: key.to_string(),
                value: json!({"kind": "Preference", "content": {"content": text}}),
                created_at: 0,
                updated_at: 0,
                score: Some(0.5),
            })
            .collect();
        StoreSnapshot::from_items(items)
    }

    #[test]
    fn test_update_keeps_store_record_in_place() {
        let snap = snapshot(&[("k1", "likes pasta")]);
        let id = stable_id(&namespace(), "k1");
        let mut state = ReconcileState::from_snapshot(&snap);

        state.apply(
            &[ExtractedOperation::upsert(&id, None, json!({"content": "likes sushi"}))],
            &snap,
        );

        assert_eq!(state.store_based.len(), 1);
        assert!(state.ephemeral.is_empty());
        assert_eq!(state.store_based[0].content, json!({"content": "likes sushi"}));
        // Kind carried over from the prior record
        assert_eq!(state.store_based[0].kind, "Preference");
    }

    #[test]
    fn test_insert_defaults_kind() {
        let snap = StoreSnapshot::default();
        let state = apply_operations(
            &[ExtractedOperation::insert(None, json!({"content": "new"}))],
            vec![],
            vec![],
            &snap,
        );
        assert_eq!(state.ephemeral.len(), 1);
        assert_eq!(state.ephemeral[0].kind, DEFAULT_KIND);
    }

    #[test]
    fn test_declared_kind_wins() {
        let snap = snapshot(&[("k1", "x")]);
        let id = stable_id(&namespace(), "k1");
        let mut state = ReconcileState::from_snapshot(&snap);
        state.apply(&[ExtractedOperation::upsert(&id, Some("Fact"), json!("y"))], &snap);
        assert_eq!(state.store_based[0].kind, "Fact");
    }

    #[test]
    fn test_delete_retires_store_record() {
        let snap = snapshot(&[("k1", "a"), ("k2", "b")]);
        let id = stable_id(&namespace(), "k1");
        let mut state = ReconcileState::from_snapshot(&snap);

        state.apply(&[ExtractedOperation::delete(&id)], &snap);

        assert_eq!(state.store_based.len(), 1);
        assert!(state.retired.contains(&id));
        assert!(state.discarded.is_empty());
    }

    #[test]
    fn test_delete_wins_regardless_of_order() {
        let snap = snapshot(&[("k1", "a")]);
        let id = stable_id(&namespace(), "k1");

        for ops in [
            vec![
                ExtractedOperation::upsert(&id, None, json!("changed")),
                ExtractedOperation::delete(&id),
            ],
            vec![
                ExtractedOperation::delete(&id),
                ExtractedOperation::upsert(&id, None, json!("changed")),
            ],
        ] {
            let mut state = ReconcileState::from_snapshot(&snap);
            state.apply(&ops, &snap);
            assert!(state.retired.contains(&id));
            assert!(state.candidates().is_empty());
            assert!(state.ephemeral.is_empty());
        }
    }

    #[test]
    fn test_deleting_ephemeral_record_discards_it() {
        let snap = StoreSnapshot::default();
        let mut state = ReconcileState::default();
        state.apply(&[ExtractedOperation::upsert("new-1", None, json!("x"))], &snap);
        state.apply(&[ExtractedOperation::delete("new-1")], &snap);

        assert!(state.ephemeral.is_empty());
        assert!(state.discarded.contains("new-1"));
        assert!(state.retired.is_empty());
    }

    #[test]
    fn test_unknown_delete_is_ignored() {
        let snap = snapshot(&[("k1", "a")]);
        let mut state = ReconcileState::from_snapshot(&snap);
        state.apply(&[ExtractedOperation::delete("nope")], &snap);
        assert_eq!(state.store_based.len(), 1);
        assert!(state.retired.is_empty());
        assert!(state.discarded.is_empty());
    }

    #[test]
    fn test_untouched_records_carry_over() {
        let snap = snapshot(&[("k1", "a"), ("k2", "b")]);
        let mut state = ReconcileState::from_snapshot(&snap);
        let before = state.store_based.clone();
        state.apply(&[], &snap);
        assert_eq!(state.store_based, before);
    }

    #[test]
    fn test_reused_retired_id_stays_excluded() {
        let snap = snapshot(&[("k1", "a")]);
        let id = stable_id(&namespace(), "k1");
        let mut state = ReconcileState::from_snapshot(&snap);
        state.apply(&[ExtractedOperation::delete(&id)], &snap);
        state.apply(&[ExtractedOperation::upsert(&id, None, json!("back"))], &snap);

        // Lands in the ephemeral set but is hidden from later phases
        assert_eq!(state.ephemeral.len(), 1);
        assert!(state.candidates().is_empty());
    }
}
