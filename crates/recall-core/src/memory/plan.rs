//! ============================================================================
//! Mutation Planning - Final record sets -> store writes
//! ============================================================================
//! - store-backed records are written back to their original (namespace, key)
//!   only when kind or content changed
//! - ephemeral records are written under the run namespace with key = id
//! - retired ids become deletes of their original entries
//! ============================================================================

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::merge::ReconcileState;
use super::search::StoreSnapshot;
use super::types::{DeleteOp, PendingMutation, PutOp};
use crate::config::ExecutionMode;
use crate::error::{MemoryError, Result};
use crate::store::MemoryStore;

/// Writes a run intends to make
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationPlan {
    pub puts: Vec<PutOp>,
    pub deletes: Vec<DeleteOp>,
}

impl MutationPlan {
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.puts.len() + self.deletes.len()
    }

    /// Puts first, then deletes
    pub fn mutations(&self) -> Vec<PendingMutation> {
        self.puts
            .iter()
            .cloned()
            .map(PendingMutation::Put)
            .chain(self.deletes.iter().cloned().map(PendingMutation::Delete))
            .collect()
    }
}

/// A mutation the store rejected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationFailure {
    pub mutation: PendingMutation,
    pub error: MemoryError,
}

pub fn plan_mutations(
    state: &ReconcileState,
    snapshot: &StoreSnapshot,
    namespace: &[String],
) -> MutationPlan {
    let mut plan = MutationPlan::default();

    for record in &state.store_based {
        let Some(entry) = snapshot.get(&record.id) else {
            continue;
        };
        let value = record.value();
        if value == entry.value() {
            continue;
        }
        plan.puts.push(PutOp {
            namespace: entry.item.namespace.clone(),
            key: entry.item.key.clone(),
            value,
        });
    }

    for record in &state.ephemeral {
        if state.is_excluded(&record.id) {
            debug!("Not persisting {}: deleted during the run", record.id);
            continue;
        }
        plan.puts.push(PutOp {
            namespace: namespace.to_vec(),
            key: record.id.clone(),
            value: record.value(),
        });
    }

    for id in &state.retired {
        if let Some(entry) = snapshot.get(id) {
            plan.deletes.push(DeleteOp {
                namespace: entry.item.namespace.clone(),
                key: entry.item.key.clone(),
            });
        }
    }

    plan
}

async fn execute(store: &dyn MemoryStore, mutation: &PendingMutation) -> Result<()> {
    match mutation {
        PendingMutation::Put(put) => {
            store
                .put(&put.namespace, &put.key, put.value.to_value())
                .await
        }
        PendingMutation::Delete(delete) => store.delete(&delete.namespace, &delete.key).await,
    }
}

/// Execute every mutation; failures are collected rather than aborting
pub async fn apply_plan(
    store: &dyn MemoryStore,
    plan: &MutationPlan,
    mode: ExecutionMode,
) -> Vec<MutationFailure> {
    let mutations = plan.mutations();

    let results: Vec<Result<()>> = match mode {
        ExecutionMode::Concurrent => join_all(mutations.iter().map(|m| execute(store, m))).await,
        ExecutionMode::Sequential => {
            let mut results = Vec::with_capacity(mutations.len());
            for mutation in &mutations {
                results.push(execute(store, mutation).await);
            }
            results
        }
    };

    mutations
        .into_iter()
        .zip(results)
        .filter_map(|(mutation, result)| match result {
            Ok(()) => None,
            Err(error) => {
                warn!(
                    "Store write failed for {:?}/{}: {}",
                    mutation.namespace(),
                    mutation.key(),
                    error
                );
                Some(MutationFailure { mutation, error })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::search::stable_id;
    use crate::memory::testing::FailingStore;
    use crate::memory::types::ExtractedOperation;
    use crate::store::{InMemoryStore, StoreItem};
    use serde_json::json;

    fn ns() -> Vec<String> {
        vec!["memories".into(), "u1".into()]
    }

    fn item(key: &str, text: &str) -> StoreItem {
        StoreItem {
            namespace: ns(),
            key: key.into(),
            value: json!({"kind": "Memory", "content": {"content": text}}),
            created_at: 0,
            updated_at: 0,
            score: Some(0.8),
        }
    }

    #[test]
    fn test_unchanged_records_produce_no_writes() {
        let snap = StoreSnapshot::from_items(vec![item("k1", "a"), item("k2", "b")]);
        let state = ReconcileState::from_snapshot(&snap);
        assert!(plan_mutations(&state, &snap, &ns()).is_empty());
    }

    #[test]
    fn test_update_writes_back_to_original_key() {
        let snap = StoreSnapshot::from_items(vec![item("k1", "a")]);
        let id = stable_id(&ns(), "k1");
        let mut state = ReconcileState::from_snapshot(&snap);
        state.apply(
            &[ExtractedOperation::upsert(&id, None, json!({"content": "b"}))],
            &snap,
        );

        let plan = plan_mutations(&state, &snap, &["other".to_string()]);

        assert_eq!(plan.puts.len(), 1);
        assert_eq!(plan.puts[0].namespace, ns());
        assert_eq!(plan.puts[0].key, "k1");
        assert_eq!(plan.puts[0].value.content, json!({"content": "b"}));
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn test_new_records_keyed_by_id_and_retired_deleted() {
        let snap = StoreSnapshot::from_items(vec![item("k1", "a")]);
        let id = stable_id(&ns(), "k1");
        let mut state = ReconcileState::from_snapshot(&snap);
        state.apply(
            &[
                ExtractedOperation::delete(&id),
                ExtractedOperation::upsert("new-1", Some("Fact"), json!({"content": "c"})),
            ],
            &snap,
        );

        let plan = plan_mutations(&state, &snap, &ns());

        assert_eq!(plan.puts.len(), 1);
        assert_eq!(plan.puts[0].key, "new-1");
        assert_eq!(plan.puts[0].value.kind, "Fact");
        assert_eq!(
            plan.deletes,
            vec![DeleteOp {
                namespace: ns(),
                key: "k1".into()
            }]
        );
    }

    #[test]
    fn test_reused_retired_id_never_persisted() {
        let snap = StoreSnapshot::from_items(vec![item("k1", "a")]);
        let id = stable_id(&ns(), "k1");
        let mut state = ReconcileState::from_snapshot(&snap);
        state.apply(&[ExtractedOperation::delete(&id)], &snap);
        state.apply(&[ExtractedOperation::upsert(&id, None, json!("again"))], &snap);

        let plan = plan_mutations(&state, &snap, &ns());

        assert!(plan.puts.is_empty());
        assert_eq!(plan.deletes.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_collects_failures() {
        let store = FailingStore::new(InMemoryStore::new(), &["bad"]);
        let plan = MutationPlan {
            puts: vec![
                PutOp {
                    namespace: ns(),
                    key: "good".into(),
                    value: crate::memory::types::MemoryValue {
                        kind: "Memory".into(),
                        content: json!("x"),
                    },
                },
                PutOp {
                    namespace: ns(),
                    key: "bad".into(),
                    value: crate::memory::types::MemoryValue {
                        kind: "Memory".into(),
                        content: json!("y"),
                    },
                },
            ],
            deletes: vec![],
        };

        for mode in [ExecutionMode::Concurrent, ExecutionMode::Sequential] {
            let failures = apply_plan(&store, &plan, mode).await;
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].mutation.key(), "bad");
            assert!(failures[0].error.is_store_error());
        }
        assert!(store.inner.get(&ns(), "good").await.unwrap().is_some());
    }
}
