//! ============================================================================
//! Store Enricher - Reconcile a conversation against stored memories
//! ============================================================================
//! One run:
//! 1. Resolve the namespace template for this run
//! 2. Generate search queries and locate existing records
//! 3. Run the primary phase and any refinement phases
//! 4. Plan puts and deletes from the final record sets
//! 5. Apply them, collecting individual write failures
//!
//! `plan` stops after step 4 so callers can inspect or dry-run the writes.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::namespace::{NamespaceTemplate, RunContext};
use super::phases::{run_phases, PhaseSpec};
use super::plan::{apply_plan, plan_mutations, MutationFailure, MutationPlan};
use super::search::{run_queries, StoreSnapshot};
use super::types::{DeleteOp, Message, PendingMutation, PutOp, Record};
use crate::config::{EnricherConfig, ExecutionMode};
use crate::error::{MemoryError, Result};
use crate::extractor::{Extractor, QueryGenerator};
use crate::store::MemoryStore;

/// A computed but not yet applied run
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentPlan {
    pub namespace: Vec<String>,
    pub snapshot: StoreSnapshot,
    /// Surviving records after the last phase
    pub records: Vec<Record>,
    pub mutations: MutationPlan,
}

/// What a run wrote
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentOutcome {
    /// Puts the store accepted
    pub puts: Vec<PutOp>,
    /// Deletes the store accepted
    pub deletes: Vec<DeleteOp>,
    /// Mutations the store rejected; none of these appear above
    pub failures: Vec<MutationFailure>,
}

impl EnrichmentOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Store-backed reconciliation engine
pub struct MemoryStoreEnricher {
    extractor: Arc<dyn Extractor>,
    query_generator: Arc<dyn QueryGenerator>,
    config: EnricherConfig,
    namespace: NamespaceTemplate,
}

impl MemoryStoreEnricher {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        query_generator: Arc<dyn QueryGenerator>,
        config: EnricherConfig,
    ) -> Result<Self> {
        if config.query_limit == 0 {
            return Err(MemoryError::Config("query_limit must be at least 1".to_string()));
        }
        let namespace = NamespaceTemplate::parse(&config.namespace)?;
        Ok(Self {
            extractor,
            query_generator,
            config,
            namespace,
        })
    }

    pub fn config(&self) -> &EnricherConfig {
        &self.config
    }

    fn phase_specs(&self) -> Vec<PhaseSpec> {
        std::iter::once(PhaseSpec::primary(
            &self.config.instructions,
            self.config.enable_inserts,
            self.config.enable_deletes,
        ))
        .chain(self.config.phases.iter().map(PhaseSpec::from))
        .collect()
    }

    /// Compute the writes a run would make without touching the store
    pub async fn plan(
        &self,
        store: &dyn MemoryStore,
        messages: &[Message],
        run: &RunContext,
    ) -> Result<EnrichmentPlan> {
        self.plan_with_mode(store, messages, run, self.config.execution)
            .await
    }

    async fn plan_with_mode(
        &self,
        store: &dyn MemoryStore,
        messages: &[Message],
        run: &RunContext,
        mode: ExecutionMode,
    ) -> Result<EnrichmentPlan> {
        let namespace = self.namespace.resolve(run)?;

        let queries = self.query_generator.generate_queries(messages).await?;
        debug!("Generated {} search queries", queries.len());

        let results = run_queries(store, &namespace, &queries, self.config.query_limit, mode).await?;
        let snapshot = StoreSnapshot::from_results(results, self.config.query_limit);
        debug!("Located {} existing memories", snapshot.len());

        let state = run_phases(
            self.extractor.as_ref(),
            messages,
            &snapshot,
            &self.phase_specs(),
        )
        .await?;

        let mutations = plan_mutations(&state, &snapshot, &namespace);

        Ok(EnrichmentPlan {
            namespace,
            snapshot,
            records: state.candidates(),
            mutations,
        })
    }

    /// Execute a plan against the store
    pub async fn apply(&self, store: &dyn MemoryStore, plan: &EnrichmentPlan) -> EnrichmentOutcome {
        self.apply_with_mode(store, plan, self.config.execution)
            .await
    }

    async fn apply_with_mode(
        &self,
        store: &dyn MemoryStore,
        plan: &EnrichmentPlan,
        mode: ExecutionMode,
    ) -> EnrichmentOutcome {
        let failures = apply_plan(store, &plan.mutations, mode).await;

        if failures.is_empty() {
            info!(
                "Enrichment wrote {} puts and {} deletes under {:?}",
                plan.mutations.puts.len(),
                plan.mutations.deletes.len(),
                plan.namespace
            );
        } else {
            warn!(
                "Enrichment finished with {} of {} writes failed",
                failures.len(),
                plan.mutations.len()
            );
        }

        let failed = |mutation: PendingMutation| failures.iter().any(|f| f.mutation == mutation);
        let puts = plan
            .mutations
            .puts
            .iter()
            .filter(|put| !failed(PendingMutation::Put((*put).clone())))
            .cloned()
            .collect();
        let deletes = plan
            .mutations
            .deletes
            .iter()
            .filter(|delete| !failed(PendingMutation::Delete((*delete).clone())))
            .cloned()
            .collect();

        EnrichmentOutcome {
            puts,
            deletes,
            failures,
        }
    }

    /// Full run: locate, reconcile, persist
    pub async fn enrich(
        &self,
        store: &dyn MemoryStore,
        messages: &[Message],
        run: &RunContext,
    ) -> Result<EnrichmentOutcome> {
        let plan = self.plan(store, messages, run).await?;
        Ok(self.apply(store, &plan).await)
    }

    /// Full run from synchronous code, with every I/O step awaited in order.
    ///
    /// Builds its own current-thread runtime, so it must not be called from
    /// inside an async context.
    pub fn enrich_blocking(
        &self,
        store: &dyn MemoryStore,
        messages: &[Message],
        run: &RunContext,
    ) -> Result<EnrichmentOutcome> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| MemoryError::Config(format!("Failed to start runtime: {}", e)))?;

        runtime.block_on(async {
            let plan = self
                .plan_with_mode(store, messages, run, ExecutionMode::Sequential)
                .await?;
            Ok(self
                .apply_with_mode(store, &plan, ExecutionMode::Sequential)
                .await)
        })
    }
}
