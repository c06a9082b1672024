//! Reconciler for driving declared resources to their desired state.
//!
//! A run refreshes observed state from the providers, diffs it against
//! the declared specs, builds a topologically ordered plan, and executes
//! it. The reconciler owns no state between runs; every run starts from
//! a fresh remote snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SpecHasher;
use crate::engine::{
    ActionResult, CancelFlag, DEFAULT_PARALLELISM, Executor, RetryPolicy, VerifyPolicy,
};
use crate::error::Result;
use crate::planner::{DiffEngine, DiffResult, Plan, PlanBuilder};
use crate::remote::ProviderRegistry;
use crate::resource::{ObservedState, ResourceId, ResourceSpec};

/// Identity and control surface of a single run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Unique identifier of the run.
    pub run_id: Uuid,
    /// Host that initiated the run.
    pub initiator: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Cooperative cancellation flag, shared with signal handlers.
    pub cancel: CancelFlag,
}

impl RunContext {
    /// Creates a context with a fresh run identifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            initiator: hostname::get().map_or_else(
                |_| String::from("unknown"),
                |h| h.to_string_lossy().into_owned(),
            ),
            started_at: Utc::now(),
            cancel: CancelFlag::new(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// What a run set out to do.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Converge remote state toward the declared specs.
    Apply,
    /// Remove every declared resource from the remote system.
    Destroy,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Apply => write!(f, "apply"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// Policies in effect for a run, surfaced on the report.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RunPolicies {
    /// Maximum concurrently executing actions.
    pub parallelism: usize,
    /// Maximum mutation attempts per action.
    pub retry_max_attempts: u32,
    /// Backoff base delay in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Convergence poll interval in seconds.
    pub verify_interval_secs: u64,
    /// Convergence timeout in seconds.
    pub verify_timeout_secs: u64,
}

/// A built plan together with the snapshot it was computed from.
#[derive(Debug)]
pub struct PlannedRun {
    /// The ordered plan.
    pub plan: Plan,
    /// The diff the plan was built from.
    pub diff: DiffResult,
    /// Observed states at planning time, keyed by resource identifier.
    pub observed: BTreeMap<ResourceId, ObservedState>,
    /// Merged desired specs the plan targets.
    pub specs: Vec<ResourceSpec>,
}

/// Report of a completed reconciliation run.
#[derive(Debug, Serialize)]
pub struct ReconciliationReport {
    /// Unique identifier of the run.
    pub run_id: Uuid,
    /// Host that initiated the run.
    pub initiator: String,
    /// Whether this was an apply or a destroy.
    pub operation: Operation,
    /// Hash of the desired-state set the run targeted.
    pub desired_hash: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Policies that were in effect.
    pub policies: RunPolicies,
    /// True when every action succeeded.
    pub success: bool,
    /// Number of resources the plan set out to create.
    pub created: usize,
    /// Number of resources the plan set out to update in place.
    pub updated: usize,
    /// Number of resources the plan set out to replace.
    pub replaced: usize,
    /// Number of resources the plan set out to delete.
    pub deleted: usize,
    /// Number of resources already converged.
    pub unchanged: usize,
    /// Per-action outcomes in plan order.
    pub actions: Vec<ActionResult>,
    /// Errors encountered, one per failed action.
    pub errors: Vec<String>,
}

impl std::fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "successful" } else { "failed" };
        writeln!(f, "Run {} ({}) {status}:", self.run_id, self.operation)?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Replaced: {}", self.replaced)?;
        writeln!(f, "  Deleted: {}", self.deleted)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;

        if !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for error in &self.errors {
                writeln!(f, "    - {error}")?;
            }
        }

        Ok(())
    }
}

/// Report of drift detection.
#[derive(Debug, Serialize)]
pub struct DriftReport {
    /// Whether drift was detected.
    pub has_drift: bool,
    /// Resources that have drifted, with the change each needs.
    pub drifted_resources: Vec<String>,
    /// Number of declared resources after fragment merging.
    pub total_declared: usize,
    /// Number of resources observed remotely.
    pub observed_count: usize,
}

impl DriftReport {
    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift {
            writeln!(f, "Drift detected:")?;
            for resource in &self.drifted_resources {
                writeln!(f, "  - {resource}")?;
            }
        } else {
            write!(f, "No drift detected - state is converged")?;
        }
        Ok(())
    }
}

/// Orchestrates refresh, diff, plan, and execution for one desired set.
pub struct Reconciler {
    registry: Arc<ProviderRegistry>,
    diff_engine: DiffEngine,
    builder: PlanBuilder,
    hasher: SpecHasher,
    parallelism: usize,
    retry: RetryPolicy,
    verify: VerifyPolicy,
}

impl Reconciler {
    /// Creates a reconciler with default policies.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            diff_engine: DiffEngine::new(),
            builder: PlanBuilder::new(),
            hasher: SpecHasher::new(),
            parallelism: DEFAULT_PARALLELISM,
            retry: RetryPolicy::default(),
            verify: VerifyPolicy::default(),
        }
    }

    /// Sets the maximum number of concurrently executing actions.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Sets the retry policy for transient mutation failures.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the convergence verification policy.
    #[must_use]
    pub const fn with_verify_policy(mut self, verify: VerifyPolicy) -> Self {
        self.verify = verify;
        self
    }

    /// Fetches a fresh observed-state snapshot for the declared
    /// resources. Resources the remote does not know about are simply
    /// absent from the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error when a provider cannot be resolved or a fetch
    /// fails with something other than not-found.
    pub async fn refresh(
        &self,
        specs: &[ResourceSpec],
    ) -> Result<BTreeMap<ResourceId, ObservedState>> {
        let mut observed = BTreeMap::new();

        for spec in specs {
            if observed.contains_key(&spec.id) {
                continue;
            }
            let fetcher = self.registry.resolve(&spec.provider)?;
            match fetcher.get(&spec.id).await {
                Ok(Some(state)) => {
                    observed.insert(spec.id.clone(), state);
                }
                Ok(None) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        debug!(
            "Refreshed {} of {} declared resource(s)",
            observed.len(),
            specs.len()
        );
        Ok(observed)
    }

    /// Plans the changes needed to converge toward the declared specs.
    ///
    /// # Errors
    ///
    /// Returns an error on conflicting fragments, dependency cycles, or
    /// a failed refresh.
    pub async fn plan(&self, specs: &[ResourceSpec]) -> Result<PlannedRun> {
        let merged = DiffEngine::merge_fragments(specs)?;
        let observed = self.refresh(&merged).await?;
        let desired_hash = self.hasher.hash_desired_set(&merged);

        let diff = self.diff_engine.diff_all(&merged, &observed)?;
        info!(
            "Diff: {} creates, {} updates, {} replaces, {} deletes, {} unchanged",
            diff.creates, diff.updates, diff.replaces, diff.deletes, diff.unchanged
        );

        let plan = if diff.has_changes() {
            self.builder.build(&diff, &merged, &desired_hash)?
        } else {
            PlanBuilder::empty(&desired_hash)
        };

        Ok(PlannedRun {
            plan,
            diff,
            observed,
            specs: merged,
        })
    }

    /// Plans the removal of every declared resource.
    ///
    /// Planning runs against an empty desired set, so everything
    /// observed becomes a delete, ordered inversely to the dependency
    /// graph.
    ///
    /// # Errors
    ///
    /// Returns an error on conflicting fragments or a failed refresh.
    pub async fn plan_destroy(&self, specs: &[ResourceSpec]) -> Result<PlannedRun> {
        let merged = DiffEngine::merge_fragments(specs)?;
        let observed = self.refresh(&merged).await?;
        let desired_hash = self.hasher.hash_desired_set(&[]);

        let diff = self.diff_engine.diff_all(&[], &observed)?;
        info!("Destroy: {} resource(s) to delete", diff.deletes);

        let plan = if diff.has_changes() {
            // Declared specs still feed the builder so deletes run in
            // reverse dependency order
            self.builder.build(&diff, &merged, &desired_hash)?
        } else {
            PlanBuilder::empty(&desired_hash)
        };

        Ok(PlannedRun {
            plan,
            diff,
            observed,
            specs: merged,
        })
    }

    /// Executes a planned run and reports every per-action outcome.
    pub async fn execute_run(
        &self,
        operation: Operation,
        run: &PlannedRun,
        ctx: &RunContext,
    ) -> ReconciliationReport {
        info!(
            "Run {} ({operation}) starting with {} action(s)",
            ctx.run_id,
            run.plan.action_count()
        );

        let executor = Executor::new(Arc::clone(&self.registry))
            .with_parallelism(self.parallelism)
            .with_retry_policy(self.retry)
            .with_verify_policy(self.verify);

        let result = executor.execute(&run.plan, &run.observed, &ctx.cancel).await;

        let errors: Vec<String> = result
            .results
            .iter()
            .filter_map(|r| {
                r.error
                    .as_ref()
                    .map(|e| format!("{}: {e}", r.resource))
            })
            .collect();

        ReconciliationReport {
            run_id: ctx.run_id,
            initiator: ctx.initiator.clone(),
            operation,
            desired_hash: run.plan.desired_hash.clone(),
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            policies: self.policies(),
            success: result.success,
            created: run.diff.creates,
            updated: run.diff.updates,
            replaced: run.diff.replaces,
            deleted: run.diff.deletes,
            unchanged: run.diff.unchanged,
            actions: result.results,
            errors,
        }
    }

    /// Plans and executes an apply in one call.
    ///
    /// A report is returned even when actions fail; `success` and the
    /// per-action outcomes say what happened. Planning errors are still
    /// hard errors.
    ///
    /// # Errors
    ///
    /// Returns an error if planning fails.
    pub async fn apply(
        &self,
        specs: &[ResourceSpec],
        ctx: &RunContext,
    ) -> Result<ReconciliationReport> {
        let run = self.plan(specs).await?;
        Ok(self.execute_run(Operation::Apply, &run, ctx).await)
    }

    /// Plans and executes a destroy in one call.
    ///
    /// # Errors
    ///
    /// Returns an error if planning fails.
    pub async fn destroy(
        &self,
        specs: &[ResourceSpec],
        ctx: &RunContext,
    ) -> Result<ReconciliationReport> {
        let run = self.plan_destroy(specs).await?;
        Ok(self.execute_run(Operation::Destroy, &run, ctx).await)
    }

    /// Checks for drift without applying changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh or diff fails.
    pub async fn check_drift(&self, specs: &[ResourceSpec]) -> Result<DriftReport> {
        let merged = DiffEngine::merge_fragments(specs)?;
        let observed = self.refresh(&merged).await?;
        let diff = self.diff_engine.diff_all(&merged, &observed)?;

        let drifted_resources: Vec<String> = diff
            .actionable_diffs()
            .into_iter()
            .map(|d| format!("{} ({})", d.id, d.change))
            .collect();

        Ok(DriftReport {
            has_drift: diff.has_changes(),
            drifted_resources,
            total_declared: merged.len(),
            observed_count: observed.len(),
        })
    }

    fn policies(&self) -> RunPolicies {
        RunPolicies {
            parallelism: self.parallelism,
            retry_max_attempts: self.retry.max_attempts,
            retry_base_delay_ms: u64::try_from(self.retry.base_delay.as_millis())
                .unwrap_or(u64::MAX),
            verify_interval_secs: self.verify.interval.as_secs(),
            verify_timeout_secs: self.verify.timeout.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ActionOutcome;
    use crate::planner::ActionKind;
    use crate::remote::InMemoryFetcher;
    use crate::resource::{AttributeValue, ResourceStatus};

    fn setup(fetcher: Arc<InMemoryFetcher>) -> Reconciler {
        let mut registry = ProviderRegistry::new();
        registry.register(fetcher);
        Reconciler::new(Arc::new(registry))
    }

    fn spec(name: &str) -> ResourceSpec {
        ResourceSpec::new(ResourceId::new("instance", name), "memory")
            .with_attribute("image_id", AttributeValue::str("img-v1"))
    }

    #[tokio::test]
    async fn test_apply_creates_then_converges_to_noop() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        let reconciler = setup(Arc::clone(&fetcher));
        let specs = vec![spec("a"), spec("b")];

        let report = reconciler.apply(&specs, &RunContext::new()).await.unwrap();
        assert!(report.success);
        assert_eq!(report.created, 2);
        assert_eq!(report.actions.len(), 2);
        assert_eq!(fetcher.resource_count().await, 2);

        // A second apply against converged state plans nothing
        let report = reconciler.apply(&specs, &RunContext::new()).await.unwrap();
        assert!(report.success);
        assert_eq!(report.created, 0);
        assert_eq!(report.unchanged, 2);
        assert!(report.actions.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_removes_everything_observed() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        let reconciler = setup(Arc::clone(&fetcher));
        let specs = vec![spec("a"), spec("b")];

        reconciler.apply(&specs, &RunContext::new()).await.unwrap();
        assert_eq!(fetcher.resource_count().await, 2);

        let report = reconciler
            .destroy(&specs, &RunContext::new())
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.operation, Operation::Destroy);
        assert_eq!(report.deleted, 2);
        assert_eq!(fetcher.resource_count().await, 0);
    }

    #[tokio::test]
    async fn test_immutable_change_is_applied_as_replace() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        let reconciler = setup(Arc::clone(&fetcher));

        let id = ResourceId::new("instance", "web");
        let v1 = vec![ResourceSpec::new(id.clone(), "memory")
            .with_attribute("image_id", AttributeValue::str("img-v1"))];
        reconciler.apply(&v1, &RunContext::new()).await.unwrap();
        let old_remote = fetcher.remote_id_of(&id).await.unwrap();

        let v2 = vec![ResourceSpec::new(id.clone(), "memory")
            .with_attribute("image_id", AttributeValue::str("img-v2"))];
        let report = reconciler.apply(&v2, &RunContext::new()).await.unwrap();

        assert!(report.success);
        assert_eq!(report.replaced, 1);
        let kinds: Vec<ActionKind> = report.actions.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&ActionKind::Delete));
        assert!(kinds.contains(&ActionKind::Create));

        // Replacement produced a new remote identity with the new image
        let new_remote = fetcher.remote_id_of(&id).await.unwrap();
        assert_ne!(old_remote, new_remote);
        assert_eq!(
            fetcher.remote_attribute(&id, "image_id").await,
            Some(AttributeValue::str("img-v2"))
        );
    }

    #[tokio::test]
    async fn test_check_drift_reports_divergence() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        let reconciler = setup(Arc::clone(&fetcher));

        let id = ResourceId::new("instance", "web");
        let mut attrs = BTreeMap::new();
        attrs.insert(
            "instance_name".to_string(),
            AttributeValue::str("drifted"),
        );
        fetcher
            .seed(
                ObservedState::new(id.clone(), attrs, ResourceStatus::Running)
                    .with_remote_id("mem-1"),
            )
            .await;

        let specs = vec![ResourceSpec::new(id, "memory")
            .with_attribute("instance_name", AttributeValue::str("declared"))];

        let drift = reconciler.check_drift(&specs).await.unwrap();
        assert!(drift.has_drift);
        assert_eq!(drift.drifted_resources.len(), 1);
        assert!(drift.drifted_resources[0].contains("instance.web"));

        // Nothing was mutated by the drift check
        assert_eq!(fetcher.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn test_report_carries_run_identity_and_policies() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        let reconciler = setup(fetcher).with_parallelism(2);

        let ctx = RunContext::new();
        let report = reconciler.apply(&[spec("a")], &ctx).await.unwrap();

        assert_eq!(report.run_id, ctx.run_id);
        assert_eq!(report.initiator, ctx.initiator);
        assert_eq!(report.policies.parallelism, 2);
        assert_eq!(report.policies.retry_max_attempts, 3);
        assert!(!report.desired_hash.is_empty());
        assert!(report.finished_at >= report.started_at);
        assert_eq!(report.actions[0].outcome, ActionOutcome::Succeeded);
    }
}
