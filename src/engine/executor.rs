//! Concurrent plan execution.
//!
//! Each planned action runs as its own task under a bounded semaphore.
//! An action waits for every dependency to succeed before it starts, so
//! independent actions run concurrently while dependent ones stay
//! strictly ordered. A failed action marks its transitive dependents
//! skipped; unrelated branches keep running. Transient remote errors
//! retry with bounded backoff, fatal ones fail the action immediately,
//! and there is no rollback: completed actions stay completed and the
//! result reports every per-action outcome.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Semaphore, watch};
use tracing::{debug, error, info, warn};

use crate::error::{RemoteError, VerifyError};
use crate::planner::{ActionKind, Plan, PlannedAction};
use crate::remote::{MutationHandle, ProviderRegistry, RemoteStateFetcher};
use crate::resource::{ObservedState, ResourceId};

use super::retry::RetryPolicy;
use super::verifier::{ConvergenceVerifier, VerifyPolicy};

/// Default number of concurrently executing actions.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Cooperative cancellation flag scoped to one run.
///
/// Cancelling stops actions that have not started yet. An in-flight
/// mutation runs to completion so the remote system is never abandoned
/// mid-request; only its verification is interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates a flag in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a single action ended.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Mutation accepted and convergence verified.
    Succeeded,
    /// The mutation or its verification failed.
    Failed,
    /// Not attempted because a dependency did not succeed.
    Skipped,
    /// Not attempted because the run was cancelled.
    Cancelled,
}

/// Result of one executed action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    /// Position of the action in the plan.
    pub index: usize,
    /// Resource the action targeted.
    pub resource: ResourceId,
    /// Action kind.
    pub kind: ActionKind,
    /// How the action ended.
    pub outcome: ActionOutcome,
    /// Remote identifier after the action, if known.
    pub remote_id: Option<String>,
    /// Mutation attempts issued, including retries.
    pub attempts: u32,
    /// Verification polls issued.
    pub polls: u32,
    /// Error message for failed or skipped actions.
    pub error: Option<String>,
}

impl ActionResult {
    /// Returns true if the action succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome == ActionOutcome::Succeeded
    }
}

/// Result of executing an entire plan.
#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    /// Per-action results in plan order.
    pub results: Vec<ActionResult>,
    /// Number of actions that succeeded.
    pub succeeded: usize,
    /// Number of actions that failed.
    pub failed: usize,
    /// Number of actions skipped because a dependency failed.
    pub skipped: usize,
    /// Number of actions cancelled before starting.
    pub cancelled: usize,
    /// True when every action succeeded.
    pub success: bool,
    /// Observed states after the run: the pre-run snapshot updated with
    /// every converged create and update, minus every delete.
    pub observed: BTreeMap<ResourceId, ObservedState>,
}

impl ExecutionResult {
    fn summarize(
        results: Vec<ActionResult>,
        observed: BTreeMap<ResourceId, ObservedState>,
    ) -> Self {
        let count = |outcome: ActionOutcome| {
            results.iter().filter(|r| r.outcome == outcome).count()
        };
        let succeeded = count(ActionOutcome::Succeeded);
        let failed = count(ActionOutcome::Failed);
        let skipped = count(ActionOutcome::Skipped);
        let cancelled = count(ActionOutcome::Cancelled);
        Self {
            success: failed == 0 && skipped == 0 && cancelled == 0,
            results,
            succeeded,
            failed,
            skipped,
            cancelled,
            observed,
        }
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} action(s): {} succeeded, {} failed, {} skipped, {} cancelled",
            self.results.len(),
            self.succeeded,
            self.failed,
            self.skipped,
            self.cancelled
        )
    }
}

/// Executes plans against registered providers.
#[derive(Debug)]
pub struct Executor {
    registry: Arc<ProviderRegistry>,
    parallelism: usize,
    retry: RetryPolicy,
    verify: VerifyPolicy,
}

impl Executor {
    /// Creates an executor with default policies.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
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

    /// Executes a plan.
    ///
    /// `observed` is the pre-run snapshot; reference values in specs
    /// resolve against it and against the states of resources that
    /// converge during the run. Execution never rolls back: the returned
    /// result reports exactly which actions succeeded, failed, were
    /// skipped, or were cancelled.
    pub async fn execute(
        &self,
        plan: &Plan,
        observed: &BTreeMap<ResourceId, ObservedState>,
        cancel: &CancelFlag,
    ) -> ExecutionResult {
        let total = plan.actions.len();
        if total == 0 {
            info!("Nothing to execute");
            return ExecutionResult::summarize(vec![], observed.clone());
        }

        info!(
            "Executing {total} action(s) with parallelism {}",
            self.parallelism
        );

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let known = Arc::new(Mutex::new(observed.clone()));

        let mut senders: Vec<watch::Sender<Option<bool>>> = Vec::with_capacity(total);
        let mut receivers: Vec<watch::Receiver<Option<bool>>> = Vec::with_capacity(total);
        for _ in 0..total {
            let (tx, rx) = watch::channel(None);
            senders.push(tx);
            receivers.push(rx);
        }

        let mut handles = Vec::with_capacity(total);
        for (index, (action, done)) in plan.actions.iter().zip(senders).enumerate() {
            let task = ActionTask {
                index,
                action: action.clone(),
                deps: action
                    .dependencies
                    .iter()
                    .map(|&d| receivers[d].clone())
                    .collect(),
                done,
                semaphore: Arc::clone(&semaphore),
                registry: Arc::clone(&self.registry),
                retry: self.retry,
                verifier: ConvergenceVerifier::new(self.verify),
                cancel: cancel.clone(),
                known: Arc::clone(&known),
            };
            handles.push(tokio::spawn(task.run()));
        }

        let mut results = Vec::with_capacity(total);
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("Action task {index} aborted: {e}");
                    results.push(ActionResult {
                        index,
                        resource: plan.actions[index].resource.clone(),
                        kind: plan.actions[index].kind,
                        outcome: ActionOutcome::Failed,
                        remote_id: None,
                        attempts: 0,
                        polls: 0,
                        error: Some(format!("task aborted: {e}")),
                    });
                }
            }
        }

        let final_observed = known.lock().await.clone();
        let result = ExecutionResult::summarize(results, final_observed);
        info!("{result}");
        result
    }
}

/// What the mutation phase of one action concluded.
enum MutateEnd {
    /// Accepted; `None` means a delete found nothing to delete.
    Done(Option<MutationHandle>),
    Failed(RemoteError),
    Cancelled,
}

/// One spawned action with everything it needs to run.
struct ActionTask {
    index: usize,
    action: PlannedAction,
    deps: Vec<watch::Receiver<Option<bool>>>,
    done: watch::Sender<Option<bool>>,
    semaphore: Arc<Semaphore>,
    registry: Arc<ProviderRegistry>,
    retry: RetryPolicy,
    verifier: ConvergenceVerifier,
    cancel: CancelFlag,
    known: Arc<Mutex<BTreeMap<ResourceId, ObservedState>>>,
}

impl ActionTask {
    async fn run(mut self) -> ActionResult {
        if !self.await_dependencies().await {
            warn!(
                "Skipping {}: a dependency did not succeed",
                self.action.description()
            );
            return self.finish(
                ActionOutcome::Skipped,
                None,
                0,
                0,
                Some(String::from("dependency failed or was skipped")),
            );
        }

        if self.cancel.is_cancelled() {
            return self.finish(ActionOutcome::Cancelled, None, 0, 0, None);
        }

        // Wait for dependencies before taking a permit so waiting tasks
        // never hold execution slots
        let Ok(_permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return self.finish(
                ActionOutcome::Cancelled,
                None,
                0,
                0,
                Some(String::from("executor shut down")),
            );
        };

        if self.cancel.is_cancelled() {
            return self.finish(ActionOutcome::Cancelled, None, 0, 0, None);
        }

        let fetcher = match self.resolve_fetcher() {
            Ok(fetcher) => fetcher,
            Err(message) => {
                error!("Cannot execute {}: {message}", self.action.description());
                return self.finish(ActionOutcome::Failed, None, 0, 0, Some(message));
            }
        };

        info!("Executing action {}: {}", self.index, self.action.description());

        let mut attempts = 0u32;
        let end = loop {
            attempts += 1;
            match fetcher.mutate(&self.action).await {
                Ok(handle) => break MutateEnd::Done(Some(handle)),
                Err(e) if self.action.kind == ActionKind::Delete && e.is_not_found() => {
                    debug!("{} already gone, delete is a no-op", self.action.resource);
                    break MutateEnd::Done(None);
                }
                Err(e) if e.is_transient() && self.retry.allows(attempts) => {
                    let delay = self.retry.delay_after(attempts, &e);
                    warn!(
                        "Transient failure on {} (attempt {attempts}): {e}; retrying in {}ms",
                        self.action.resource,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    if self.cancel.is_cancelled() {
                        break MutateEnd::Cancelled;
                    }
                }
                Err(e) => break MutateEnd::Failed(e),
            }
        };

        let mutation = match end {
            MutateEnd::Done(mutation) => mutation,
            MutateEnd::Cancelled => {
                return self.finish(
                    ActionOutcome::Cancelled,
                    None,
                    attempts,
                    0,
                    Some(String::from("run cancelled")),
                );
            }
            MutateEnd::Failed(e) => {
                error!(
                    "{} failed after {attempts} attempt(s): {e}",
                    self.action.description()
                );
                return self.finish(ActionOutcome::Failed, None, attempts, 0, Some(e.to_string()));
            }
        };

        let (polls, remote_id, converged) = match mutation {
            None => (0, None, None),
            Some(handle) => {
                let snapshot = self.known.lock().await.clone();
                match self
                    .verifier
                    .verify(fetcher.as_ref(), &self.action, &snapshot, &self.cancel)
                    .await
                {
                    Ok(outcome) => {
                        let remote_id = handle.remote_id.or_else(|| {
                            outcome
                                .observed
                                .as_ref()
                                .and_then(|o| o.remote_id.clone())
                        });
                        (outcome.polls, remote_id, outcome.observed)
                    }
                    Err(VerifyError::Interrupted { .. }) => {
                        return self.finish(
                            ActionOutcome::Cancelled,
                            handle.remote_id,
                            attempts,
                            0,
                            Some(String::from("run cancelled during verification")),
                        );
                    }
                    Err(e) => {
                        let polls = if let VerifyError::Timeout { polls, .. } = &e {
                            *polls
                        } else {
                            0
                        };
                        error!("Verification of {} failed: {e}", self.action.resource);
                        return self.finish(
                            ActionOutcome::Failed,
                            handle.remote_id,
                            attempts,
                            polls,
                            Some(e.to_string()),
                        );
                    }
                }
            }
        };

        match self.action.kind {
            ActionKind::Delete => {
                self.known.lock().await.remove(&self.action.resource);
            }
            ActionKind::Create | ActionKind::Update => {
                if let Some(state) = &converged {
                    self.known
                        .lock()
                        .await
                        .insert(self.action.resource.clone(), state.clone());
                }
            }
        }

        debug!("Completed {}", self.action.description());
        self.finish(ActionOutcome::Succeeded, remote_id, attempts, polls, None)
    }

    /// Waits for every dependency to reach a terminal outcome. Returns
    /// false when any dependency failed, was skipped, or vanished.
    async fn await_dependencies(&mut self) -> bool {
        for rx in &mut self.deps {
            let ok = loop {
                let current = *rx.borrow_and_update();
                if let Some(outcome) = current {
                    break outcome;
                }
                if rx.changed().await.is_err() {
                    break false;
                }
            };
            if !ok {
                return false;
            }
        }
        true
    }

    fn resolve_fetcher(&self) -> Result<Arc<dyn RemoteStateFetcher>, String> {
        match &self.action.provider {
            Some(provider) => self.registry.resolve(provider).map_err(|e| e.to_string()),
            None => self.registry.sole().ok_or_else(|| {
                String::from("no provider declared and more than one is registered")
            }),
        }
    }

    fn finish(
        self,
        outcome: ActionOutcome,
        remote_id: Option<String>,
        attempts: u32,
        polls: u32,
        error: Option<String>,
    ) -> ActionResult {
        let _ = self.done.send(Some(outcome == ActionOutcome::Succeeded));
        ActionResult {
            index: self.index,
            resource: self.action.resource.clone(),
            kind: self.action.kind,
            outcome,
            remote_id,
            attempts,
            polls,
            error,
        }
    }
}
