//! Convergence verification by polling.
//!
//! After a mutation is accepted the remote system converges
//! asynchronously. The verifier polls the fetcher at a fixed interval
//! with jitter until the observed state matches the desired state, the
//! resource is gone (for deletes), or a timeout expires. Verification
//! runs through a small state machine whose terminal states are
//! absorbing; a timed-out verification is reported, never retried
//! forever.

use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{RemoteError, VerifyError};
use crate::planner::{ActionKind, DiffEngine, PlannedAction, ResourceChange};
use crate::remote::RemoteStateFetcher;
use crate::resource::{ObservedState, ResourceId, ResourceStatus};

use super::executor::CancelFlag;

/// Verification state machine.
///
/// `Pending` and `Polling` are transient; `Converged`, `TimedOut`, and
/// `Error` are terminal and absorbing.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerifyState {
    /// Verification has not polled yet.
    Pending,
    /// Polling is in progress.
    Polling,
    /// Observed state matches desired state.
    Converged,
    /// The timeout expired before convergence.
    TimedOut,
    /// A fatal error ended verification.
    Error,
}

impl VerifyState {
    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::TimedOut | Self::Error)
    }

    /// Transition taken when a poll starts.
    #[must_use]
    pub const fn begin_poll(self) -> Self {
        match self {
            Self::Pending | Self::Polling => Self::Polling,
            terminal => terminal,
        }
    }

    /// Transition taken when the observed state matches.
    #[must_use]
    pub const fn converge(self) -> Self {
        match self {
            Self::Polling => Self::Converged,
            other => other,
        }
    }

    /// Transition taken when the timeout expires.
    #[must_use]
    pub const fn time_out(self) -> Self {
        match self {
            Self::Pending | Self::Polling => Self::TimedOut,
            terminal => terminal,
        }
    }

    /// Transition taken on a fatal error.
    #[must_use]
    pub const fn fail(self) -> Self {
        match self {
            Self::Pending | Self::Polling => Self::Error,
            terminal => terminal,
        }
    }
}

/// Polling parameters for convergence verification.
#[derive(Debug, Clone, Copy)]
pub struct VerifyPolicy {
    /// Base interval between polls.
    pub interval: Duration,
    /// Jitter fraction applied to the interval, 0.25 means +/- 25%.
    pub jitter: f64,
    /// Total time budget for one resource to converge.
    pub timeout: Duration,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            jitter: 0.25,
            timeout: Duration::from_secs(600),
        }
    }
}

impl VerifyPolicy {
    /// Sets the poll interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the convergence timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of a completed verification.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    /// Resource that was verified.
    pub resource: ResourceId,
    /// Final state, always terminal.
    pub state: VerifyState,
    /// Number of polls issued.
    pub polls: u32,
    /// Seconds spent polling.
    pub elapsed_secs: u64,
    /// Final observed state for creates and updates; absent for deletes.
    pub observed: Option<ObservedState>,
}

/// What one poll concluded.
enum Verdict {
    Converged(Option<ObservedState>),
    NotYet,
    Failed(String),
}

/// Polls a fetcher until a mutated resource converges.
#[derive(Debug, Default)]
pub struct ConvergenceVerifier {
    policy: VerifyPolicy,
    engine: DiffEngine,
}

impl ConvergenceVerifier {
    /// Creates a verifier with the given polling policy.
    #[must_use]
    pub const fn new(policy: VerifyPolicy) -> Self {
        Self {
            policy,
            engine: DiffEngine::new(),
        }
    }

    /// Polls until the action's resource converges.
    ///
    /// For creates and updates, convergence means the observed state
    /// diffs clean against the spec and the status is stable. For
    /// deletes, convergence means the resource is gone; a structured
    /// not-found answer is success, not an error. Reference values in
    /// the spec resolve against `known`, the states of already converged
    /// resources.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Timeout`] when the budget expires,
    /// [`VerifyError::Failed`] on a fatal remote error, and
    /// [`VerifyError::Interrupted`] when the run is cancelled mid-poll.
    pub async fn verify(
        &self,
        fetcher: &dyn RemoteStateFetcher,
        action: &PlannedAction,
        known: &BTreeMap<ResourceId, ObservedState>,
        cancel: &CancelFlag,
    ) -> Result<VerifyOutcome, VerifyError> {
        let started = Instant::now();
        let mut state = VerifyState::Pending;
        let mut polls = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(VerifyError::Interrupted {
                    id: action.resource.to_string(),
                });
            }
            if started.elapsed() >= self.policy.timeout {
                state = state.time_out();
                warn!(
                    "Verification of {} timed out after {polls} poll(s) in state {state:?}",
                    action.resource
                );
                return Err(VerifyError::Timeout {
                    id: action.resource.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                    polls,
                });
            }

            state = state.begin_poll();
            polls += 1;

            match self.poll_once(fetcher, action, known).await {
                Verdict::Converged(observed) => {
                    state = state.converge();
                    debug!("{} converged after {polls} poll(s)", action.resource);
                    return Ok(VerifyOutcome {
                        resource: action.resource.clone(),
                        state,
                        polls,
                        elapsed_secs: started.elapsed().as_secs(),
                        observed,
                    });
                }
                Verdict::NotYet => {}
                Verdict::Failed(reason) => {
                    state = state.fail();
                    warn!(
                        "Verification of {} ended in state {state:?}: {reason}",
                        action.resource
                    );
                    return Err(VerifyError::Failed {
                        id: action.resource.to_string(),
                        reason,
                    });
                }
            }

            let remaining = self.policy.timeout.saturating_sub(started.elapsed());
            tokio::time::sleep(self.jittered_interval().min(remaining)).await;
        }
    }

    async fn poll_once(
        &self,
        fetcher: &dyn RemoteStateFetcher,
        action: &PlannedAction,
        known: &BTreeMap<ResourceId, ObservedState>,
    ) -> Verdict {
        let fetched = fetcher.get(&action.resource).await;

        match action.kind {
            ActionKind::Delete => match fetched {
                Ok(None) => Verdict::Converged(None),
                Ok(Some(observed)) if observed.status == ResourceStatus::Terminated => {
                    Verdict::Converged(None)
                }
                Ok(Some(_)) => Verdict::NotYet,
                Err(e) if e.is_not_found() => Verdict::Converged(None),
                Err(e) => Self::verdict_for_error(&e),
            },

            ActionKind::Create | ActionKind::Update => {
                let Some(spec) = &action.spec else {
                    return Verdict::Failed(String::from("no spec to verify against"));
                };
                match fetched {
                    Ok(Some(observed)) => {
                        let diff = self.engine.diff_resource_with(spec, Some(&observed), known);
                        if diff.change == ResourceChange::NoChange && observed.status.is_stable() {
                            Verdict::Converged(Some(observed))
                        } else {
                            debug!(
                                "{} not converged yet: {} with status {}",
                                action.resource, diff.change, observed.status
                            );
                            Verdict::NotYet
                        }
                    }
                    Ok(None) => Verdict::NotYet,
                    Err(e) if e.is_not_found() => Verdict::NotYet,
                    Err(e) => Self::verdict_for_error(&e),
                }
            }
        }
    }

    /// Transient poll errors keep the loop alive; fatal ones end it.
    fn verdict_for_error(error: &RemoteError) -> Verdict {
        if error.is_transient() {
            debug!("Transient error while polling: {error}");
            Verdict::NotYet
        } else {
            Verdict::Failed(error.to_string())
        }
    }

    fn jittered_interval(&self) -> Duration {
        if self.policy.jitter <= 0.0 {
            return self.policy.interval;
        }
        let low = 1.0 - self.policy.jitter;
        let high = 1.0 + self.policy.jitter;
        let factor: f64 = rand::thread_rng().gen_range(low..=high);
        self.policy.interval.mul_f64(factor)
    }
}
