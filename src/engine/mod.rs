//! Execution engine: applying plans and verifying convergence.
//!
//! The [`Executor`] runs planned actions concurrently within dependency
//! order, the [`RetryPolicy`] bounds retries of transient failures, and
//! the [`ConvergenceVerifier`] polls mutated resources until they reach
//! their desired state.

mod executor;
mod retry;
mod verifier;

pub use executor::{
    ActionOutcome, ActionResult, CancelFlag, DEFAULT_PARALLELISM, ExecutionResult, Executor,
};
pub use retry::RetryPolicy;
pub use verifier::{ConvergenceVerifier, VerifyOutcome, VerifyPolicy, VerifyState};
