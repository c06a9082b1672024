// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Converge
//!
//! A declarative, idempotent resource reconciliation engine.
//!
//! ## Overview
//!
//! Converge turns a YAML manifest of desired resources into the remote
//! mutations needed to make reality match it:
//!
//! - Declare resources, attributes, and cross-resource references in a
//!   manifest
//! - Diff the declaration against freshly observed remote state
//! - Build a topologically ordered plan of creates, updates, and deletes
//! - Execute the plan concurrently and verify each resource converges
//!
//! ## Architecture
//!
//! The system is built around **desired state reconciliation**:
//!
//! 1. **Desired state**: resource specs parsed from `converge.yaml`
//! 2. **Observed state**: fetched per resource through provider backends
//! 3. **Reconciler**: diffs the two, plans, executes, and verifies
//!
//! Changed attributes are classified by mutability: updatable attributes
//! change in place, immutable ones force the resource to be destroyed
//! and recreated. References like `${security_group.web.id}` carry
//! dependency edges and resolve against remote identifiers at execution
//! time.
//!
//! ## Modules
//!
//! - [`config`]: Manifest parsing, validation, and hashing
//! - [`resource`]: Resource specs, attribute values, observed state
//! - [`remote`]: Provider backends for fetching and mutating state
//! - [`planner`]: Diff computation and plan ordering
//! - [`engine`]: Concurrent execution, retry, convergence verification
//! - [`reconciler`]: Run orchestration and reporting
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: web-stack
//!   environment: prod
//!
//! resources:
//!   - type: security_group
//!     name: web
//!     attributes:
//!       ingress:
//!         - "80/tcp"
//!
//!   - type: instance
//!     name: web
//!     attributes:
//!       image_id: img-v1
//!       security_groups:
//!         - "${security_group.web.id}"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod planner;
pub mod reconciler;
pub mod remote;
pub mod resource;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{Manifest, ManifestParser, ManifestValidator, SpecHasher};
pub use engine::{CancelFlag, Executor, RetryPolicy, VerifyPolicy};
pub use error::{ConvergeError, Result};
pub use planner::{DiffEngine, Plan, PlanBuilder};
pub use reconciler::{DriftReport, ReconciliationReport, Reconciler, RunContext};
pub use remote::{InMemoryFetcher, ProviderRegistry, RemoteStateFetcher};
pub use resource::{AttributeValue, ObservedState, ResourceId, ResourceSpec};
