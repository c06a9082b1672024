//! Planning: diffing desired against observed state and ordering the
//! resulting actions.
//!
//! The [`DiffEngine`] classifies every attribute change, the
//! [`DependencyGraph`] orders resources by their references, and the
//! [`PlanBuilder`] turns both into a topologically sorted [`Plan`].

mod diff;
mod graph;
mod plan;

pub use diff::{
    AttributeDiff, ChangeClass, DiffEngine, DiffResult, ResourceChange, ResourceDiff, SetChanges,
};
pub use graph::DependencyGraph;
pub use plan::{ActionKind, Plan, PlanBuilder, PlannedAction};
