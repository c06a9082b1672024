//! Resource descriptor model: desired-state specs, typed attribute
//! values, and observed remote state.

mod observed;
mod spec;
mod value;

pub use observed::{ObservedState, ResourceStatus};
pub use spec::{BUILTIN_IMMUTABLE, Mutability, ResourceId, ResourceSpec};
pub use value::{AttributeValue, ResourceRef};
