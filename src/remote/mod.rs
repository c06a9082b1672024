//! Remote system access.
//!
//! Defines the fetcher contract provider backends implement, the
//! registry that maps provider names to backends, and the built-in
//! in-memory backend.

mod fetcher;
mod memory;
mod registry;

pub use fetcher::{MutationHandle, RemoteStateFetcher};
pub use memory::InMemoryFetcher;
pub use registry::ProviderRegistry;

#[cfg(test)]
pub use fetcher::MockRemoteStateFetcher;
