//! Provider registry.
//!
//! Maps provider names from resource specs to fetcher backends. Every
//! run resolves fetchers through a registry instead of hardwiring a
//! backend, so mixed-provider manifests and test doubles plug in the
//! same way.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{ManifestError, Result};

use super::fetcher::RemoteStateFetcher;
use super::memory::InMemoryFetcher;

/// Registry of provider backends, keyed by provider name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn RemoteStateFetcher>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in `memory` provider.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(InMemoryFetcher::new()));
        registry
    }

    /// Registers a fetcher under its own provider name. A later
    /// registration for the same name replaces the earlier one.
    pub fn register(&mut self, fetcher: Arc<dyn RemoteStateFetcher>) {
        self.providers.insert(fetcher.provider().to_string(), fetcher);
    }

    /// Resolves the fetcher for a provider name.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::UnknownProvider`] when no fetcher is
    /// registered under the name.
    pub fn resolve(&self, provider: &str) -> Result<Arc<dyn RemoteStateFetcher>> {
        self.providers.get(provider).cloned().ok_or_else(|| {
            ManifestError::UnknownProvider {
                provider: provider.to_string(),
            }
            .into()
        })
    }

    /// Returns the only registered fetcher, if exactly one exists.
    ///
    /// Used for actions whose provider cannot be inferred, such as the
    /// deletion of a resource that is observed but no longer declared.
    #[must_use]
    pub fn sole(&self) -> Option<Arc<dyn RemoteStateFetcher>> {
        if self.providers.len() == 1 {
            self.providers.values().next().cloned()
        } else {
            None
        }
    }

    /// Returns true if a provider is registered.
    #[must_use]
    pub fn contains(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    /// Names of all registered providers, sorted.
    #[must_use]
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.provider_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_memory_provider_resolves() {
        let registry = ProviderRegistry::with_builtin();
        assert!(registry.contains("memory"));
        let fetcher = registry.resolve("memory").unwrap();
        assert_eq!(fetcher.provider(), "memory");
    }

    #[test]
    fn test_unknown_provider_is_an_error() {
        let registry = ProviderRegistry::with_builtin();
        let Err(err) = registry.resolve("aws") else {
            panic!("expected unknown provider to fail resolution");
        };
        assert!(err.to_string().contains("aws"));
    }

    #[test]
    fn test_names_are_sorted() {
        let registry = ProviderRegistry::with_builtin();
        assert_eq!(registry.provider_names(), vec!["memory"]);
    }
}
