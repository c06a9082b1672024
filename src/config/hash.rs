//! Desired-state hashing for change detection and audit records.
//!
//! Hashes are deterministic: attribute maps iterate in sorted order and
//! values render canonically, so the same desired state always produces
//! the same digest regardless of manifest formatting.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::resource::{AttributeValue, ResourceSpec};

/// Hasher for computing desired-state digests.
#[derive(Debug, Default)]
pub struct SpecHasher;

impl SpecHasher {
    /// Creates a new spec hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of a full desired-state set.
    ///
    /// This hash changes when any resource's declaration changes and is
    /// recorded on every reconciliation report.
    #[must_use]
    pub fn hash_desired_set(&self, specs: &[ResourceSpec]) -> String {
        let mut hasher = Sha256::new();

        // Sort by identifier so manifest ordering does not matter
        let mut ordered: Vec<&ResourceSpec> = specs.iter().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        for spec in ordered {
            hasher.update(self.hash_spec(spec).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource spec.
    #[must_use]
    pub fn hash_spec(&self, spec: &ResourceSpec) -> String {
        let mut hasher = Sha256::new();

        hasher.update(spec.id.resource_type.as_bytes());
        hasher.update(spec.id.name.as_bytes());
        hasher.update(spec.provider.as_bytes());

        Self::update_attributes(&mut hasher, &spec.attributes);

        for (attribute, policy) in &spec.mutability {
            hasher.update(attribute.as_bytes());
            hasher.update(format!("{policy:?}").as_bytes());
        }

        for reference in &spec.references {
            hasher.update(reference.to_string().as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash over an attribute map, used to fingerprint
    /// observed state in diff audit records.
    #[must_use]
    pub fn hash_attributes(&self, attributes: &BTreeMap<String, AttributeValue>) -> String {
        let mut hasher = Sha256::new();
        Self::update_attributes(&mut hasher, attributes);
        hex::encode(hasher.finalize())
    }

    fn update_attributes(hasher: &mut Sha256, attributes: &BTreeMap<String, AttributeValue>) {
        for (name, value) in attributes {
            hasher.update(name.as_bytes());
            hasher.update(value.canonical().as_bytes());
        }
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceId;

    fn create_test_spec(name: &str) -> ResourceSpec {
        ResourceSpec::new(ResourceId::new("instance", name), "mock")
            .with_attribute("image_id", AttributeValue::str("img-v1"))
            .with_attribute("instance_type", AttributeValue::str("ecs.n4.small"))
    }

    #[test]
    fn test_spec_hash_deterministic() {
        let hasher = SpecHasher::new();
        let spec = create_test_spec("web");

        let hash1 = hasher.hash_spec(&spec);
        let hash2 = hasher.hash_spec(&spec);

        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_different_specs_different_hash() {
        let hasher = SpecHasher::new();
        let spec1 = create_test_spec("web");
        let spec2 = create_test_spec("db");

        assert_ne!(hasher.hash_spec(&spec1), hasher.hash_spec(&spec2));
    }

    #[test]
    fn test_desired_set_hash_ignores_ordering() {
        let hasher = SpecHasher::new();
        let a = create_test_spec("a");
        let b = create_test_spec("b");

        let forward = hasher.hash_desired_set(&[a.clone(), b.clone()]);
        let reversed = hasher.hash_desired_set(&[b, a]);

        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_short_hash() {
        let hasher = SpecHasher::new();
        let full_hash = "abcdef1234567890abcdef1234567890";
        let short = hasher.short_hash(full_hash);

        assert_eq!(short, "abcdef12");
        assert_eq!(short.len(), 8);
    }

    #[test]
    fn test_hashes_match() {
        assert!(SpecHasher::hashes_match("abc123", "abc123"));
        assert!(!SpecHasher::hashes_match("abc123", "abc124"));
        assert!(!SpecHasher::hashes_match("abc123", "abc12"));
    }
}
