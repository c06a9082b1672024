//! Desired-state resource descriptors.
//!
//! A [`ResourceSpec`] is the caller-owned description of one resource:
//! its provider-scoped identifier, typed attributes, declared
//! cross-resource references, and per-attribute mutability policy. Specs
//! are immutable once submitted to a plan; the engine only reads them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::value::{AttributeValue, ResourceRef};

/// Unique identifier for a resource: provider-scoped type plus the
/// user-given name (e.g. `instance.web`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    /// Provider-scoped resource type (e.g. "instance", "security_group").
    pub resource_type: String,
    /// Name given by the user, unique per type within a manifest.
    pub name: String,
}

impl ResourceId {
    /// Creates a new resource identifier.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Mutability policy of a single attribute.
///
/// The policy decides how a changed value is classified: updatable
/// attributes change in place, immutable attributes force the whole
/// resource to be destroyed and recreated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mutability {
    /// The attribute can change on the live resource.
    #[default]
    Updatable,
    /// Changing the attribute requires destroy-and-recreate.
    Immutable,
}

/// Attribute names that are immutable on every resource type unless a
/// manifest override says otherwise. These are the classic
/// placement-and-identity attributes a remote system will not change on
/// a live resource.
pub const BUILTIN_IMMUTABLE: &[&str] = &[
    "availability_zone",
    "image_id",
    "cidr_block",
    "vpc_id",
    "vswitch_id",
];

/// Desired state for a single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Identifier of the resource.
    pub id: ResourceId,
    /// Provider responsible for this resource, resolved through the
    /// provider registry at run start.
    pub provider: String,
    /// Declared attributes, ordered by name.
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Explicit cross-resource references (union of reference-valued
    /// attributes and `depends_on` declarations).
    pub references: BTreeSet<ResourceId>,
    /// Per-attribute mutability overrides. Attributes not listed here
    /// fall back to [`BUILTIN_IMMUTABLE`], then to updatable.
    #[serde(default)]
    pub mutability: BTreeMap<String, Mutability>,
}

impl ResourceSpec {
    /// Creates an empty spec for the given identifier and provider.
    #[must_use]
    pub fn new(id: ResourceId, provider: impl Into<String>) -> Self {
        Self {
            id,
            provider: provider.into(),
            attributes: BTreeMap::new(),
            references: BTreeSet::new(),
            mutability: BTreeMap::new(),
        }
    }

    /// Adds an attribute, recording a reference edge if the value
    /// contains one.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        let mut refs = Vec::new();
        value.collect_references(&mut refs);
        for r in refs {
            self.references.insert(r.resource);
        }
        self.attributes.insert(name.into(), value);
        self
    }

    /// Adds an explicit dependency that is not carried by any attribute.
    #[must_use]
    pub fn with_dependency(mut self, id: ResourceId) -> Self {
        self.references.insert(id);
        self
    }

    /// Overrides the mutability policy for one attribute.
    #[must_use]
    pub fn with_mutability(mut self, attribute: impl Into<String>, policy: Mutability) -> Self {
        self.mutability.insert(attribute.into(), policy);
        self
    }

    /// Resolves the mutability policy for an attribute.
    ///
    /// Precedence: manifest override, then the built-in immutable list,
    /// then updatable.
    #[must_use]
    pub fn mutability_of(&self, attribute: &str) -> Mutability {
        if let Some(policy) = self.mutability.get(attribute) {
            return *policy;
        }
        if BUILTIN_IMMUTABLE.contains(&attribute) {
            return Mutability::Immutable;
        }
        Mutability::Updatable
    }

    /// Returns every reference carried by this spec's attribute values.
    #[must_use]
    pub fn attribute_references(&self) -> Vec<ResourceRef> {
        let mut refs = Vec::new();
        for value in self.attributes.values() {
            value.collect_references(&mut refs);
        }
        refs
    }
}
