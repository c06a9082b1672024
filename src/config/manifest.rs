//! Manifest document types.
//!
//! A manifest is the YAML document a caller hands to the engine: project
//! metadata, provider defaults, and a list of resource entries. Entries
//! deserialize with serde and convert into [`ResourceSpec`]s; reference
//! expressions in attribute values (`${type.name.attribute}`) are picked
//! up during deserialization, explicit `depends_on` lines are parsed
//! here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ManifestError;
use crate::resource::{AttributeValue, Mutability, ResourceId, ResourceSpec};

/// The root manifest document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Project-level metadata.
    pub project: ProjectMeta,
    /// Defaults applied to entries that omit a field.
    #[serde(default)]
    pub defaults: ManifestDefaults,
    /// Declared resources. Multiple entries for the same type and name
    /// are fragments and merge before diffing.
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
}

/// Project-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectMeta {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g. "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Defaults applied to resource entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestDefaults {
    /// Provider used by entries that do not name one.
    #[serde(default = "default_provider")]
    pub provider: String,
}

impl Default for ManifestDefaults {
    fn default() -> Self {
        Self {
            provider: default_provider(),
        }
    }
}

/// One declared resource in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceEntry {
    /// Provider-scoped resource type (e.g. "instance").
    #[serde(rename = "type")]
    pub resource_type: String,
    /// User-given name, unique per type unless declared as fragments.
    pub name: String,
    /// Provider override for this entry.
    #[serde(default)]
    pub provider: Option<String>,
    /// Declared attribute values.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Per-attribute mutability overrides.
    #[serde(default)]
    pub mutability: BTreeMap<String, Mutability>,
    /// Dependencies not carried by any attribute, as `type.name` pairs.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ResourceEntry {
    /// Returns the identifier declared by this entry.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.resource_type, &self.name)
    }
}

impl Manifest {
    /// Converts the manifest into resource specs.
    ///
    /// Attribute-carried references were already extracted during
    /// deserialization; this parses the explicit `depends_on` lines and
    /// applies the provider default.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::InvalidReference`] when a `depends_on`
    /// entry is not a `type.name` pair.
    pub fn into_specs(self) -> Result<Vec<ResourceSpec>, ManifestError> {
        let mut specs = Vec::with_capacity(self.resources.len());

        for entry in self.resources {
            let provider = entry
                .provider
                .unwrap_or_else(|| self.defaults.provider.clone());
            let mut spec = ResourceSpec::new(
                ResourceId::new(entry.resource_type, entry.name),
                provider,
            );

            for (name, value) in entry.attributes {
                spec = spec.with_attribute(name, value);
            }
            for (name, policy) in entry.mutability {
                spec = spec.with_mutability(name, policy);
            }
            for dependency in entry.depends_on {
                spec = spec.with_dependency(parse_dependency(&dependency)?);
            }

            specs.push(spec);
        }

        Ok(specs)
    }

    /// Identifiers of every declared resource, fragments included.
    #[must_use]
    pub fn declared_ids(&self) -> Vec<ResourceId> {
        self.resources.iter().map(ResourceEntry::id).collect()
    }
}

/// Parses a `type.name` dependency pair.
fn parse_dependency(s: &str) -> Result<ResourceId, ManifestError> {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(ManifestError::InvalidReference {
            expression: s.to_string(),
        });
    }
    Ok(ResourceId::new(parts[0], parts[1]))
}

fn default_environment() -> String {
    String::from("dev")
}

fn default_provider() -> String {
    String::from("memory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_manifest_deserializes() {
        let yaml = r"
project:
  name: test-project
resources: []
";
        let manifest: Manifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(manifest.project.name, "test-project");
        assert_eq!(manifest.project.environment, "dev");
        assert_eq!(manifest.defaults.provider, "memory");
    }

    #[test]
    fn test_entry_converts_to_spec_with_references() {
        let yaml = r#"
project:
  name: web-stack
resources:
  - type: security_group
    name: web
    attributes:
      description: web tier
  - type: instance
    name: web
    attributes:
      image_id: img-v1
      security_groups:
        - "${security_group.web.id}"
    mutability:
      instance_type: immutable
    depends_on:
      - security_group.web
"#;
        let manifest: Manifest = serde_yaml::from_str(yaml).unwrap();
        let specs = manifest.into_specs().unwrap();

        assert_eq!(specs.len(), 2);
        let instance = &specs[1];
        assert_eq!(instance.id, ResourceId::new("instance", "web"));
        assert_eq!(instance.provider, "memory");
        assert!(instance
            .references
            .contains(&ResourceId::new("security_group", "web")));
        assert_eq!(
            instance.mutability_of("instance_type"),
            Mutability::Immutable
        );
        assert_eq!(instance.attribute_references().len(), 1);
    }

    #[test]
    fn test_malformed_depends_on_is_rejected() {
        let manifest = Manifest {
            project: ProjectMeta {
                name: String::from("p"),
                environment: String::from("dev"),
            },
            defaults: ManifestDefaults::default(),
            resources: vec![ResourceEntry {
                resource_type: String::from("instance"),
                name: String::from("web"),
                provider: None,
                attributes: BTreeMap::new(),
                mutability: BTreeMap::new(),
                depends_on: vec![String::from("just-a-name")],
            }],
        };

        let err = manifest.into_specs().unwrap_err();
        assert!(matches!(err, ManifestError::InvalidReference { .. }));
    }

    #[test]
    fn test_provider_override_beats_default() {
        let yaml = r"
project:
  name: p
defaults:
  provider: memory
resources:
  - type: instance
    name: web
    provider: other
";
        let manifest: Manifest = serde_yaml::from_str(yaml).unwrap();
        let specs = manifest.into_specs().unwrap();
        assert_eq!(specs[0].provider, "other");
    }
}
