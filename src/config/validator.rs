//! Manifest validation.
//!
//! This module provides validation of manifest documents, ensuring all
//! declarations are consistent before a run starts. Structural problems
//! are collected into a [`ValidationResult`]; dangling references are
//! checked against the declared resource set.

use crate::error::{ConvergeError, ManifestError, Result};
use crate::resource::{AttributeValue, Mutability, ResourceId, ResourceRef, ResourceSpec};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::manifest::{Manifest, ResourceEntry};

/// Validator for manifest documents.
#[derive(Debug, Default)]
pub struct ManifestValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ManifestValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a manifest document.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self, manifest: &Manifest) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(&manifest.project, &mut result);
        Self::validate_resources(&manifest.resources, &mut result);

        if result.errors.is_empty() {
            debug!("Manifest validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(ConvergeError::Manifest(ManifestError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates project metadata.
    fn validate_project(project: &super::manifest::ProjectMeta, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: String::from("Project name cannot be empty"),
            });
        } else if !is_valid_name(&project.name) {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            });
        }

        if project.environment.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.environment"),
                message: String::from("Environment cannot be empty"),
            });
        }
    }

    /// Validates all resource entries.
    fn validate_resources(resources: &[ResourceEntry], result: &mut ValidationResult) {
        if resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources declared in manifest"));
            return;
        }

        let mut fragment_counts: HashMap<ResourceId, usize> = HashMap::new();
        for entry in resources {
            *fragment_counts.entry(entry.id()).or_insert(0) += 1;
        }

        let mut warned_fragments = HashSet::new();
        for (i, entry) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !is_valid_identifier(&entry.resource_type) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.type"),
                    message: format!(
                        "Resource type '{}' is invalid. Must be lowercase alphanumeric with underscores.",
                        entry.resource_type
                    ),
                });
            }

            if !is_valid_name(&entry.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!(
                        "Resource name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        entry.name
                    ),
                });
            }

            let id = entry.id();
            if fragment_counts.get(&id).copied().unwrap_or(0) > 1
                && warned_fragments.insert(id.clone())
            {
                result.warnings.push(format!(
                    "Resource {id} is declared in multiple fragments; they will be merged"
                ));
            }

            Self::validate_attributes(&entry.attributes, &prefix, result);
            Self::validate_mutability(entry, &prefix, result);
        }
    }

    /// Flags strings that look like reference expressions but failed to
    /// parse as one. Untagged deserialization silently falls back to a
    /// plain string for those, which is almost never what the author
    /// meant.
    fn validate_attributes(
        attributes: &std::collections::BTreeMap<String, AttributeValue>,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        for (name, value) in attributes {
            Self::check_malformed_references(value, &format!("{prefix}.attributes.{name}"), result);
        }
    }

    fn check_malformed_references(
        value: &AttributeValue,
        field: &str,
        result: &mut ValidationResult,
    ) {
        match value {
            AttributeValue::Str(s) => {
                if ResourceRef::is_reference_expr(s) && ResourceRef::parse(s).is_err() {
                    result.errors.push(ValidationError {
                        field: field.to_string(),
                        message: format!(
                            "Malformed reference expression '{s}'. Expected ${{type.name.attribute}}"
                        ),
                    });
                }
            }
            AttributeValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    Self::check_malformed_references(item, &format!("{field}[{i}]"), result);
                }
            }
            AttributeValue::Nested(map) => {
                for (key, nested) in map {
                    Self::check_malformed_references(nested, &format!("{field}.{key}"), result);
                }
            }
            AttributeValue::Reference(_) | AttributeValue::Int(_) | AttributeValue::Bool(_) => {}
        }
    }

    /// Validates mutability overrides.
    fn validate_mutability(entry: &ResourceEntry, prefix: &str, result: &mut ValidationResult) {
        for (attribute, policy) in &entry.mutability {
            if *policy == Mutability::Updatable
                && crate::resource::BUILTIN_IMMUTABLE.contains(&attribute.as_str())
            {
                result.warnings.push(format!(
                    "{prefix}.mutability.{attribute}: overriding a built-in immutable attribute to updatable; in-place updates may be rejected by the provider"
                ));
            }
        }
    }

    /// Checks that every reference points at a declared resource.
    ///
    /// Runs after spec conversion so both attribute-carried references
    /// and explicit `depends_on` edges are covered.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::UnknownReference`] for the first
    /// dangling reference found.
    pub fn validate_references(&self, specs: &[ResourceSpec]) -> Result<()> {
        let declared: HashSet<&ResourceId> = specs.iter().map(|s| &s.id).collect();

        for spec in specs {
            for target in &spec.references {
                if !declared.contains(target) {
                    return Err(ConvergeError::Manifest(ManifestError::UnknownReference {
                        from: spec.id.to_string(),
                        to: target.to_string(),
                    }));
                }
            }
        }

        debug!("Reference validation passed for {} specs", specs.len());
        Ok(())
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    is_valid_with_separator(name, '-')
}

/// Validates a resource type identifier.
/// Types must be lowercase alphanumeric with underscores, starting with a letter.
fn is_valid_identifier(name: &str) -> bool {
    is_valid_with_separator(name, '_')
}

fn is_valid_with_separator(name: &str, sep: char) -> bool {
    if name.is_empty() {
        return false;
    }

    let mut chars = name.chars();

    // First character must be a letter
    if !chars.next().is_some_and(|c| c.is_ascii_lowercase()) {
        return false;
    }

    // Rest must be lowercase alphanumeric or the separator
    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != sep {
            return false;
        }
    }

    // Cannot end with the separator
    if name.ends_with(sep) {
        return false;
    }

    // Cannot have consecutive separators
    let doubled = format!("{sep}{sep}");
    if name.contains(&doubled) {
        return false;
    }

    true
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::manifest::Manifest;

    fn parse(yaml: &str) -> Manifest {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("web"));
        assert!(is_valid_name("my-app-123"));
        assert!(is_valid_name("a"));
        assert!(is_valid_identifier("security_group"));
        assert!(is_valid_identifier("vpc"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Web")); // uppercase
        assert!(!is_valid_name("123-web")); // starts with number
        assert!(!is_valid_name("web_a")); // underscore
        assert!(!is_valid_name("web-")); // ends with hyphen
        assert!(!is_valid_name("web--a")); // consecutive hyphens
        assert!(!is_valid_identifier("security-group")); // hyphen in type
    }

    #[test]
    fn test_empty_resources_is_a_warning() {
        let manifest = parse("project:\n  name: p\nresources: []\n");
        let result = ManifestValidator::new().validate(&manifest).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_duplicate_entries_warn_about_merging() {
        let manifest = parse(
            r"
project:
  name: p
resources:
  - type: instance
    name: web
    attributes:
      image_id: img-v1
  - type: instance
    name: web
    attributes:
      instance_type: small
",
        );
        let result = ManifestValidator::new().validate(&manifest).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
        assert!(result.warnings[0].contains("fragments"));
    }

    #[test]
    fn test_malformed_reference_is_an_error() {
        let manifest = parse(
            r#"
project:
  name: p
resources:
  - type: instance
    name: web
    attributes:
      subnet: "${subnet.main}"
"#,
        );
        let err = ManifestValidator::new().validate(&manifest).unwrap_err();
        assert!(err.to_string().contains("Malformed reference"));
    }

    #[test]
    fn test_unknown_reference_is_an_error() {
        let manifest = parse(
            r#"
project:
  name: p
resources:
  - type: instance
    name: web
    attributes:
      vpc: "${vpc.missing.id}"
"#,
        );
        let validator = ManifestValidator::new();
        assert!(validator.validate(&manifest).is_ok());

        let specs = manifest.into_specs().unwrap();
        let err = validator.validate_references(&specs).unwrap_err();
        assert!(matches!(
            err,
            ConvergeError::Manifest(ManifestError::UnknownReference { .. })
        ));
    }

    #[test]
    fn test_builtin_immutable_override_warns() {
        let manifest = parse(
            r"
project:
  name: p
resources:
  - type: instance
    name: web
    attributes:
      image_id: img-v1
    mutability:
      image_id: updatable
",
        );
        let result = ManifestValidator::new().validate(&manifest).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
    }
}
