//! Diff engine for comparing desired vs observed state.
//!
//! For each resource the engine emits one [`AttributeDiff`] per attribute
//! present in either the spec or the observed snapshot, classified as
//! `NoOp`, `UpdateInPlace`, or `ForceReplace`. Classification is a pure
//! function of the old value, the new value, and the attribute's declared
//! mutability policy. `NoOp` diffs never reach the plan but are retained
//! for audit output.
//!
//! List-valued attributes compare with set semantics: ordering is
//! irrelevant and duplicate add/remove pairs cancel, so a reordered
//! security-group list is not a change.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::SpecHasher;
use crate::error::DiffError;
use crate::resource::{
    AttributeValue, Mutability, ObservedState, ResourceId, ResourceSpec, ResourceStatus,
};

/// Engine for computing diffs between desired and observed state.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Desired-state hasher for audit fingerprints.
    hasher: SpecHasher,
}

/// How a single attribute change can be achieved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClass {
    /// Values are equal; nothing to do.
    NoOp,
    /// The attribute can change on the live resource.
    UpdateInPlace,
    /// The change requires destroying and recreating the resource.
    ForceReplace,
}

/// Net element changes for a set-semantics attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetChanges {
    /// Elements declared but not observed.
    pub added: Vec<AttributeValue>,
    /// Elements observed but no longer declared.
    pub removed: Vec<AttributeValue>,
}

/// Difference for a single attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeDiff {
    /// Attribute name.
    pub attribute: String,
    /// Observed value, if any.
    pub old: Option<AttributeValue>,
    /// Declared value, if any.
    pub new: Option<AttributeValue>,
    /// Change classification.
    pub class: ChangeClass,
    /// Element-level changes, present only for set-semantics attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_changes: Option<SetChanges>,
}

/// Resource-level change derived from the attribute diffs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceChange {
    /// Resource does not exist remotely and must be created.
    Create,
    /// Resource exists and changes in place.
    Update,
    /// An immutable attribute changed; destroy and recreate.
    Replace,
    /// Resource exists remotely but is no longer declared.
    Delete,
    /// Resource matches its declaration.
    NoChange,
}

/// Complete diff for one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDiff {
    /// Resource identifier.
    pub id: ResourceId,
    /// Resource-level change.
    pub change: ResourceChange,
    /// Remote identifier, if the resource was observed.
    pub remote_id: Option<String>,
    /// One entry per attribute present in spec or observed state.
    pub attribute_diffs: Vec<AttributeDiff>,
    /// Fingerprint of the observed attributes, if the resource exists.
    pub old_hash: Option<String>,
    /// Fingerprint of the declared spec, if the resource is declared.
    pub new_hash: Option<String>,
}

/// Complete diff result across a desired-state set.
#[derive(Debug, Serialize)]
pub struct DiffResult {
    /// All resource diffs, ordered by resource identifier.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update in place.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: SpecHasher::new(),
        }
    }

    /// Computes the diff between a desired-state set and the observed
    /// snapshots for the same identifiers.
    ///
    /// Specs may contain multiple fragments for the same identifier;
    /// fragments are merged first. Observed resources with no
    /// corresponding spec become deletes.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::Conflict`] when two fragments declare
    /// different values for the same attribute.
    pub fn diff_all(
        &self,
        specs: &[ResourceSpec],
        observed: &BTreeMap<ResourceId, ObservedState>,
    ) -> Result<DiffResult, DiffError> {
        let merged = Self::merge_fragments(specs)?;

        let mut diffs = Vec::new();
        for spec in &merged {
            let snapshot = observed.get(&spec.id);
            diffs.push(self.diff_resource_with(spec, snapshot, observed));
        }

        // Observed resources with no spec are orphans slated for deletion
        let declared: BTreeSet<&ResourceId> = merged.iter().map(|s| &s.id).collect();
        for (id, snapshot) in observed {
            if !declared.contains(id) && Self::is_live(snapshot) {
                debug!("Observed resource {id} is not declared, scheduling delete");
                diffs.push(self.delete_diff(id, snapshot));
            }
        }

        let creates = Self::count(&diffs, ResourceChange::Create);
        let updates = Self::count(&diffs, ResourceChange::Update);
        let replaces = Self::count(&diffs, ResourceChange::Replace);
        let deletes = Self::count(&diffs, ResourceChange::Delete);
        let unchanged = Self::count(&diffs, ResourceChange::NoChange);

        Ok(DiffResult {
            diffs,
            creates,
            updates,
            replaces,
            deletes,
            unchanged,
        })
    }

    /// Computes the diff for a single resource against its latest
    /// observed snapshot, or none if the resource does not exist yet.
    #[must_use]
    pub fn diff_resource(
        &self,
        spec: &ResourceSpec,
        observed: Option<&ObservedState>,
    ) -> ResourceDiff {
        let empty = BTreeMap::new();
        self.diff_resource_with(spec, observed, &empty)
    }

    /// Computes the diff for a single resource, resolving reference
    /// values against the given set of observed snapshots.
    #[must_use]
    pub fn diff_resource_with(
        &self,
        spec: &ResourceSpec,
        observed: Option<&ObservedState>,
        all_observed: &BTreeMap<ResourceId, ObservedState>,
    ) -> ResourceDiff {
        let new_hash = Some(self.hasher.hash_spec(spec));
        let desired = Self::resolve_attributes(&spec.attributes, all_observed);

        let Some(snapshot) = observed.filter(|o| Self::is_live(o)) else {
            debug!("Resource {} needs to be created", spec.id);
            let attribute_diffs = desired
                .iter()
                .map(|(name, value)| AttributeDiff {
                    attribute: name.clone(),
                    old: None,
                    new: Some(value.clone()),
                    class: ChangeClass::UpdateInPlace,
                    set_changes: None,
                })
                .collect();
            return ResourceDiff {
                id: spec.id.clone(),
                change: ResourceChange::Create,
                remote_id: None,
                attribute_diffs,
                old_hash: None,
                new_hash,
            };
        };

        // One diff per attribute in the union of declared and observed names
        let names: BTreeSet<&String> = desired
            .keys()
            .chain(snapshot.attributes.keys())
            .collect();

        let mut attribute_diffs = Vec::with_capacity(names.len());
        for name in names {
            let old = snapshot.attributes.get(name);
            let new = desired.get(name);
            let policy = spec.mutability_of(name);
            attribute_diffs.push(Self::classify(name, old, new, policy));
        }

        let change = if attribute_diffs
            .iter()
            .any(|d| d.class == ChangeClass::ForceReplace)
        {
            // Replace dominates every other change for the resource
            ResourceChange::Replace
        } else if attribute_diffs
            .iter()
            .any(|d| d.class == ChangeClass::UpdateInPlace)
        {
            ResourceChange::Update
        } else {
            ResourceChange::NoChange
        };

        debug!("Resource {} classified as {change}", spec.id);

        ResourceDiff {
            id: spec.id.clone(),
            change,
            remote_id: snapshot.remote_id.clone(),
            attribute_diffs,
            old_hash: Some(self.hasher.hash_attributes(&snapshot.attributes)),
            new_hash,
        }
    }

    /// Classifies one attribute. Pure in (old, new, policy).
    fn classify(
        name: &str,
        old: Option<&AttributeValue>,
        new: Option<&AttributeValue>,
        policy: Mutability,
    ) -> AttributeDiff {
        let (class, set_changes) = match (old, new) {
            // Observed-only attributes (server-assigned) never force changes
            (Some(_), None) | (None, None) => (ChangeClass::NoOp, None),

            // Newly declared on a live resource: set in place. Immutable
            // policy only bites when a live value actually differs.
            (None, Some(_)) => (ChangeClass::UpdateInPlace, None),

            (Some(old_value), Some(new_value)) => {
                if let (AttributeValue::List(old_items), AttributeValue::List(new_items)) =
                    (old_value, new_value)
                {
                    let (added, removed) = Self::diff_sets(old_items, new_items);
                    if added.is_empty() && removed.is_empty() {
                        (ChangeClass::NoOp, None)
                    } else {
                        let class = match policy {
                            Mutability::Immutable => ChangeClass::ForceReplace,
                            Mutability::Updatable => ChangeClass::UpdateInPlace,
                        };
                        (class, Some(SetChanges { added, removed }))
                    }
                } else if old_value == new_value {
                    (ChangeClass::NoOp, None)
                } else {
                    let class = match policy {
                        Mutability::Immutable => ChangeClass::ForceReplace,
                        Mutability::Updatable => ChangeClass::UpdateInPlace,
                    };
                    (class, None)
                }
            }
        };

        AttributeDiff {
            attribute: name.to_string(),
            old: old.cloned(),
            new: new.cloned(),
            class,
            set_changes,
        }
    }

    /// Set-semantics difference between two lists.
    ///
    /// Elements are keyed by canonical rendering; duplicates within one
    /// list collapse, and elements present on both sides cancel out.
    fn diff_sets(
        old_items: &[AttributeValue],
        new_items: &[AttributeValue],
    ) -> (Vec<AttributeValue>, Vec<AttributeValue>) {
        let old_set: BTreeMap<String, &AttributeValue> =
            old_items.iter().map(|v| (v.canonical(), v)).collect();
        let new_set: BTreeMap<String, &AttributeValue> =
            new_items.iter().map(|v| (v.canonical(), v)).collect();

        let added = new_set
            .iter()
            .filter(|(key, _)| !old_set.contains_key(*key))
            .map(|(_, v)| (*v).clone())
            .collect();
        let removed = old_set
            .iter()
            .filter(|(key, _)| !new_set.contains_key(*key))
            .map(|(_, v)| (*v).clone())
            .collect();

        (added, removed)
    }

    /// Merges duplicate spec fragments for the same identifier.
    ///
    /// Equal duplicate declarations collapse silently; disagreeing ones
    /// are ambiguous desired state.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::Conflict`] on any disagreeing declaration.
    pub fn merge_fragments(specs: &[ResourceSpec]) -> Result<Vec<ResourceSpec>, DiffError> {
        let mut merged: BTreeMap<ResourceId, ResourceSpec> = BTreeMap::new();

        for fragment in specs {
            match merged.get_mut(&fragment.id) {
                None => {
                    merged.insert(fragment.id.clone(), fragment.clone());
                }
                Some(existing) => {
                    for (name, value) in &fragment.attributes {
                        if let Some(previous) = existing.attributes.get(name) {
                            if previous != value {
                                return Err(DiffError::Conflict {
                                    resource: fragment.id.to_string(),
                                    attribute: name.clone(),
                                    first: previous.canonical(),
                                    second: value.canonical(),
                                });
                            }
                        } else {
                            existing.attributes.insert(name.clone(), value.clone());
                        }
                    }
                    for (name, policy) in &fragment.mutability {
                        if let Some(previous) = existing.mutability.get(name) {
                            if previous != policy {
                                return Err(DiffError::Conflict {
                                    resource: fragment.id.to_string(),
                                    attribute: name.clone(),
                                    first: format!("{previous:?}"),
                                    second: format!("{policy:?}"),
                                });
                            }
                        } else {
                            existing.mutability.insert(name.clone(), *policy);
                        }
                    }
                    existing
                        .references
                        .extend(fragment.references.iter().cloned());
                }
            }
        }

        Ok(merged.into_values().collect())
    }

    /// Resolves reference values against observed state.
    ///
    /// `${type.name.id}` resolves to the referenced resource's remote
    /// identifier; other attributes resolve to their observed values.
    /// Unresolvable references are kept verbatim and compare unequal to
    /// any concrete value, which is exactly right when the referenced
    /// resource is about to be created or replaced.
    fn resolve_attributes(
        attributes: &BTreeMap<String, AttributeValue>,
        observed: &BTreeMap<ResourceId, ObservedState>,
    ) -> BTreeMap<String, AttributeValue> {
        attributes
            .iter()
            .map(|(name, value)| (name.clone(), Self::resolve_value(value, observed)))
            .collect()
    }

    fn resolve_value(
        value: &AttributeValue,
        observed: &BTreeMap<ResourceId, ObservedState>,
    ) -> AttributeValue {
        match value {
            AttributeValue::Reference(r) => {
                let Some(target) = observed.get(&r.resource) else {
                    return value.clone();
                };
                if r.attribute == "id" {
                    target
                        .remote_id
                        .as_ref()
                        .map_or_else(|| value.clone(), |id| AttributeValue::str(id.clone()))
                } else {
                    target
                        .attribute(&r.attribute)
                        .cloned()
                        .unwrap_or_else(|| value.clone())
                }
            }
            AttributeValue::List(items) => AttributeValue::List(
                items
                    .iter()
                    .map(|item| Self::resolve_value(item, observed))
                    .collect(),
            ),
            AttributeValue::Nested(map) => AttributeValue::Nested(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::resolve_value(v, observed)))
                    .collect(),
            ),
            AttributeValue::Str(_) | AttributeValue::Int(_) | AttributeValue::Bool(_) => {
                value.clone()
            }
        }
    }

    fn delete_diff(&self, id: &ResourceId, snapshot: &ObservedState) -> ResourceDiff {
        let attribute_diffs = snapshot
            .attributes
            .iter()
            .map(|(name, value)| AttributeDiff {
                attribute: name.clone(),
                old: Some(value.clone()),
                new: None,
                class: ChangeClass::NoOp,
                set_changes: None,
            })
            .collect();

        ResourceDiff {
            id: id.clone(),
            change: ResourceChange::Delete,
            remote_id: snapshot.remote_id.clone(),
            attribute_diffs,
            old_hash: Some(self.hasher.hash_attributes(&snapshot.attributes)),
            new_hash: None,
        }
    }

    /// A terminated resource counts as absent: it is on its way out and
    /// anything declared over it must be created anew.
    fn is_live(observed: &ObservedState) -> bool {
        observed.status != ResourceStatus::Terminated
    }

    fn count(diffs: &[ResourceDiff], change: ResourceChange) -> usize {
        diffs.iter().filter(|d| d.change == change).count()
    }
}

impl ResourceDiff {
    /// Returns the attribute diffs that require action.
    #[must_use]
    pub fn actionable_attributes(&self) -> Vec<&AttributeDiff> {
        self.attribute_diffs
            .iter()
            .filter(|d| d.class != ChangeClass::NoOp)
            .collect()
    }

    /// Returns the attributes whose change forces replacement.
    #[must_use]
    pub fn replace_triggers(&self) -> Vec<&str> {
        self.attribute_diffs
            .iter()
            .filter(|d| d.class == ChangeClass::ForceReplace)
            .map(|d| d.attribute.as_str())
            .collect()
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.replaces > 0 || self.deletes > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.change != ResourceChange::NoChange)
            .collect()
    }
}

impl std::fmt::Display for ChangeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoOp => "no-op",
            Self::UpdateInPlace => "update in place",
            Self::ForceReplace => "force replace",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.id, self.change)?;
        let actionable = self.actionable_attributes();
        if !actionable.is_empty() {
            write!(f, " (")?;
            for (i, diff) in actionable.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", diff.attribute)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_spec() -> ResourceSpec {
        ResourceSpec::new(ResourceId::new("instance", "web"), "mock")
            .with_attribute("image_id", AttributeValue::str("img-v1"))
            .with_attribute("instance_name", AttributeValue::str("web-01"))
    }

    fn observed_from(spec: &ResourceSpec) -> ObservedState {
        ObservedState::new(
            spec.id.clone(),
            spec.attributes.clone(),
            ResourceStatus::Running,
        )
        .with_remote_id("i-123")
    }

    #[test]
    fn test_create_when_unobserved() {
        let engine = DiffEngine::new();
        let spec = instance_spec();

        let diff = engine.diff_resource(&spec, None);

        assert_eq!(diff.change, ResourceChange::Create);
        assert_eq!(diff.attribute_diffs.len(), 2);
        assert!(diff.old_hash.is_none());
        assert!(diff.new_hash.is_some());
    }

    #[test]
    fn test_noop_when_identical() {
        let engine = DiffEngine::new();
        let spec = instance_spec();
        let observed = observed_from(&spec);

        let diff = engine.diff_resource(&spec, Some(&observed));

        assert_eq!(diff.change, ResourceChange::NoChange);
        assert!(diff.actionable_attributes().is_empty());
        // NoOp entries are retained for audit
        assert_eq!(diff.attribute_diffs.len(), 2);
    }

    #[test]
    fn test_update_in_place_for_updatable() {
        let engine = DiffEngine::new();
        let mut observed = observed_from(&instance_spec());
        observed
            .attributes
            .insert("instance_name".to_string(), AttributeValue::str("old-name"));

        let diff = engine.diff_resource(&instance_spec(), Some(&observed));

        assert_eq!(diff.change, ResourceChange::Update);
        let actionable = diff.actionable_attributes();
        assert_eq!(actionable.len(), 1);
        assert_eq!(actionable[0].attribute, "instance_name");
        assert_eq!(actionable[0].class, ChangeClass::UpdateInPlace);
    }

    #[test]
    fn test_force_replace_for_immutable() {
        let engine = DiffEngine::new();
        let mut observed = observed_from(&instance_spec());
        observed
            .attributes
            .insert("image_id".to_string(), AttributeValue::str("img-v0"));

        let diff = engine.diff_resource(&instance_spec(), Some(&observed));

        assert_eq!(diff.change, ResourceChange::Replace);
        assert_eq!(diff.replace_triggers(), vec!["image_id"]);
    }

    #[test]
    fn test_newly_declared_immutable_attribute_updates_in_place() {
        let engine = DiffEngine::new();
        let mut observed = observed_from(&instance_spec());
        // The live resource never reported an image_id; declaring one is
        // a first set, not a conflicting change
        observed.attributes.remove("image_id");

        let diff = engine.diff_resource(&instance_spec(), Some(&observed));

        assert_eq!(diff.change, ResourceChange::Update);
        let actionable = diff.actionable_attributes();
        assert_eq!(actionable.len(), 1);
        assert_eq!(actionable[0].attribute, "image_id");
        assert_eq!(actionable[0].class, ChangeClass::UpdateInPlace);
    }

    #[test]
    fn test_replace_dominates_updates() {
        let engine = DiffEngine::new();
        let mut observed = observed_from(&instance_spec());
        observed
            .attributes
            .insert("image_id".to_string(), AttributeValue::str("img-v0"));
        observed
            .attributes
            .insert("instance_name".to_string(), AttributeValue::str("old-name"));

        let diff = engine.diff_resource(&instance_spec(), Some(&observed));

        assert_eq!(diff.change, ResourceChange::Replace);
        assert_eq!(diff.actionable_attributes().len(), 2);
    }

    #[test]
    fn test_set_semantics_add_and_remove() {
        let engine = DiffEngine::new();
        let spec = ResourceSpec::new(ResourceId::new("instance", "web"), "mock").with_attribute(
            "security_groups",
            AttributeValue::List(vec![
                AttributeValue::str("sg-a"),
                AttributeValue::str("sg-b"),
            ]),
        );
        let mut observed = observed_from(&spec);
        observed.attributes.insert(
            "security_groups".to_string(),
            AttributeValue::List(vec![
                AttributeValue::str("sg-a"),
                AttributeValue::str("sg-c"),
            ]),
        );

        let diff = engine.diff_resource(&spec, Some(&observed));

        assert_eq!(diff.change, ResourceChange::Update);
        let sg_diff = &diff.actionable_attributes()[0];
        let changes = sg_diff.set_changes.as_ref().unwrap();
        assert_eq!(changes.added, vec![AttributeValue::str("sg-b")]);
        assert_eq!(changes.removed, vec![AttributeValue::str("sg-c")]);
    }

    #[test]
    fn test_set_reorder_and_duplicates_cancel_to_noop() {
        let engine = DiffEngine::new();
        let spec = ResourceSpec::new(ResourceId::new("instance", "web"), "mock").with_attribute(
            "security_groups",
            AttributeValue::List(vec![
                AttributeValue::str("sg-b"),
                AttributeValue::str("sg-a"),
                AttributeValue::str("sg-a"),
            ]),
        );
        let mut observed = observed_from(&spec);
        observed.attributes.insert(
            "security_groups".to_string(),
            AttributeValue::List(vec![
                AttributeValue::str("sg-a"),
                AttributeValue::str("sg-b"),
            ]),
        );

        let diff = engine.diff_resource(&spec, Some(&observed));

        assert_eq!(diff.change, ResourceChange::NoChange);
    }

    #[test]
    fn test_every_attribute_appears_exactly_once() {
        let engine = DiffEngine::new();
        let spec = instance_spec();
        let mut observed = observed_from(&spec);
        observed
            .attributes
            .insert("private_ip".to_string(), AttributeValue::str("10.0.0.8"));
        observed.attributes.remove("instance_name");

        let diff = engine.diff_resource(&spec, Some(&observed));

        let mut names: Vec<&str> = diff
            .attribute_diffs
            .iter()
            .map(|d| d.attribute.as_str())
            .collect();
        names.sort_unstable();
        assert_eq!(names, vec!["image_id", "instance_name", "private_ip"]);
    }

    #[test]
    fn test_observed_only_attribute_is_noop() {
        let engine = DiffEngine::new();
        let spec = instance_spec();
        let mut observed = observed_from(&spec);
        observed
            .attributes
            .insert("private_ip".to_string(), AttributeValue::str("10.0.0.8"));

        let diff = engine.diff_resource(&spec, Some(&observed));

        assert_eq!(diff.change, ResourceChange::NoChange);
    }

    #[test]
    fn test_conflicting_fragments_rejected() {
        let a = instance_spec();
        let b = ResourceSpec::new(ResourceId::new("instance", "web"), "mock")
            .with_attribute("image_id", AttributeValue::str("img-v2"));

        let result = DiffEngine::merge_fragments(&[a, b]);

        assert!(matches!(result, Err(DiffError::Conflict { .. })));
    }

    #[test]
    fn test_equal_fragments_collapse() {
        let a = instance_spec();
        let b = instance_spec();

        let merged = DiffEngine::merge_fragments(&[a, b]).unwrap();

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].attributes.len(), 2);
    }

    #[test]
    fn test_orphan_observed_resource_is_deleted() {
        let engine = DiffEngine::new();
        let orphan_id = ResourceId::new("instance", "stale");
        let mut observed = BTreeMap::new();
        observed.insert(
            orphan_id.clone(),
            ObservedState::new(orphan_id, BTreeMap::new(), ResourceStatus::Running),
        );

        let result = engine.diff_all(&[], &observed).unwrap();

        assert_eq!(result.deletes, 1);
        assert_eq!(result.diffs[0].change, ResourceChange::Delete);
    }

    #[test]
    fn test_terminated_resource_treated_as_absent() {
        let engine = DiffEngine::new();
        let spec = instance_spec();
        let mut observed = observed_from(&spec);
        observed.status = ResourceStatus::Terminated;

        let diff = engine.diff_resource(&spec, Some(&observed));

        assert_eq!(diff.change, ResourceChange::Create);
    }

    #[test]
    fn test_reference_resolves_against_observed_target() {
        let engine = DiffEngine::new();
        let sg_id = ResourceId::new("security_group", "web");
        let sg_spec = ResourceSpec::new(sg_id.clone(), "mock");
        let spec = ResourceSpec::new(ResourceId::new("instance", "web"), "mock").with_attribute(
            "security_groups",
            AttributeValue::List(vec![AttributeValue::reference(sg_id.clone(), "id")]),
        );

        let mut observed = BTreeMap::new();
        observed.insert(
            sg_id.clone(),
            ObservedState::new(sg_id, BTreeMap::new(), ResourceStatus::Running)
                .with_remote_id("sg-123"),
        );
        let mut instance_attrs = BTreeMap::new();
        instance_attrs.insert(
            "security_groups".to_string(),
            AttributeValue::List(vec![AttributeValue::str("sg-123")]),
        );
        observed.insert(
            spec.id.clone(),
            ObservedState::new(spec.id.clone(), instance_attrs, ResourceStatus::Running),
        );

        let result = engine.diff_all(&[sg_spec, spec], &observed).unwrap();

        // The reference resolves to sg-123, matching observed state
        assert_eq!(result.unchanged, 2);
        assert!(!result.has_changes());
    }
}
