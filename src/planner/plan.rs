//! Plan construction: ordering diffs into an executable action sequence.
//!
//! A plan is a topologically sorted list of create, update, and delete
//! actions. Referenced resources are created before their dependents and
//! deleted after them. A force-replace expands into a delete followed by
//! a create, each re-entering the ordering independently, and the
//! replacement cascades: dependents whose referencing attributes are
//! immutable are themselves replaced, others are updated so their
//! references resolve against the new incarnation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

use crate::error::PlanError;
use crate::resource::{Mutability, ResourceId, ResourceSpec};

use super::diff::{AttributeDiff, DiffResult, ResourceChange, ResourceDiff};
use super::graph::DependencyGraph;

/// Kinds of actions in a plan.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Create the resource remotely.
    Create,
    /// Change attributes on the live resource.
    Update,
    /// Destroy the resource remotely.
    Delete,
}

/// A single planned action.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    /// Action kind.
    pub kind: ActionKind,
    /// Resource this action targets.
    pub resource: ResourceId,
    /// Provider that owns the resource, when a spec declares one.
    pub provider: Option<String>,
    /// Desired spec, present for creates and updates.
    pub spec: Option<ResourceSpec>,
    /// Remote identifier, present for updates and deletes of observed
    /// resources.
    pub remote_id: Option<String>,
    /// Attribute diffs driving this action.
    pub attribute_diffs: Vec<AttributeDiff>,
    /// Why this action is in the plan.
    pub reason: String,
    /// Desired-spec hash, present when a spec is.
    pub new_hash: Option<String>,
    /// Indices of actions that must complete before this one starts.
    pub dependencies: Vec<usize>,
}

/// A complete, topologically ordered plan.
#[derive(Debug, Serialize)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Hash of the desired-state set this plan was built from.
    pub desired_hash: String,
    /// Actions in execution order. Every dependency index points at an
    /// earlier action.
    pub actions: Vec<PlannedAction>,
}

/// Builds plans from diff results.
#[derive(Debug, Default)]
pub struct PlanBuilder;

/// Working state for one resource while actions are being assembled.
struct PendingResource {
    change: ResourceChange,
    diff: Option<ResourceDiff>,
    cascade_from: Option<ResourceId>,
    cascade_attrs: Vec<String>,
}

impl PlanBuilder {
    /// Creates a new plan builder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Builds a topologically ordered plan from a diff result.
    ///
    /// `specs` supplies the declared resources: spec payloads for
    /// creates and updates, and the reference edges that order the plan.
    /// On destroy runs the diff contains only deletes but the specs are
    /// still passed so teardown order follows the reference graph in
    /// reverse.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Cycle`] when the reference graph is not
    /// acyclic, and [`PlanError::MissingSpec`] when a create or update
    /// has no spec to execute with. Both are terminal; no mutation is
    /// issued for a plan that fails to build.
    pub fn build(
        &self,
        diff: &DiffResult,
        specs: &[ResourceSpec],
        desired_hash: &str,
    ) -> Result<Plan, PlanError> {
        let spec_map: BTreeMap<&ResourceId, &ResourceSpec> =
            specs.iter().map(|s| (&s.id, s)).collect();

        // Reference graph over every id we know about; cycle detection
        // happens before any action exists.
        let mut graph = DependencyGraph::new();
        for spec in specs {
            let node = graph.add_node(spec.id.clone());
            for reference in &spec.references {
                let dep = graph.add_node(reference.clone());
                graph.add_edge(node, dep);
            }
        }
        for rd in &diff.diffs {
            graph.add_node(rd.id.clone());
        }
        graph.topological_order()?;

        let mut pending = Self::collect_pending(diff);
        Self::cascade_replacements(&mut pending, specs);

        let actions = Self::assemble_actions(&pending, &spec_map)?;
        let ordered = Self::order_actions(actions)?;

        debug!("Built plan with {} action(s)", ordered.len());

        Ok(Plan {
            created_at: Utc::now(),
            desired_hash: desired_hash.to_string(),
            actions: ordered,
        })
    }

    /// Creates an empty plan (no changes needed).
    #[must_use]
    pub fn empty(desired_hash: &str) -> Plan {
        Plan {
            created_at: Utc::now(),
            desired_hash: desired_hash.to_string(),
            actions: vec![],
        }
    }

    fn collect_pending(diff: &DiffResult) -> BTreeMap<ResourceId, PendingResource> {
        let mut pending = BTreeMap::new();
        for rd in &diff.diffs {
            pending.insert(
                rd.id.clone(),
                PendingResource {
                    change: rd.change,
                    diff: Some(rd.clone()),
                    cascade_from: None,
                    cascade_attrs: Vec::new(),
                },
            );
        }
        pending
    }

    /// Propagates replacements to dependents.
    ///
    /// A dependent whose referencing attribute is immutable must itself
    /// be replaced; one whose referencing attribute is updatable gets an
    /// update so the reference re-resolves. Runs to a fixpoint since
    /// changes only escalate.
    fn cascade_replacements(
        pending: &mut BTreeMap<ResourceId, PendingResource>,
        specs: &[ResourceSpec],
    ) {
        let mut queue: VecDeque<ResourceId> = pending
            .iter()
            .filter(|(_, p)| p.change == ResourceChange::Replace)
            .map(|(id, _)| id.clone())
            .collect();

        while let Some(replaced) = queue.pop_front() {
            for spec in specs {
                if !spec.references.contains(&replaced) {
                    continue;
                }

                // Attributes of this spec whose values reference the
                // replaced resource, and whether any of them is immutable
                let mut touched = Vec::new();
                let mut forces_replace = false;
                for (name, value) in &spec.attributes {
                    let mut refs = Vec::new();
                    value.collect_references(&mut refs);
                    if refs.iter().any(|r| r.resource == replaced) {
                        touched.push(name.clone());
                        if spec.mutability_of(name) == Mutability::Immutable {
                            forces_replace = true;
                        }
                    }
                }
                if touched.is_empty() {
                    // Pure ordering dependency; nothing to re-resolve
                    continue;
                }

                let entry = pending
                    .entry(spec.id.clone())
                    .or_insert_with(|| PendingResource {
                        change: ResourceChange::NoChange,
                        diff: None,
                        cascade_from: None,
                        cascade_attrs: Vec::new(),
                    });

                let escalated = match entry.change {
                    ResourceChange::Create | ResourceChange::Delete | ResourceChange::Replace => {
                        None
                    }
                    ResourceChange::Update => forces_replace.then_some(ResourceChange::Replace),
                    ResourceChange::NoChange => Some(if forces_replace {
                        ResourceChange::Replace
                    } else {
                        ResourceChange::Update
                    }),
                };

                if let Some(change) = escalated {
                    debug!(
                        "Cascading {change} to {} because {replaced} is being replaced",
                        spec.id
                    );
                    entry.change = change;
                    entry.cascade_from = Some(replaced.clone());
                    entry.cascade_attrs = touched;
                    if change == ResourceChange::Replace {
                        queue.push_back(spec.id.clone());
                    }
                }
            }
        }
    }

    fn assemble_actions(
        pending: &BTreeMap<ResourceId, PendingResource>,
        spec_map: &BTreeMap<&ResourceId, &ResourceSpec>,
    ) -> Result<Vec<PlannedAction>, PlanError> {
        let mut actions = Vec::new();

        for (id, entry) in pending {
            let diff = entry.diff.as_ref();
            let remote_id = diff.and_then(|d| d.remote_id.clone());
            let actionable: Vec<AttributeDiff> = diff
                .map(|d| {
                    d.actionable_attributes()
                        .into_iter()
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            match entry.change {
                ResourceChange::NoChange => {}

                ResourceChange::Create => {
                    let spec = Self::require_spec(spec_map, id)?;
                    actions.push(PlannedAction {
                        kind: ActionKind::Create,
                        resource: id.clone(),
                        provider: Some(spec.provider.clone()),
                        spec: Some(spec.clone()),
                        remote_id: None,
                        attribute_diffs: actionable,
                        reason: String::from("declared but not observed"),
                        new_hash: diff.and_then(|d| d.new_hash.clone()),
                        dependencies: vec![],
                    });
                }

                ResourceChange::Update => {
                    let spec = Self::require_spec(spec_map, id)?;
                    let reason = entry.cascade_from.as_ref().map_or_else(
                        || Self::update_reason(&actionable),
                        |cause| format!("referenced resource {cause} is being replaced"),
                    );
                    actions.push(PlannedAction {
                        kind: ActionKind::Update,
                        resource: id.clone(),
                        provider: Some(spec.provider.clone()),
                        spec: Some(spec.clone()),
                        remote_id,
                        attribute_diffs: actionable,
                        reason,
                        new_hash: diff.and_then(|d| d.new_hash.clone()),
                        dependencies: vec![],
                    });
                }

                ResourceChange::Delete => {
                    actions.push(PlannedAction {
                        kind: ActionKind::Delete,
                        resource: id.clone(),
                        provider: spec_map.get(id).map(|s| s.provider.clone()),
                        spec: spec_map.get(id).map(|s| (*s).clone()),
                        remote_id,
                        attribute_diffs: vec![],
                        reason: String::from("no longer declared"),
                        new_hash: None,
                        dependencies: vec![],
                    });
                }

                ResourceChange::Replace => {
                    let spec = Self::require_spec(spec_map, id)?;
                    let reason = entry.cascade_from.as_ref().map_or_else(
                        || {
                            let triggers = diff
                                .map(|d| d.replace_triggers().join(", "))
                                .unwrap_or_default();
                            format!("immutable attribute change: {triggers}")
                        },
                        |cause| format!("referenced resource {cause} is being replaced"),
                    );

                    let delete_idx = actions.len();
                    actions.push(PlannedAction {
                        kind: ActionKind::Delete,
                        resource: id.clone(),
                        provider: Some(spec.provider.clone()),
                        spec: Some(spec.clone()),
                        remote_id,
                        attribute_diffs: vec![],
                        reason: reason.clone(),
                        new_hash: None,
                        dependencies: vec![],
                    });
                    actions.push(PlannedAction {
                        kind: ActionKind::Create,
                        resource: id.clone(),
                        provider: Some(spec.provider.clone()),
                        spec: Some(spec.clone()),
                        remote_id: None,
                        attribute_diffs: actionable,
                        reason,
                        new_hash: diff.and_then(|d| d.new_hash.clone()),
                        // The new incarnation waits for the old one to go
                        dependencies: vec![delete_idx],
                    });
                }
            }
        }

        Ok(actions)
    }

    fn update_reason(actionable: &[AttributeDiff]) -> String {
        let names: Vec<&str> = actionable.iter().map(|d| d.attribute.as_str()).collect();
        if names.is_empty() {
            String::from("attributes changed in place")
        } else {
            format!("updating {}", names.join(", "))
        }
    }

    fn require_spec<'a>(
        spec_map: &BTreeMap<&ResourceId, &'a ResourceSpec>,
        id: &ResourceId,
    ) -> Result<&'a ResourceSpec, PlanError> {
        spec_map.get(id).copied().ok_or_else(|| PlanError::MissingSpec {
            resource: id.to_string(),
        })
    }

    /// Adds cross-resource edges and sorts the actions topologically.
    ///
    /// Creates and updates wait for the materialization of everything
    /// they reference; a referenced resource's delete waits for its
    /// dependents' deletes. Ties break deletes-first, then by resource
    /// id, so output is deterministic.
    fn order_actions(mut actions: Vec<PlannedAction>) -> Result<Vec<PlannedAction>, PlanError> {
        let mut materialize: BTreeMap<ResourceId, usize> = BTreeMap::new();
        let mut delete: BTreeMap<ResourceId, usize> = BTreeMap::new();
        for (idx, action) in actions.iter().enumerate() {
            match action.kind {
                ActionKind::Create | ActionKind::Update => {
                    materialize.insert(action.resource.clone(), idx);
                }
                ActionKind::Delete => {
                    delete.insert(action.resource.clone(), idx);
                }
            }
        }

        let mut extra_edges: Vec<(usize, usize)> = Vec::new();
        for (idx, action) in actions.iter().enumerate() {
            let Some(spec) = &action.spec else { continue };
            for reference in &spec.references {
                match action.kind {
                    ActionKind::Create | ActionKind::Update => {
                        if let Some(&dep) = materialize.get(reference) {
                            extra_edges.push((idx, dep));
                        }
                    }
                    ActionKind::Delete => {
                        if let Some(&dep_delete) = delete.get(reference) {
                            // The referenced resource is deleted after us
                            extra_edges.push((dep_delete, idx));
                        }
                    }
                }
            }
        }
        for (dependent, dependency) in extra_edges {
            if dependent != dependency && !actions[dependent].dependencies.contains(&dependency) {
                actions[dependent].dependencies.push(dependency);
            }
        }

        // Kahn over action indices. The reference graph was already
        // verified acyclic, and same-resource pairs only add
        // delete-before-create edges, so this cannot fail on well-formed
        // input; the error path guards against malformed dependencies.
        let mut indegree: Vec<usize> = actions.iter().map(|a| a.dependencies.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); actions.len()];
        for (idx, action) in actions.iter().enumerate() {
            for &dep in &action.dependencies {
                dependents[dep].push(idx);
            }
        }

        let rank = |action: &PlannedAction| match action.kind {
            ActionKind::Delete => 0u8,
            ActionKind::Create | ActionKind::Update => 1,
        };
        let mut ready: BTreeSet<(u8, ResourceId, usize)> = indegree
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d == 0)
            .map(|(i, _)| (rank(&actions[i]), actions[i].resource.clone(), i))
            .collect();

        let mut order = Vec::with_capacity(actions.len());
        while let Some(first) = ready.first().cloned() {
            ready.remove(&first);
            let idx = first.2;
            order.push(idx);
            for &dependent in &dependents[idx] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.insert((
                        rank(&actions[dependent]),
                        actions[dependent].resource.clone(),
                        dependent,
                    ));
                }
            }
        }

        if order.len() != actions.len() {
            let stuck: Vec<String> = actions
                .iter()
                .enumerate()
                .filter(|(i, _)| !order.contains(i))
                .map(|(_, a)| a.resource.to_string())
                .collect();
            return Err(PlanError::Cycle {
                cycle: stuck.join(" -> "),
            });
        }

        // Remap indices into the new order
        let mut new_index = vec![0usize; actions.len()];
        for (new_pos, &old_idx) in order.iter().enumerate() {
            new_index[old_idx] = new_pos;
        }

        let mut ordered: Vec<PlannedAction> = Vec::with_capacity(actions.len());
        for &old_idx in &order {
            let mut action = actions[old_idx].clone();
            action.dependencies = action
                .dependencies
                .iter()
                .map(|&d| new_index[d])
                .collect();
            action.dependencies.sort_unstable();
            ordered.push(action);
        }

        Ok(ordered)
    }
}

impl Plan {
    /// Returns true if the plan is empty (no changes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of actions of one kind.
    #[must_use]
    pub fn count_of(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    /// Returns actions with no dependencies, runnable immediately.
    #[must_use]
    pub fn ready_actions(&self) -> Vec<&PlannedAction> {
        self.actions
            .iter()
            .filter(|a| a.dependencies.is_empty())
            .collect()
    }

    /// Returns actions that depend on a specific action index.
    #[must_use]
    pub fn dependent_actions(&self, action_idx: usize) -> Vec<(usize, &PlannedAction)> {
        self.actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.dependencies.contains(&action_idx))
            .collect()
    }
}

impl PlannedAction {
    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.kind {
            ActionKind::Create => format!("Create {}", self.resource),
            ActionKind::Update => format!("Update {}", self.resource),
            ActionKind::Delete => format!("Delete {}", self.resource),
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.resource)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::DiffEngine;
    use crate::resource::{AttributeValue, ObservedState, ResourceStatus};

    fn sg_spec() -> ResourceSpec {
        ResourceSpec::new(ResourceId::new("security_group", "web"), "mock")
            .with_attribute("description", AttributeValue::str("web tier"))
    }

    fn instance_spec() -> ResourceSpec {
        ResourceSpec::new(ResourceId::new("instance", "web"), "mock")
            .with_attribute("image_id", AttributeValue::str("img-v1"))
            .with_attribute(
                "security_groups",
                AttributeValue::List(vec![AttributeValue::reference(
                    ResourceId::new("security_group", "web"),
                    "id",
                )]),
            )
    }

    fn position(plan: &Plan, kind: ActionKind, resource: &ResourceId) -> usize {
        plan.actions
            .iter()
            .position(|a| a.kind == kind && a.resource == *resource)
            .unwrap()
    }

    #[test]
    fn test_create_ordering_respects_references() {
        let engine = DiffEngine::new();
        let specs = vec![sg_spec(), instance_spec()];
        let diff = engine.diff_all(&specs, &BTreeMap::new()).unwrap();

        let plan = PlanBuilder::new().build(&diff, &specs, "hash").unwrap();

        let sg_pos = position(&plan, ActionKind::Create, &sg_spec().id);
        let inst_pos = position(&plan, ActionKind::Create, &instance_spec().id);
        assert!(sg_pos < inst_pos);
        assert!(plan.actions[inst_pos].dependencies.contains(&sg_pos));
    }

    #[test]
    fn test_delete_reverse_order_on_teardown() {
        let engine = DiffEngine::new();
        let specs = vec![sg_spec(), instance_spec()];

        let mut observed = BTreeMap::new();
        for spec in &specs {
            observed.insert(
                spec.id.clone(),
                ObservedState::new(
                    spec.id.clone(),
                    spec.attributes.clone(),
                    ResourceStatus::Running,
                )
                .with_remote_id(format!("r-{}", spec.id.name)),
            );
        }

        // Destroy: nothing desired, everything observed
        let diff = engine.diff_all(&[], &observed).unwrap();
        let plan = PlanBuilder::new().build(&diff, &specs, "hash").unwrap();

        let inst_pos = position(&plan, ActionKind::Delete, &instance_spec().id);
        let sg_pos = position(&plan, ActionKind::Delete, &sg_spec().id);
        assert!(inst_pos < sg_pos);
        assert!(plan.actions[sg_pos].dependencies.contains(&inst_pos));
    }

    #[test]
    fn test_replace_expands_to_delete_then_create() {
        let engine = DiffEngine::new();
        let spec = ResourceSpec::new(ResourceId::new("instance", "web"), "mock")
            .with_attribute("image_id", AttributeValue::str("img-v2"));

        let mut old_attrs = BTreeMap::new();
        old_attrs.insert("image_id".to_string(), AttributeValue::str("img-v1"));
        let mut observed = BTreeMap::new();
        observed.insert(
            spec.id.clone(),
            ObservedState::new(spec.id.clone(), old_attrs, ResourceStatus::Running)
                .with_remote_id("i-old"),
        );

        let specs = vec![spec.clone()];
        let diff = engine.diff_all(&specs, &observed).unwrap();
        let plan = PlanBuilder::new().build(&diff, &specs, "hash").unwrap();

        assert_eq!(plan.action_count(), 2);
        assert_eq!(plan.actions[0].kind, ActionKind::Delete);
        assert_eq!(plan.actions[0].remote_id.as_deref(), Some("i-old"));
        assert_eq!(plan.actions[1].kind, ActionKind::Create);
        assert!(plan.actions[1].dependencies.contains(&0));
        assert!(plan.actions[0].reason.contains("image_id"));
    }

    #[test]
    fn test_cycle_fails_before_planning() {
        let engine = DiffEngine::new();
        let x = ResourceSpec::new(ResourceId::new("instance", "x"), "mock")
            .with_dependency(ResourceId::new("instance", "y"));
        let y = ResourceSpec::new(ResourceId::new("instance", "y"), "mock")
            .with_dependency(ResourceId::new("instance", "x"));

        let specs = vec![x, y];
        let diff = engine.diff_all(&specs, &BTreeMap::new()).unwrap();
        let result = PlanBuilder::new().build(&diff, &specs, "hash");

        assert!(matches!(result, Err(PlanError::Cycle { .. })));
    }

    #[test]
    fn test_cascade_update_when_dependency_replaced() {
        let engine = DiffEngine::new();
        let sg = ResourceSpec::new(ResourceId::new("security_group", "web"), "mock")
            .with_attribute("vpc_id", AttributeValue::str("vpc-new"));
        let instance = instance_spec();
        let specs = vec![sg.clone(), instance.clone()];

        let mut observed = BTreeMap::new();
        // Security group exists with a different immutable vpc_id
        let mut sg_attrs = BTreeMap::new();
        sg_attrs.insert("vpc_id".to_string(), AttributeValue::str("vpc-old"));
        observed.insert(
            sg.id.clone(),
            ObservedState::new(sg.id.clone(), sg_attrs, ResourceStatus::Running)
                .with_remote_id("sg-old"),
        );
        // Instance matches its spec exactly (reference resolves to sg-old)
        let mut inst_attrs = BTreeMap::new();
        inst_attrs.insert("image_id".to_string(), AttributeValue::str("img-v1"));
        inst_attrs.insert(
            "security_groups".to_string(),
            AttributeValue::List(vec![AttributeValue::str("sg-old")]),
        );
        observed.insert(
            instance.id.clone(),
            ObservedState::new(instance.id.clone(), inst_attrs, ResourceStatus::Running)
                .with_remote_id("i-1"),
        );

        let diff = engine.diff_all(&specs, &observed).unwrap();
        let plan = PlanBuilder::new().build(&diff, &specs, "hash").unwrap();

        // Replace of the security group plus a cascaded instance update
        let update_pos = position(&plan, ActionKind::Update, &instance.id);
        let create_pos = position(&plan, ActionKind::Create, &sg.id);
        assert!(create_pos < update_pos);
        assert!(plan.actions[update_pos].dependencies.contains(&create_pos));
        assert!(plan.actions[update_pos].reason.contains("security_group.web"));
    }

    #[test]
    fn test_cascade_replace_through_immutable_reference() {
        let engine = DiffEngine::new();
        let vswitch = ResourceSpec::new(ResourceId::new("vswitch", "main"), "mock")
            .with_attribute("cidr_block", AttributeValue::str("172.16.1.0/24"));
        let instance = ResourceSpec::new(ResourceId::new("instance", "web"), "mock")
            .with_attribute(
                "vswitch_id",
                AttributeValue::reference(vswitch.id.clone(), "id"),
            );
        let specs = vec![vswitch.clone(), instance.clone()];

        let mut observed = BTreeMap::new();
        let mut vs_attrs = BTreeMap::new();
        vs_attrs.insert("cidr_block".to_string(), AttributeValue::str("172.16.0.0/24"));
        observed.insert(
            vswitch.id.clone(),
            ObservedState::new(vswitch.id.clone(), vs_attrs, ResourceStatus::Running)
                .with_remote_id("vsw-old"),
        );
        let mut inst_attrs = BTreeMap::new();
        inst_attrs.insert("vswitch_id".to_string(), AttributeValue::str("vsw-old"));
        observed.insert(
            instance.id.clone(),
            ObservedState::new(instance.id.clone(), inst_attrs, ResourceStatus::Running)
                .with_remote_id("i-1"),
        );

        let diff = engine.diff_all(&specs, &observed).unwrap();
        let plan = PlanBuilder::new().build(&diff, &specs, "hash").unwrap();

        // Both resources replaced: four actions, deletes in dependent-first
        // order, creates in dependency-first order
        assert_eq!(plan.action_count(), 4);
        let inst_del = position(&plan, ActionKind::Delete, &instance.id);
        let vsw_del = position(&plan, ActionKind::Delete, &vswitch.id);
        let inst_create = position(&plan, ActionKind::Create, &instance.id);
        let vsw_create = position(&plan, ActionKind::Create, &vswitch.id);
        assert!(inst_del < vsw_del);
        assert!(vsw_create < inst_create);
    }

    #[test]
    fn test_empty_plan_when_no_changes() {
        let engine = DiffEngine::new();
        let spec = sg_spec();
        let mut observed = BTreeMap::new();
        observed.insert(
            spec.id.clone(),
            ObservedState::new(
                spec.id.clone(),
                spec.attributes.clone(),
                ResourceStatus::Running,
            ),
        );

        let specs = vec![spec];
        let diff = engine.diff_all(&specs, &observed).unwrap();
        let plan = PlanBuilder::new().build(&diff, &specs, "hash").unwrap();

        assert!(plan.is_empty());
    }

    #[test]
    fn test_update_carries_remote_id_and_spec() {
        let engine = DiffEngine::new();
        let spec = ResourceSpec::new(ResourceId::new("instance", "web"), "mock")
            .with_attribute("instance_name", AttributeValue::str("new-name"));

        let mut attrs = BTreeMap::new();
        attrs.insert("instance_name".to_string(), AttributeValue::str("old-name"));
        let mut observed = BTreeMap::new();
        observed.insert(
            spec.id.clone(),
            ObservedState::new(spec.id.clone(), attrs, ResourceStatus::Running)
                .with_remote_id("i-42"),
        );

        let specs = vec![spec];
        let diff = engine.diff_all(&specs, &observed).unwrap();
        let plan = PlanBuilder::new().build(&diff, &specs, "hash").unwrap();

        assert_eq!(plan.action_count(), 1);
        let action = &plan.actions[0];
        assert_eq!(action.kind, ActionKind::Update);
        assert_eq!(action.remote_id.as_deref(), Some("i-42"));
        assert!(action.spec.is_some());
        assert_eq!(action.attribute_diffs.len(), 1);
    }
}
