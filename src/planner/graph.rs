//! Resource dependency graph and topological ordering.
//!
//! Edges point from a dependent resource to the resource it references.
//! Ordering uses Kahn's algorithm with a sorted ready set, so the output
//! is deterministic for a given set of nodes and edges. A graph that is
//! not acyclic is terminal: the cycle is rendered into the error and no
//! ordering is produced.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::PlanError;
use crate::resource::ResourceId;

/// Dependency graph over resource identifiers.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Node payloads, indexed by insertion order.
    nodes: Vec<ResourceId>,
    /// Identifier to node index.
    index: BTreeMap<ResourceId, usize>,
    /// Prerequisites per node.
    deps: Vec<BTreeSet<usize>>,
    /// Dependents per node.
    rdeps: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: BTreeMap::new(),
            deps: Vec::new(),
            rdeps: Vec::new(),
        }
    }

    /// Adds a node, returning its index. Adding the same identifier
    /// twice returns the existing index.
    pub fn add_node(&mut self, id: ResourceId) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.nodes.len();
        self.index.insert(id.clone(), idx);
        self.nodes.push(id);
        self.deps.push(BTreeSet::new());
        self.rdeps.push(BTreeSet::new());
        idx
    }

    /// Records that `dependent` depends on `dependency`.
    pub fn add_edge(&mut self, dependent: usize, dependency: usize) {
        if dependent == dependency {
            return;
        }
        self.deps[dependent].insert(dependency);
        self.rdeps[dependency].insert(dependent);
    }

    /// Returns the identifier at a node index.
    #[must_use]
    pub fn node(&self, idx: usize) -> &ResourceId {
        &self.nodes[idx]
    }

    /// Looks up the node index for an identifier.
    #[must_use]
    pub fn index_of(&self, id: &ResourceId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Returns the prerequisites of a node.
    #[must_use]
    pub fn dependencies_of(&self, idx: usize) -> &BTreeSet<usize> {
        &self.deps[idx]
    }

    /// Returns the dependents of a node.
    #[must_use]
    pub fn dependents_of(&self, idx: usize) -> &BTreeSet<usize> {
        &self.rdeps[idx]
    }

    /// Returns the number of nodes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Computes a topological order: every node appears after all of its
    /// prerequisites. Ties break on node index, so insertion order (and
    /// therefore resource id order, when callers insert sorted) decides.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Cycle`] with the rendered cycle path when
    /// the graph is not acyclic.
    pub fn topological_order(&self) -> Result<Vec<usize>, PlanError> {
        let mut indegree: Vec<usize> = self.deps.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(&idx) = ready.first() {
            ready.remove(&idx);
            order.push(idx);
            for &dependent in &self.rdeps[idx] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            let remaining: BTreeSet<usize> = (0..self.nodes.len())
                .filter(|i| !order.contains(i))
                .collect();
            Err(PlanError::Cycle {
                cycle: self.render_cycle(&remaining),
            })
        }
    }

    /// Walks the leftover subgraph until a node repeats, then renders
    /// the loop as `a -> b -> a`. Every leftover node has at least one
    /// leftover prerequisite, so the walk always closes.
    fn render_cycle(&self, remaining: &BTreeSet<usize>) -> String {
        let Some(&start) = remaining.first() else {
            return String::from("<empty>");
        };

        let mut path: Vec<usize> = Vec::new();
        let mut seen: BTreeMap<usize, usize> = BTreeMap::new();
        let mut current = start;

        loop {
            if let Some(&pos) = seen.get(&current) {
                let mut names: Vec<String> =
                    path[pos..].iter().map(|&i| self.nodes[i].to_string()).collect();
                names.push(self.nodes[current].to_string());
                return names.join(" -> ");
            }
            seen.insert(current, path.len());
            path.push(current);

            match self.deps[current].iter().find(|d| remaining.contains(d)) {
                Some(&next) => current = next,
                None => return self.nodes[current].to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ResourceId {
        ResourceId::new("instance", name)
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(id("a"));
        let b = graph.add_node(id("b"));
        let c = graph.add_node(id("c"));
        // b depends on a, c depends on b
        graph.add_edge(b, a);
        graph.add_edge(c, b);

        let order = graph.topological_order().unwrap();

        let pos = |idx: usize| order.iter().position(|&i| i == idx).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn test_order_is_deterministic_for_independent_nodes() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(id("a"));
        let b = graph.add_node(id("b"));
        let c = graph.add_node(id("c"));

        let order = graph.topological_order().unwrap();

        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn test_cycle_is_rejected_and_rendered() {
        let mut graph = DependencyGraph::new();
        let x = graph.add_node(id("x"));
        let y = graph.add_node(id("y"));
        graph.add_edge(x, y);
        graph.add_edge(y, x);

        let err = graph.topological_order().unwrap_err();

        let PlanError::Cycle { cycle } = err else {
            panic!("expected cycle error");
        };
        assert!(cycle.contains("instance.x"));
        assert!(cycle.contains("instance.y"));
        assert!(cycle.contains("->"));
    }

    #[test]
    fn test_duplicate_node_returns_same_index() {
        let mut graph = DependencyGraph::new();
        let first = graph.add_node(id("a"));
        let second = graph.add_node(id("a"));
        assert_eq!(first, second);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_self_edge_is_ignored() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(id("a"));
        graph.add_edge(a, a);
        assert!(graph.topological_order().is_ok());
    }
}
