//! Concrete spec DAG backed by petgraph
//!
//! Nodes are keyed by content hash, so a package reachable along several
//! paths appears once. Edges point from dependent to dependency.

use dashmap::DashMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::ResolverResult;
use sprout_core::error::SproutError;
use sprout_core::types::{DepTypes, Spec, SpecHash};
use sprout_registry::SharingPolicy;

/// Graph of concrete specs rooted at one or more requested specs
#[derive(Debug)]
pub struct SpecDag {
    /// Underlying directed graph
    graph: DiGraph<Arc<Spec>, DepTypes>,
    /// Map from content hash to NodeIndex for fast lookups
    node_map: DashMap<SpecHash, NodeIndex>,
    /// Hashes of the requested roots, in request order
    roots: Vec<SpecHash>,
}

impl SpecDag {
    /// Build the DAG reachable from concrete `roots`. Under the
    /// single-instance policy two nodes of one package are rejected.
    pub fn from_roots(roots: &[Arc<Spec>], sharing: SharingPolicy) -> ResolverResult<Self> {
        let mut dag = Self {
            graph: DiGraph::new(),
            node_map: DashMap::new(),
            roots: Vec::new(),
        };

        for root in roots {
            let hash = dag.add_subtree(root)?;
            if !dag.roots.contains(&hash) {
                dag.roots.push(hash);
            }
        }

        if sharing == SharingPolicy::Single {
            let mut seen: HashMap<&str, &Arc<Spec>> = HashMap::new();
            for spec in dag.specs() {
                if let Some(other) = seen.insert(spec.name.as_str(), spec) {
                    return Err(SproutError::unsatisfiable(
                        &spec.name,
                        format!(
                            "{} and {} cannot share one DAG under the single-instance policy",
                            other.node_string(),
                            spec.node_string()
                        ),
                    ));
                }
            }
        }
        Ok(dag)
    }

    fn add_subtree(&mut self, spec: &Arc<Spec>) -> ResolverResult<SpecHash> {
        let hash = spec.hash().ok_or_else(|| {
            SproutError::unsatisfiable(&spec.name, "only concrete specs can be placed in a DAG")
        })?;
        if self.node_map.contains_key(&hash) {
            return Ok(hash);
        }

        let index = self.graph.add_node(spec.clone());
        self.node_map.insert(hash, index);

        for edge in &spec.dependencies {
            let child_hash = self.add_subtree(&edge.spec)?;
            let child_index = *self
                .node_map
                .get(&child_hash)
                .ok_or_else(|| SproutError::unsatisfiable(&edge.spec.name, "dependency vanished from DAG"))?;
            self.graph.add_edge(index, child_index, edge.types.clone());
        }
        Ok(hash)
    }

    fn index(&self, hash: &SpecHash) -> Option<NodeIndex> {
        self.node_map.get(hash).map(|idx| *idx)
    }

    pub fn roots(&self) -> &[SpecHash] {
        &self.roots
    }

    /// Root specs in request order
    pub fn root_specs(&self) -> Vec<Arc<Spec>> {
        self.roots.iter().filter_map(|h| self.get(h)).collect()
    }

    pub fn get(&self, hash: &SpecHash) -> Option<Arc<Spec>> {
        let index = self.index(hash)?;
        self.graph.node_weight(index).cloned()
    }

    pub fn contains(&self, hash: &SpecHash) -> bool {
        self.node_map.contains_key(hash)
    }

    /// Every node in the DAG
    pub fn specs(&self) -> impl Iterator<Item = &Arc<Spec>> {
        self.graph.node_weights()
    }

    /// Nodes of package `name`
    pub fn nodes_named(&self, name: &str) -> Vec<Arc<Spec>> {
        self.specs().filter(|s| s.name == name).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Direct dependencies of `hash`
    pub fn dependencies(&self, hash: &SpecHash) -> Vec<SpecHash> {
        self.neighbors(hash, Direction::Outgoing)
    }

    /// Direct dependents of `hash`
    pub fn dependents(&self, hash: &SpecHash) -> Vec<SpecHash> {
        self.neighbors(hash, Direction::Incoming)
    }

    fn neighbors(&self, hash: &SpecHash, direction: Direction) -> Vec<SpecHash> {
        let Some(index) = self.index(hash) else {
            return Vec::new();
        };
        let set: BTreeSet<SpecHash> = self
            .graph
            .edges_directed(index, direction)
            .filter_map(|edge| {
                let other = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                self.graph.node_weight(other).and_then(|s| s.hash())
            })
            .collect();
        set.into_iter().collect()
    }

    /// Every node that depends on `hash`, directly or transitively
    pub fn transitive_dependents(&self, hash: &SpecHash) -> Vec<SpecHash> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<SpecHash> = self.dependents(hash).into();
        let mut out = Vec::new();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                out.push(next);
                queue.extend(self.dependents(&next));
            }
        }
        out
    }

    /// Hashes ordered so that every dependency precedes its dependents
    pub fn topological_order(&self) -> ResolverResult<Vec<SpecHash>> {
        use petgraph::algo::toposort;

        match toposort(&self.graph, None) {
            Ok(sorted) => Ok(sorted
                .into_iter()
                .rev()
                .filter_map(|idx| self.graph.node_weight(idx))
                .filter_map(|spec| spec.hash())
                .collect()),
            Err(cycle) => {
                let name = self
                    .graph
                    .node_weight(cycle.node_id())
                    .map(|s| s.name.clone())
                    .unwrap_or_default();
                Err(SproutError::CyclicDependency {
                    cycle: format!("{} -> ... -> {}", name, name),
                })
            },
        }
    }
}

/// Find a dependency cycle in a name-labelled graph.
///
/// Returns the path with the first node repeated at the end.
pub fn find_cycle(graph: &DiGraph<String, ()>) -> Option<Vec<String>> {
    fn visit(
        graph: &DiGraph<String, ()>,
        node: NodeIndex,
        on_stack: &mut Vec<NodeIndex>,
        done: &mut HashSet<NodeIndex>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = on_stack.iter().position(|n| *n == node) {
            let mut cycle: Vec<String> = on_stack[pos..].iter().map(|n| graph[*n].clone()).collect();
            cycle.push(graph[node].clone());
            return Some(cycle);
        }
        if done.contains(&node) {
            return None;
        }

        on_stack.push(node);
        let mut next: Vec<NodeIndex> = graph.neighbors(node).collect();
        next.sort_by(|a, b| graph[*a].cmp(&graph[*b]));
        for child in next {
            if let Some(cycle) = visit(graph, child, on_stack, done) {
                return Some(cycle);
            }
        }
        on_stack.pop();
        done.insert(node);
        None
    }

    let mut done = HashSet::new();
    for start in graph.node_indices() {
        let mut on_stack = Vec::new();
        if let Some(cycle) = visit(graph, start, &mut on_stack, &mut done) {
            return Some(cycle);
        }
    }
    None
}

/// Format cycle as "a -> b -> a"
pub fn format_cycle(cycle: &[String]) -> String {
    cycle.join(" -> ")
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use petgraph::algo::toposort;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn cycle_detection_agrees_with_toposort(
            num_nodes in 2usize..8,
            edges in prop::collection::vec((0usize..7, 0usize..7), 0..15)
        ) {
            let mut graph = DiGraph::new();
            let nodes: Vec<NodeIndex> = (0..num_nodes)
                .map(|i| graph.add_node(format!("pkg{}", i)))
                .collect();
            for (from, to) in edges {
                if from < num_nodes && to < num_nodes && from != to {
                    graph.add_edge(nodes[from], nodes[to], ());
                }
            }

            let cycle = find_cycle(&graph);
            prop_assert_eq!(cycle.is_some(), toposort(&graph, None).is_err());
            if let Some(cycle) = cycle {
                prop_assert_eq!(cycle.first(), cycle.last());
            }
        }
    }
}
