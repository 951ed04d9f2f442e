//! Failure-impact graph.
//!
//! Adjacency reads in impact direction: `edges[x]` lists the components an
//! error in `x` cascades to. The graph is built once from configuration and
//! swapped wholesale on reload, so a traversal never sees a partial edit.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::types::ComponentId;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: HashMap<ComponentId, Vec<ComponentId>>,
}

impl DependencyGraph {
    pub fn new(edges: HashMap<ComponentId, Vec<ComponentId>>) -> Self {
        Self { edges }
    }

    /// Direct impact targets of one component, as configured.
    pub fn impacts_of(&self, component: &ComponentId) -> &[ComponentId] {
        self.edges.get(component).map_or(&[], Vec::as_slice)
    }

    /// Number of components that have outgoing edges.
    pub fn origin_count(&self) -> usize {
        self.edges.len()
    }

    /// Transitive impact closure of `origin`, origin included.
    ///
    /// Breadth-first with a visited set, so cycles and diamonds terminate
    /// and every component appears at most once.
    pub fn affected_by(&self, origin: &ComponentId) -> HashSet<ComponentId> {
        let mut affected = HashSet::new();
        let mut queue = VecDeque::new();
        affected.insert(origin.clone());
        queue.push_back(origin.clone());

        while let Some(current) = queue.pop_front() {
            if let Some(targets) = self.edges.get(&current) {
                for target in targets {
                    if affected.insert(target.clone()) {
                        queue.push_back(target.clone());
                    }
                }
            }
        }
        affected
    }
}

// ============================================================================
// Tests
// ============================================================================
