//! Wait-for graph and cycle detection.
//!
//! An edge `a -> b` means process `a` is blocked on a resource type that `b`
//! currently holds. Graphs are cheap value types rebuilt from scratch on every
//! detector tick; see [`ResourceManager::build_wait_for_graph`] for how edges
//! are derived.
//!
//! [`ResourceManager::build_wait_for_graph`]: crate::manager::ResourceManager::build_wait_for_graph

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::types::ProcessId;

/// Directed graph over process ids with deterministic (ascending id) iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WaitForGraph {
    adjacency: BTreeMap<ProcessId, Vec<ProcessId>>,
}

/// DFS marking. Unvisited nodes have no entry.
#[derive(Debug, Clone, Copy)]
enum Mark {
    /// On the current path, at this depth of the explicit stack.
    OnPath(usize),
    Done,
}

impl WaitForGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a graph with nodes `0..n` and no edges.
    #[must_use]
    pub fn with_nodes(n: usize) -> Self {
        Self { adjacency: (0..n).map(|i| (i, Vec::new())).collect() }
    }

    /// Builds a graph from `(node, successors)` pairs.
    ///
    /// Successors are kept in the given order; duplicates are dropped.
    pub fn from_adjacency<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ProcessId, S)>,
        S: IntoIterator<Item = ProcessId>,
    {
        let mut graph = Self::new();
        for (from, successors) in entries {
            graph.add_node(from);
            for to in successors {
                graph.add_edge(from, to);
            }
        }
        graph
    }

    /// Adds a node with no edges if it is not present.
    pub fn add_node(&mut self, node: ProcessId) {
        self.adjacency.entry(node).or_default();
    }

    /// Adds the edge `from -> to`. Returns false if it already existed.
    pub fn add_edge(&mut self, from: ProcessId, to: ProcessId) -> bool {
        self.add_node(to);
        let successors = self.adjacency.entry(from).or_default();
        if successors.contains(&to) {
            return false;
        }
        successors.push(to);
        true
    }

    /// Successors of `node` in insertion order (empty for unknown nodes).
    #[must_use]
    pub fn successors(&self, node: ProcessId) -> &[ProcessId] {
        self.adjacency.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Returns true if the edge `from -> to` exists.
    #[must_use]
    pub fn has_edge(&self, from: ProcessId, to: ProcessId) -> bool {
        self.successors(from).contains(&to)
    }

    /// Node ids in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.adjacency.keys().copied()
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }

    /// Finds one cycle, or `None` if the graph is acyclic.
    ///
    /// Iterative depth-first search from each unvisited node in ascending id
    /// order, following successors in insertion order. When an edge reaches a
    /// node that is on the current path, the cycle is the path suffix starting
    /// at that node. The closing node is not repeated: for `0 -> 1 -> 2 -> 0`
    /// the result is `[0, 1, 2]`.
    ///
    /// The result depends only on the graph, so it is reproducible.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<ProcessId>> {
        let mut marks: HashMap<ProcessId, Mark> = HashMap::with_capacity(self.adjacency.len());
        // Explicit DFS stack of (node, index of the next successor to try).
        let mut stack: Vec<(ProcessId, usize)> = Vec::new();

        for root in self.nodes() {
            if marks.contains_key(&root) {
                continue;
            }
            marks.insert(root, Mark::OnPath(0));
            stack.push((root, 0));

            while let Some(&(node, cursor)) = stack.last() {
                let Some(&next) = self.successors(node).get(cursor) else {
                    stack.pop();
                    marks.insert(node, Mark::Done);
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                match marks.get(&next).copied() {
                    None => {
                        marks.insert(next, Mark::OnPath(stack.len()));
                        stack.push((next, 0));
                    }
                    Some(Mark::OnPath(depth)) => {
                        return Some(stack[depth..].iter().map(|&(n, _)| n).collect());
                    }
                    Some(Mark::Done) => {}
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_rotation_of(cycle: &[ProcessId], expected: &[ProcessId]) -> bool {
        cycle.len() == expected.len()
            && (0..expected.len()).any(|shift| {
                cycle.iter().enumerate().all(|(i, n)| *n == expected[(i + shift) % expected.len()])
            })
    }

    #[test]
    fn test_three_cycle_found() {
        let graph = WaitForGraph::from_adjacency([(0, vec![1]), (1, vec![2]), (2, vec![0])]);
        let cycle = graph.find_cycle().unwrap();
        assert!(is_rotation_of(&cycle, &[0, 1, 2]), "got {cycle:?}");
        assert_eq!(cycle, vec![0, 1, 2]);
    }

    #[test]
    fn test_chain_has_no_cycle() {
        let graph = WaitForGraph::from_adjacency([(0, vec![1]), (1, vec![2]), (2, vec![])]);
        assert_eq!(graph.find_cycle(), None);
    }

    #[test]
    fn test_two_cycle() {
        let graph = WaitForGraph::from_adjacency([(0, vec![1]), (1, vec![0])]);
        assert_eq!(graph.find_cycle(), Some(vec![0, 1]));
    }

    #[test]
    fn test_cycle_not_through_root_excludes_tail() {
        // 0 -> 1 -> 2 -> 3 -> 1: the cycle is [1, 2, 3], 0 is only a tail.
        let graph =
            WaitForGraph::from_adjacency([(0, vec![1]), (1, vec![2]), (2, vec![3]), (3, vec![1])]);
        assert_eq!(graph.find_cycle(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_diamond_is_acyclic() {
        // Reaching a Done node through a second path is not a cycle.
        let graph = WaitForGraph::from_adjacency([
            (0, vec![1, 2]),
            (1, vec![3]),
            (2, vec![3]),
            (3, vec![]),
        ]);
        assert_eq!(graph.find_cycle(), None);
    }

    #[test]
    fn test_self_loop() {
        let graph = WaitForGraph::from_adjacency([(4, vec![4])]);
        assert_eq!(graph.find_cycle(), Some(vec![4]));
    }

    #[test]
    fn test_successor_without_entry_is_a_sink() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(0, 7);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.find_cycle(), None);
    }

    #[test]
    fn test_deterministic_first_cycle() {
        // Two disjoint cycles; the one reachable from the lowest id wins.
        let graph = WaitForGraph::from_adjacency([
            (0, vec![]),
            (1, vec![2]),
            (2, vec![1]),
            (3, vec![4]),
            (4, vec![3]),
        ]);
        for _ in 0..10 {
            assert_eq!(graph.find_cycle(), Some(vec![1, 2]));
        }
    }

    #[test]
    fn test_add_edge_deduplicates() {
        let mut graph = WaitForGraph::with_nodes(3);
        assert!(graph.add_edge(0, 1));
        assert!(!graph.add_edge(0, 1));
        assert!(graph.has_edge(0, 1));
        assert!(!graph.has_edge(1, 0));
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn test_long_chain_does_not_overflow_stack() {
        let n = 100_000;
        let mut graph = WaitForGraph::with_nodes(n);
        for i in 0..n - 1 {
            graph.add_edge(i, i + 1);
        }
        assert_eq!(graph.find_cycle(), None);
        graph.add_edge(n - 1, 0);
        assert_eq!(graph.find_cycle().map(|c| c.len()), Some(n));
    }
}
