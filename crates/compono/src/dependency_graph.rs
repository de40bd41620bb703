//! File-level dependency graph
//!
//! Nodes are keyed by normalised file path. Every node keeps its own dependency
//! set, and the graph keeps a parallel adjacency map; both are updated together so
//! that `node.dependencies` and `edges[file]` are always equal.

use anyhow::{Result, bail};
use log::{debug, trace};
use petgraph::{algo::tarjan_scc, graphmap::DiGraphMap};
use rustc_hash::FxHashMap;

use crate::{
    ast::Import,
    types::{FxIndexMap, FxIndexSet},
};

/// Per-file data stored in the graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphNode {
    pub imports: Vec<Import>,
    /// Names exported by the file
    pub exports: Vec<String>,
    pub dependencies: FxIndexSet<String>,
}

/// Color for DFS traversal (three-color marking)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White, // Not visited
    Gray,  // Currently visiting
    Black, // Finished visiting
}

/// State for cycle search operations
struct CycleSearchState<'a> {
    visited: FxIndexSet<&'a str>,
    on_stack: FxIndexSet<&'a str>,
    cycles: Vec<Vec<String>>,
}

/// Directed graph of file → imported file edges
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: FxIndexMap<String, GraphNode>,
    edges: FxIndexMap<String, FxIndexSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file; existing nodes are left untouched
    pub fn add_node(&mut self, file: &str) {
        if !self.nodes.contains_key(file) {
            trace!("Adding graph node '{file}'");
            self.nodes.insert(file.to_owned(), GraphNode::default());
            self.edges.insert(file.to_owned(), FxIndexSet::default());
        }
    }

    /// Record that `from` imports `to`
    ///
    /// `from` is created if missing. `to` only becomes a node once it is added in
    /// its own right.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(from);
        if let Some(node) = self.nodes.get_mut(from) {
            node.dependencies.insert(to.to_owned());
        }
        self.edges
            .entry(from.to_owned())
            .or_default()
            .insert(to.to_owned());
    }

    pub fn node(&self, file: &str) -> Option<&GraphNode> {
        self.nodes.get(file)
    }

    pub fn node_mut(&mut self, file: &str) -> Option<&mut GraphNode> {
        self.nodes.get_mut(file)
    }

    pub fn contains(&self, file: &str) -> bool {
        self.nodes.contains_key(file)
    }

    /// Node keys in insertion order
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependencies of a file
    pub fn edges_from(&self, file: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(file)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// Every file reachable from `file` through import edges
    ///
    /// Terminates on cycles; `file` itself is included only when it sits on a cycle.
    pub fn get_all_dependencies(&self, file: &str) -> FxIndexSet<String> {
        let mut visited = FxIndexSet::default();
        self.collect_dependencies(file, &mut visited);
        visited
    }

    fn collect_dependencies(&self, file: &str, visited: &mut FxIndexSet<String>) {
        for dep in self.edges_from(file) {
            if visited.insert(dep.to_owned()) {
                self.collect_dependencies(dep, visited);
            }
        }
    }

    /// Order files so that every file comes after all of its dependencies
    ///
    /// Fails naming the first node found on a cycle.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut colors: FxHashMap<&str, Color> = FxHashMap::default();
        let mut sorted = Vec::with_capacity(self.nodes.len());

        for file in self.nodes.keys() {
            if colors.get(file.as_str()).copied().unwrap_or(Color::White) == Color::White {
                self.visit_for_sort(file, &mut colors, &mut sorted)?;
            }
        }

        debug!("Topologically sorted {} files", sorted.len());
        Ok(sorted)
    }

    fn visit_for_sort<'a>(
        &'a self,
        file: &'a str,
        colors: &mut FxHashMap<&'a str, Color>,
        sorted: &mut Vec<String>,
    ) -> Result<()> {
        match colors.get(file).copied().unwrap_or(Color::White) {
            Color::Black => return Ok(()),
            Color::Gray => bail!("Circular dependency detected at '{file}'"),
            Color::White => {}
        }

        colors.insert(file, Color::Gray);
        for dep in self.edges_from(file) {
            self.visit_for_sort(dep, colors, sorted)?;
        }
        colors.insert(file, Color::Black);
        sorted.push(file.to_owned());
        Ok(())
    }

    /// Files that no other file imports
    pub fn get_entry_points(&self) -> Vec<String> {
        let targets: FxIndexSet<&str> = self
            .edges
            .values()
            .flat_map(|deps| deps.iter().map(String::as_str))
            .collect();
        self.nodes
            .keys()
            .filter(|file| !targets.contains(file.as_str()))
            .cloned()
            .collect()
    }

    /// Cycle paths found by depth-first search from every node
    ///
    /// Each cycle is the suffix of the current path starting at the revisited node.
    /// Overlapping or rotated duplicates from different start nodes are kept.
    pub fn find_circular_dependencies(&self) -> Vec<Vec<String>> {
        let mut state = CycleSearchState {
            visited: FxIndexSet::default(),
            on_stack: FxIndexSet::default(),
            cycles: Vec::new(),
        };

        for file in self.nodes.keys() {
            let mut path = Vec::new();
            self.dfs_find_cycles(file, &mut path, &mut state);
        }

        state.cycles
    }

    fn dfs_find_cycles<'a>(
        &'a self,
        file: &'a str,
        path: &mut Vec<&'a str>,
        state: &mut CycleSearchState<'a>,
    ) {
        if state.on_stack.contains(file) {
            if let Some(start) = path.iter().position(|&f| f == file) {
                let cycle = path[start..].iter().map(|&f| f.to_owned()).collect();
                state.cycles.push(cycle);
            }
            return;
        }
        if !state.visited.insert(file) {
            return;
        }

        state.on_stack.insert(file);
        path.push(file);
        for dep in self.edges_from(file) {
            self.dfs_find_cycles(dep, path, state);
        }
        path.pop();
        state.on_stack.shift_remove(file);
    }

    /// Groups of files that mutually depend on each other
    pub fn strongly_connected_components(&self) -> Vec<Vec<String>> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for (from, deps) in &self.edges {
            graph.add_node(from.as_str());
            for to in deps {
                graph.add_edge(from.as_str(), to.as_str(), ());
            }
        }

        tarjan_scc(&graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&file| graph.contains_edge(file, file))
            })
            .map(|component| component.into_iter().map(str::to_owned).collect())
            .collect()
    }

    /// Whether every node's dependency set matches the adjacency map
    pub fn is_consistent(&self) -> bool {
        self.nodes.iter().all(|(file, node)| {
            self.edges
                .get(file)
                .is_some_and(|deps| *deps == node.dependencies)
        })
    }
}
