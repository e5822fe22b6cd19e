//! Dependency graph snapshots and graph queries

use crate::{ModuleError, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Owned snapshot of module -> recorded dependencies.
///
/// Taken from the registry on demand; changing it never touches the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Module names in load order
    modules: Vec<String>,

    /// Dependencies: module -> list of dependency names
    dependencies: FxHashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from (module, dependencies) pairs
    pub fn from_edges<I, N, D>(edges: I) -> Self
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let mut graph = Self::new();
        for (name, deps) in edges {
            graph.add_module(name.into(), deps.into_iter().map(Into::into).collect());
        }
        graph
    }

    /// Add a module, or replace its dependency list if present
    pub fn add_module(&mut self, name: String, dependencies: Vec<String>) {
        if !self.dependencies.contains_key(&name) {
            self.modules.push(name.clone());
        }
        self.dependencies.insert(name, dependencies);
    }

    /// Remove a module and its own edges
    pub fn remove_module(&mut self, name: &str) -> Option<Vec<String>> {
        let removed = self.dependencies.remove(name)?;
        self.modules.retain(|n| n != name);
        Some(removed)
    }

    /// Module names in load order
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// Get all dependencies of the given module
    pub fn dependencies_of(&self, name: &str) -> Option<&[String]> {
        self.dependencies.get(name).map(Vec::as_slice)
    }

    /// Get all modules that depend on the given module
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.modules
            .iter()
            .filter(|m| {
                self.dependencies
                    .get(m.as_str())
                    .is_some_and(|deps| deps.iter().any(|d| d == name))
            })
            .cloned()
            .collect()
    }

    /// Check if a module is in the graph
    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    /// Number of modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the graph has no modules
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Iterate (module, dependencies) in load order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.modules.iter().filter_map(move |name| {
            self.dependencies
                .get(name)
                .map(|deps| (name.as_str(), deps.as_slice()))
        })
    }

    /// Find every cycle reachable from any module.
    ///
    /// Each cycle starts at the node that was found on the recursion stack
    /// and ends with that node again, e.g. `[a, b, c, a]`.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited = FxHashSet::default();
        let mut rec_stack = FxHashSet::default();
        let mut path = Vec::new();

        for name in &self.modules {
            if !visited.contains(name.as_str()) {
                self.collect_cycles(name, &mut visited, &mut rec_stack, &mut path, &mut cycles);
            }
        }

        cycles
    }

    fn collect_cycles<'a>(
        &'a self,
        name: &'a str,
        visited: &mut FxHashSet<&'a str>,
        rec_stack: &mut FxHashSet<&'a str>,
        path: &mut Vec<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        if rec_stack.contains(name) {
            let start = path.iter().position(|n| *n == name).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(name.to_string());
            cycles.push(cycle);
            return;
        }
        if visited.contains(name) {
            return;
        }

        rec_stack.insert(name);
        path.push(name);

        if let Some(deps) = self.dependencies.get(name) {
            for dep in deps {
                self.collect_cycles(dep, visited, rec_stack, path, cycles);
            }
        }

        path.pop();
        rec_stack.remove(name);
        visited.insert(name);
    }

    /// Perform a topological sort: every module comes after its dependencies
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut sorted = Vec::new();
        let mut visited = FxHashSet::default();
        let mut rec_stack = Vec::new();

        for name in &self.modules {
            if !visited.contains(name.as_str()) {
                self.topological_visit(name, &mut visited, &mut rec_stack, &mut sorted)?;
            }
        }

        // DFS post-order already puts dependencies first
        Ok(sorted)
    }

    fn topological_visit<'a>(
        &'a self,
        name: &'a str,
        visited: &mut FxHashSet<&'a str>,
        rec_stack: &mut Vec<&'a str>,
        sorted: &mut Vec<String>,
    ) -> Result<()> {
        if let Some(start) = rec_stack.iter().position(|n| *n == name) {
            let mut cycle: Vec<String> = rec_stack[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(name.to_string());
            return Err(ModuleError::CircularDependency { cycle });
        }
        if !visited.insert(name) {
            return Ok(());
        }

        rec_stack.push(name);
        if let Some(deps) = self.dependencies.get(name) {
            for dep in deps {
                self.topological_visit(dep, visited, rec_stack, sorted)?;
            }
        }
        rec_stack.pop();

        // Dependencies missing from the snapshot are not modules of this graph
        if self.dependencies.contains_key(name) {
            sorted.push(name.to_string());
        }
        Ok(())
    }
}

impl Serialize for DependencyGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.modules.len()))?;
        for (name, deps) in self.iter() {
            map.serialize_entry(name, deps)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topological_order() {
        let graph = DependencyGraph::from_edges([
            ("a", vec!["b"]),
            ("b", vec!["c"]),
            ("c", vec![]),
        ]);

        // c has no dependencies, b depends on c, a depends on b
        assert_eq!(graph.topological_order().unwrap(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_topological_order_rejects_cycle() {
        let graph = DependencyGraph::from_edges([("a", vec!["b"]), ("b", vec!["a"])]);

        let err = graph.topological_order().unwrap_err();
        assert!(matches!(
            err,
            ModuleError::CircularDependency { ref cycle } if cycle == &["a", "b", "a"]
        ));
    }

    #[test]
    fn test_find_three_node_cycle() {
        let graph = DependencyGraph::from_edges([
            ("a", vec!["b"]),
            ("b", vec!["c"]),
            ("c", vec!["a"]),
        ]);

        assert_eq!(graph.find_cycles(), vec![vec!["a", "b", "c", "a"]]);
    }

    #[test]
    fn test_cycle_excludes_path_prefix() {
        let graph = DependencyGraph::from_edges([
            ("root", vec!["a"]),
            ("a", vec!["b"]),
            ("b", vec!["a"]),
        ]);

        assert_eq!(graph.find_cycles(), vec![vec!["a", "b", "a"]]);
    }

    #[test]
    fn test_find_all_cycles() {
        let graph = DependencyGraph::from_edges([
            ("a", vec!["b"]),
            ("b", vec!["a"]),
            ("c", vec!["c"]),
            ("d", vec!["e", "d"]),
            ("e", vec![]),
        ]);

        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 3);
        assert!(cycles.contains(&vec!["a".to_string(), "b".to_string(), "a".to_string()]));
        assert!(cycles.contains(&vec!["c".to_string(), "c".to_string()]));
        assert!(cycles.contains(&vec!["d".to_string(), "d".to_string()]));
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let graph = DependencyGraph::from_edges([
            ("ui", vec!["core", "auth"]),
            ("auth", vec!["core"]),
            ("core", vec![]),
        ]);

        assert!(graph.find_cycles().is_empty());
        assert!(DependencyGraph::new().find_cycles().is_empty());
    }

    #[test]
    fn test_dependents_and_removal() {
        let mut graph = DependencyGraph::from_edges([
            ("core", vec![]),
            ("ui", vec!["core"]),
            ("reports", vec!["core", "ui"]),
        ]);

        assert_eq!(graph.dependents_of("core"), vec!["ui", "reports"]);
        assert_eq!(graph.dependents_of("reports"), Vec::<String>::new());

        assert_eq!(graph.remove_module("ui"), Some(vec!["core".to_string()]));
        assert!(!graph.contains("ui"));
        assert_eq!(graph.modules(), ["core", "reports"]);
    }

    #[test]
    fn test_serialize_in_load_order() {
        let graph = DependencyGraph::from_edges([("core", vec![]), ("ui", vec!["core"])]);
        let json = serde_json::to_string(&graph).unwrap();
        assert_eq!(json, r#"{"core":[],"ui":["core"]}"#);
    }
}
