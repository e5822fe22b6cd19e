//! Registry of loaded modules

use crate::graph::DependencyGraph;
use crate::module::ModuleInstance;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// A loaded module
#[derive(Clone)]
pub struct ModuleRecord {
    /// Module name
    pub name: String,

    /// The constructed module
    pub instance: ModuleInstance,

    /// Dependencies recorded for this module, in declaration order
    pub dependencies: Vec<String>,
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Result of removing a module from the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// The module was removed
    Removed,
    /// No module with that name was registered
    Missing,
    /// Registered modules still depend on it
    Referenced(Vec<String>),
}

/// Thread-safe name -> record map that remembers load order.
///
/// Only the loader mutates it, while holding its in-flight table.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    records: FxHashMap<String, ModuleRecord>,
    load_order: Vec<String>,
}

impl RegistryInner {
    fn dependents_of(&self, name: &str) -> Vec<String> {
        self.load_order
            .iter()
            .filter(|other| {
                self.records
                    .get(other.as_str())
                    .is_some_and(|r| r.dependencies.iter().any(|d| d == name))
            })
            .cloned()
            .collect()
    }
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a module's instance
    pub fn instance(&self, name: &str) -> Option<ModuleInstance> {
        let inner = self.inner.read();
        match inner.records.get(name) {
            Some(record) => {
                trace!("Registry hit for module: {}", name);
                Some(record.instance.clone())
            }
            None => {
                trace!("Registry miss for module: {}", name);
                None
            }
        }
    }

    /// Insert a record. An existing record with the same name is kept and returned instead.
    pub(crate) fn insert(&self, record: ModuleRecord) -> ModuleInstance {
        let mut inner = self.inner.write();

        if let Some(existing) = inner.records.get(&record.name) {
            return existing.instance.clone();
        }

        let instance = record.instance.clone();
        debug!("Registered module: {}", record.name);
        inner.load_order.push(record.name.clone());
        inner.records.insert(record.name.clone(), record);
        instance
    }

    /// Replace a module's recorded dependency list. Returns false when it is not registered.
    pub(crate) fn set_dependencies(&self, name: &str, dependencies: Vec<String>) -> bool {
        match self.inner.write().records.get_mut(name) {
            Some(record) => {
                record.dependencies = dependencies;
                true
            }
            None => false,
        }
    }

    /// Remove a module unless another registered module still depends on it
    pub(crate) fn remove_unreferenced(&self, name: &str) -> Removal {
        let mut inner = self.inner.write();

        if !inner.records.contains_key(name) {
            return Removal::Missing;
        }

        let dependents = inner.dependents_of(name);
        if !dependents.is_empty() {
            return Removal::Referenced(dependents);
        }

        inner.records.remove(name);
        inner.load_order.retain(|n| n != name);
        debug!("Removed module from registry: {}", name);
        Removal::Removed
    }

    /// Check if a module is registered
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().records.contains_key(name)
    }

    /// Registered modules that list `name` as a dependency, in load order
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.inner.read().dependents_of(name)
    }

    /// Snapshot of (name, instance) pairs in load order
    pub fn modules(&self) -> Vec<(String, ModuleInstance)> {
        let inner = self.inner.read();
        inner
            .load_order
            .iter()
            .filter_map(|name| {
                inner
                    .records
                    .get(name)
                    .map(|r| (name.clone(), r.instance.clone()))
            })
            .collect()
    }

    /// Snapshot of the recorded dependency graph
    pub fn graph(&self) -> DependencyGraph {
        let inner = self.inner.read();
        let mut graph = DependencyGraph::new();
        for name in &inner.load_order {
            if let Some(record) = inner.records.get(name) {
                graph.add_module(name.clone(), record.dependencies.clone());
            }
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;

    struct Stub;
    impl Module for Stub {}

    fn record(name: &str, deps: &[&str]) -> ModuleRecord {
        ModuleRecord {
            name: name.to_string(),
            instance: Arc::new(Stub),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_registry_basic_operations() {
        let registry = ModuleRegistry::new();
        registry.insert(record("Core", &[]));

        assert!(registry.contains("Core"));
        assert!(registry.instance("Core").is_some());
        assert!(registry.instance("UI").is_none());
        assert_eq!(registry.modules().len(), 1);
    }

    #[test]
    fn test_insert_keeps_first_record() {
        let registry = ModuleRegistry::new();
        let first = registry.insert(record("Core", &[]));
        let second = registry.insert(record("Core", &["Other"]));

        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.graph().dependencies_of("Core").unwrap().is_empty());
        assert_eq!(registry.modules().len(), 1);
    }

    #[test]
    fn test_load_order_preserved() {
        let registry = ModuleRegistry::new();
        for name in ["Orders", "Customers", "Inventory"] {
            registry.insert(record(name, &[]));
        }

        let names: Vec<_> = registry.modules().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Orders", "Customers", "Inventory"]);
    }

    #[test]
    fn test_remove_unreferenced() {
        let registry = ModuleRegistry::new();
        registry.insert(record("Core", &[]));
        registry.insert(record("UI", &["Core"]));
        registry.insert(record("Reports", &["Core"]));

        assert_eq!(
            registry.remove_unreferenced("Core"),
            Removal::Referenced(vec!["UI".to_string(), "Reports".to_string()])
        );
        assert_eq!(registry.remove_unreferenced("Missing"), Removal::Missing);
        assert_eq!(registry.remove_unreferenced("UI"), Removal::Removed);
        assert_eq!(registry.remove_unreferenced("Reports"), Removal::Removed);
        assert_eq!(registry.remove_unreferenced("Core"), Removal::Removed);
        assert!(registry.modules().is_empty());
        assert!(registry.graph().is_empty());
    }

    #[test]
    fn test_set_dependencies() {
        let registry = ModuleRegistry::new();
        registry.insert(record("Core", &[]));
        registry.insert(record("UI", &["Core"]));

        assert!(registry.set_dependencies("Core", vec!["UI".to_string()]));
        assert!(!registry.set_dependencies("Missing", vec![]));
        assert_eq!(registry.dependents("UI"), vec!["Core"]);
    }
}
