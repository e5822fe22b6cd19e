//! Catalog of modules the application knows how to build

use crate::module::{ModuleContext, ModuleFactory, ModuleInstance};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What the catalog knows about one module
#[derive(Clone)]
pub struct CatalogEntry {
    /// Module name
    pub name: String,

    /// Where its code lives
    pub locator: String,

    /// Dependencies used when the module is pulled in as someone else's dependency
    pub dependencies: Vec<String>,

    /// Builds the module
    pub factory: ModuleFactory,
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("name", &self.name)
            .field("locator", &self.locator)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Name -> (locator, default dependencies, factory) table.
///
/// Feature modules register themselves here at startup. The catalog can keep
/// growing while a loader is using it.
#[derive(Default)]
pub struct ModuleCatalog {
    entries: RwLock<FxHashMap<String, CatalogEntry>>,
}

impl ModuleCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, replacing any previous entry with the same name
    pub fn register<F>(&self, name: &str, locator: &str, dependencies: &[&str], factory: F)
    where
        F: Fn(ModuleContext) -> anyhow::Result<ModuleInstance> + Send + Sync + 'static,
    {
        self.register_entry(CatalogEntry {
            name: name.to_string(),
            locator: locator.to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            factory: Arc::new(factory),
        });
    }

    /// Register a prepared entry
    pub fn register_entry(&self, entry: CatalogEntry) {
        debug!(
            "Registered module {} at {} (deps: {:?})",
            entry.name, entry.locator, entry.dependencies
        );
        self.entries.write().insert(entry.name.clone(), entry);
    }

    /// Look up everything known about a module
    pub fn entry(&self, name: &str) -> Option<CatalogEntry> {
        self.entries.read().get(name).cloned()
    }

    /// Look up a module's factory
    pub fn factory(&self, name: &str) -> Option<ModuleFactory> {
        self.entries.read().get(name).map(|e| e.factory.clone())
    }

    /// Check if a module is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Registered module names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("modules", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;

    struct Permissions;
    impl Module for Permissions {}

    #[test]
    fn test_register_and_lookup() {
        let catalog = ModuleCatalog::new();
        catalog.register("Permissions", "permissions.mod", &["Users"], |_| {
            Ok(Arc::new(Permissions))
        });

        assert!(catalog.contains("Permissions"));

        let entry = catalog.entry("Permissions").unwrap();
        assert_eq!(entry.locator, "permissions.mod");
        assert_eq!(entry.dependencies, vec!["Users".to_string()]);
        assert!(catalog.factory("Permissions").is_some());
        assert!(catalog.entry("Users").is_none());
    }

    #[test]
    fn test_reregister_replaces() {
        let catalog = ModuleCatalog::new();
        catalog.register("Logistics", "v1.mod", &[], |_| Ok(Arc::new(Permissions)));
        catalog.register("Logistics", "v2.mod", &[], |_| Ok(Arc::new(Permissions)));

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.entry("Logistics").unwrap().locator, "v2.mod");
        assert!(!catalog.is_empty());
    }

    #[test]
    fn test_names_sorted() {
        let catalog = ModuleCatalog::new();
        for name in ["Orders", "Customers", "Inventory"] {
            catalog.register(name, "x.mod", &[], |_| Ok(Arc::new(Permissions)));
        }
        assert_eq!(catalog.names(), vec!["Customers", "Inventory", "Orders"]);
    }
}
