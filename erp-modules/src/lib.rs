//! ERP feature-module loader
//!
//! This crate loads the feature modules an ERP application is assembled from:
//! - Dependency-ordered loading with one instance per module name
//! - Explicit factory registration through a module catalog
//! - Circular dependency detection, both while loading and on demand
//! - Safe, non-cascading unload and dependency graph introspection

pub mod catalog;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod loader;
pub mod module;
mod registry;

pub use catalog::{CatalogEntry, ModuleCatalog};
pub use error::{ModuleError, Result};
pub use fetch::{FetchedSource, FsFetcher, ModuleFetcher, StaticFetcher};
pub use graph::DependencyGraph;
pub use loader::{LoadResult, ModuleLoader, UnloadOutcome};
pub use module::{downcast, Module, ModuleContext, ModuleFactory, ModuleInstance};

use serde::{Deserialize, Serialize};

/// Describes one module to load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// The module's unique name
    pub name: String,

    /// Where to fetch the module's code
    pub locator: String,

    /// Names of the modules it needs, in load order
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ModuleDescriptor {
    /// Create a descriptor
    pub fn new(name: &str, locator: &str, dependencies: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            locator: locator.to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// Module loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Upper bound on a single fetch, in milliseconds
    pub fetch_timeout_ms: Option<u64>,

    /// Maximum length of a dependency chain
    pub max_depth: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: None,
            max_depth: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults_dependencies() {
        let descriptor: ModuleDescriptor =
            serde_json::from_str(r#"{"name":"Core","locator":"core.mod"}"#).unwrap();
        assert_eq!(descriptor, ModuleDescriptor::new("Core", "core.mod", &[]));
    }

    #[test]
    fn test_config_partial_override() {
        let config: LoaderConfig = serde_json::from_str(r#"{"fetch_timeout_ms":250}"#).unwrap();
        assert_eq!(config.fetch_timeout_ms, Some(250));
        assert_eq!(config.max_depth, 64);
    }
}
