//! Module loader error types

use thiserror::Error;

/// Type alias for module loader results
pub type Result<T> = std::result::Result<T, ModuleError>;

/// Errors that can occur while loading modules
#[derive(Error, Debug)]
pub enum ModuleError {
    /// Module name is empty or otherwise unusable as a registry key
    #[error("Invalid module name: {name:?}")]
    InvalidModuleName {
        /// The rejected name
        name: String,
    },

    /// No catalog entry (locator or factory) is known for the module
    #[error("Unknown module: {name}")]
    UnknownModule {
        /// Name of the module nobody registered
        name: String,
    },

    /// A module was requested while it was still being resolved by the same chain
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency {
        /// Names forming the cycle, first name repeated at the end
        cycle: Vec<String>,
    },

    /// The module's code could not be fetched from its locator
    #[error("Failed to fetch module {name} from {locator}: {source}")]
    FetchFailed {
        /// Module being fetched
        name: String,
        /// Locator that was used
        locator: String,
        /// The underlying fetch error
        #[source]
        source: anyhow::Error,
    },

    /// Fetching the module's code took longer than the configured timeout
    #[error("Timed out fetching module {name} from {locator} after {timeout_ms}ms")]
    FetchTimedOut {
        /// Module being fetched
        name: String,
        /// Locator that was used
        locator: String,
        /// Timeout that expired
        timeout_ms: u64,
    },

    /// The module's factory returned an error
    #[error("Failed to instantiate module {name}: {source}")]
    InstantiationFailed {
        /// Module being instantiated
        name: String,
        /// The underlying factory error
        #[source]
        source: anyhow::Error,
    },

    /// A dependency failed to load, aborting the dependent's load
    #[error("Module {name} could not load dependency {dependency}")]
    DependencyFailed {
        /// The dependent module
        name: String,
        /// The dependency that failed
        dependency: String,
        /// Why the dependency failed
        #[source]
        source: Box<ModuleError>,
    },

    /// Another caller's in-flight load of the same module failed or was cancelled
    #[error("Concurrent load of module {name} failed: {message}")]
    ConcurrentLoadFailed {
        /// Module that was being loaded
        name: String,
        /// Failure reported by the in-flight load
        message: String,
    },

    /// Dependency chain exceeded the configured maximum depth
    #[error("Dependency chain for module {name} exceeds maximum depth {max_depth}")]
    DependencyTooDeep {
        /// Module at which the limit was hit
        name: String,
        /// Configured limit
        max_depth: usize,
    },
}

impl ModuleError {
    /// Name of the module whose load produced this error
    pub fn module_name(&self) -> &str {
        match self {
            ModuleError::InvalidModuleName { name }
            | ModuleError::UnknownModule { name }
            | ModuleError::FetchFailed { name, .. }
            | ModuleError::FetchTimedOut { name, .. }
            | ModuleError::InstantiationFailed { name, .. }
            | ModuleError::DependencyFailed { name, .. }
            | ModuleError::ConcurrentLoadFailed { name, .. }
            | ModuleError::DependencyTooDeep { name, .. } => name,
            ModuleError::CircularDependency { cycle } => {
                cycle.first().map(String::as_str).unwrap_or_default()
            }
        }
    }

    /// Innermost error, following `DependencyFailed` links
    pub fn root_cause(&self) -> &ModuleError {
        match self {
            ModuleError::DependencyFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Wrap a dependency's failure as a failure of the dependent
    pub(crate) fn dependency(name: &str, dependency: &str, source: ModuleError) -> Self {
        ModuleError::DependencyFailed {
            name: name.to_string(),
            dependency: dependency.to_string(),
            source: Box::new(source),
        }
    }
}
