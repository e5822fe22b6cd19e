//! Module loading functionality

use crate::catalog::ModuleCatalog;
use crate::fetch::{FetchedSource, ModuleFetcher};
use crate::graph::DependencyGraph;
use crate::module::{ModuleContext, ModuleInstance};
use crate::registry::{ModuleRecord, ModuleRegistry, Removal};
use crate::{LoaderConfig, ModuleDescriptor, ModuleError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Outcome published by an in-flight load to anyone waiting on it
type SharedOutcome = Option<std::result::Result<ModuleInstance, String>>;

/// A load that has started but not yet been recorded
struct InFlight {
    dependencies: Vec<String>,
    /// Dependency this load is currently waiting for, if any
    blocked_on: Option<String>,
    outcome: watch::Receiver<SharedOutcome>,
}

/// What `begin_load` found for a name
enum Slot<'a> {
    Loaded(ModuleInstance),
    Waiting(watch::Receiver<SharedOutcome>),
    Leader(InFlightGuard<'a>),
    /// Waiting would close a cycle with loads that are waiting on us
    Cycle(Vec<String>),
}

/// Result of loading one descriptor of a batch
#[derive(Debug)]
pub struct LoadResult {
    /// Name from the descriptor
    pub name: String,

    /// The instance, or why the load failed
    pub outcome: Result<ModuleInstance>,
}

impl LoadResult {
    /// Whether the module loaded
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The loaded instance, if any
    pub fn instance(&self) -> Option<&ModuleInstance> {
        self.outcome.as_ref().ok()
    }

    /// Failure message, if the load failed
    pub fn error_message(&self) -> Option<String> {
        self.outcome.as_ref().err().map(|e| e.to_string())
    }
}

/// Result of an unload request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnloadOutcome {
    /// The module was removed
    Unloaded,
    /// The module was not loaded; nothing happened
    NotLoaded,
    /// Other modules still depend on it; nothing was removed
    Blocked {
        /// Modules that must be unloaded first
        dependents: Vec<String>,
    },
}

impl UnloadOutcome {
    /// Whether the module was removed
    pub fn is_unloaded(&self) -> bool {
        matches!(self, UnloadOutcome::Unloaded)
    }
}

/// Loads modules in dependency order and owns their instances
pub struct ModuleLoader {
    config: LoaderConfig,
    catalog: Arc<ModuleCatalog>,
    fetcher: Arc<dyn ModuleFetcher>,
    registry: ModuleRegistry,
    in_flight: Mutex<FxHashMap<String, InFlight>>,
}

impl fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ModuleLoader {
    /// Create a new module loader
    pub fn new(
        catalog: Arc<ModuleCatalog>,
        fetcher: Arc<dyn ModuleFetcher>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            config,
            catalog,
            fetcher,
            registry: ModuleRegistry::new(),
            in_flight: Mutex::new(FxHashMap::default()),
        }
    }

    /// Load a module, loading its dependencies first.
    ///
    /// Returns the existing instance without doing anything else when the
    /// module is already loaded.
    pub async fn load_module(
        &self,
        name: &str,
        locator: &str,
        dependencies: &[String],
    ) -> Result<ModuleInstance> {
        self.load_chained(
            name.to_string(),
            locator.to_string(),
            dependencies.to_vec(),
            Vec::new(),
        )
        .await
    }

    /// Load a module described by a descriptor
    pub async fn load_descriptor(&self, descriptor: &ModuleDescriptor) -> Result<ModuleInstance> {
        self.load_module(&descriptor.name, &descriptor.locator, &descriptor.dependencies)
            .await
    }

    /// Load every descriptor in order. A failure only affects its own entry.
    pub async fn load_modules(&self, batch: &[ModuleDescriptor]) -> Vec<LoadResult> {
        let mut results = Vec::with_capacity(batch.len());

        for descriptor in batch {
            let outcome = self.load_descriptor(descriptor).await;
            if let Err(e) = &outcome {
                warn!("Failed to load module {}: {}", descriptor.name, e);
            }
            results.push(LoadResult {
                name: descriptor.name.clone(),
                outcome,
            });
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            "Loaded batch of {} modules ({} failed)",
            results.len(),
            failed
        );
        results
    }

    /// Check if a module is loaded
    pub fn is_loaded(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Get a loaded module's instance
    pub fn get_module(&self, name: &str) -> Option<ModuleInstance> {
        self.registry.instance(name)
    }

    /// Snapshot of all loaded modules, in load order
    pub fn get_all_modules(&self) -> Vec<(String, ModuleInstance)> {
        self.registry.modules()
    }

    /// Unload a single module. Refused while anything still depends on it.
    pub fn unload_module(&self, name: &str) -> UnloadOutcome {
        // In-flight table first, then registry
        let in_flight = self.in_flight.lock();

        let mut pending: Vec<String> = in_flight
            .iter()
            .filter(|(_, load)| load.dependencies.iter().any(|d| d == name))
            .map(|(loading, _)| loading.clone())
            .collect();

        let outcome = if pending.is_empty() {
            match self.registry.remove_unreferenced(name) {
                Removal::Removed => UnloadOutcome::Unloaded,
                Removal::Missing => UnloadOutcome::NotLoaded,
                Removal::Referenced(dependents) => UnloadOutcome::Blocked { dependents },
            }
        } else if self.registry.contains(name) {
            let mut dependents = self.registry.dependents(name);
            pending.sort();
            dependents.extend(pending);
            UnloadOutcome::Blocked { dependents }
        } else {
            UnloadOutcome::NotLoaded
        };
        drop(in_flight);

        match &outcome {
            UnloadOutcome::Unloaded => info!("Unloaded module: {}", name),
            UnloadOutcome::NotLoaded => debug!("Module {} is not loaded, nothing to unload", name),
            UnloadOutcome::Blocked { dependents } => warn!(
                "Cannot unload {}: still required by {}",
                name,
                dependents.join(", ")
            ),
        }
        outcome
    }

    /// Loaded modules that declared `name` as a dependency
    pub fn get_dependent_modules(&self, name: &str) -> Vec<String> {
        self.registry.dependents(name)
    }

    /// Snapshot of the recorded dependency graph
    pub fn get_dependency_graph(&self) -> DependencyGraph {
        self.registry.graph()
    }

    /// Find cycles in the recorded dependency graph
    pub fn detect_circular_dependencies(&self) -> Vec<Vec<String>> {
        let cycles = self.registry.graph().find_cycles();
        for cycle in &cycles {
            warn!("Circular dependency: {}", cycle.join(" -> "));
        }
        cycles
    }

    /// Replace a loaded module's recorded dependencies. The instance is untouched.
    pub fn redeclare_dependencies(&self, name: &str, dependencies: &[String]) -> bool {
        let updated = self.registry.set_dependencies(name, dependencies.to_vec());
        if updated {
            debug!("Redeclared dependencies of {}: {:?}", name, dependencies);
        }
        updated
    }

    /// Load with the chain of modules currently being resolved above this one
    fn load_chained(
        &self,
        name: String,
        locator: String,
        dependencies: Vec<String>,
        chain: Vec<String>,
    ) -> BoxFuture<'_, Result<ModuleInstance>> {
        async move {
            if name.is_empty() {
                return Err(ModuleError::InvalidModuleName { name });
            }

            // Requested again by the chain that is resolving it
            if let Some(start) = chain.iter().position(|n| *n == name) {
                let mut cycle = chain[start..].to_vec();
                cycle.push(name);
                return Err(ModuleError::CircularDependency { cycle });
            }

            let guard = match self.begin_load(&name, &dependencies, &chain) {
                Slot::Loaded(instance) => {
                    trace!("Module {} already loaded", name);
                    return Ok(instance);
                }
                Slot::Waiting(outcome) => return Self::await_in_flight(name, outcome).await,
                Slot::Cycle(cycle) => {
                    warn!("Concurrent loads wait on each other: {}", cycle.join(" -> "));
                    return Err(ModuleError::CircularDependency { cycle });
                }
                Slot::Leader(guard) => guard,
            };

            let result = self.build(&name, &locator, &dependencies, chain).await;
            guard.finish(&result);
            result
        }
        .boxed()
    }

    /// Claim the right to load `name`, unless it is loaded or loading already
    fn begin_load(&self, name: &str, dependencies: &[String], chain: &[String]) -> Slot<'_> {
        let mut in_flight = self.in_flight.lock();

        if let Some(load) = in_flight.get(name) {
            if let Some(cycle) = waits_for_cycle(&in_flight, name, chain) {
                return Slot::Cycle(cycle);
            }
            debug!("Module {} is already loading, waiting for it", name);
            return Slot::Waiting(load.outcome.clone());
        }

        // Records are inserted before their in-flight slot is released
        if let Some(instance) = self.registry.instance(name) {
            return Slot::Loaded(instance);
        }

        let (sender, outcome) = watch::channel(None);
        in_flight.insert(
            name.to_string(),
            InFlight {
                dependencies: dependencies.to_vec(),
                blocked_on: None,
                outcome,
            },
        );

        Slot::Leader(InFlightGuard {
            loader: self,
            name: name.to_string(),
            sender,
        })
    }

    /// Record which dependency `name` is waiting for while it resolves
    fn set_blocked_on(&self, name: &str, dependency: Option<&str>) {
        if let Some(load) = self.in_flight.lock().get_mut(name) {
            load.blocked_on = dependency.map(str::to_string);
        }
    }

    async fn await_in_flight(
        name: String,
        mut outcome: watch::Receiver<SharedOutcome>,
    ) -> Result<ModuleInstance> {
        let published = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };

        match published {
            Some(Ok(instance)) => Ok(instance),
            Some(Err(message)) => Err(ModuleError::ConcurrentLoadFailed { name, message }),
            None => Err(ModuleError::ConcurrentLoadFailed {
                name,
                message: "load was cancelled".to_string(),
            }),
        }
    }

    /// Resolve dependencies, fetch, instantiate and record one module
    async fn build(
        &self,
        name: &str,
        locator: &str,
        dependencies: &[String],
        mut chain: Vec<String>,
    ) -> Result<ModuleInstance> {
        // Unknown modules fail before any dependency is touched
        let factory = self
            .catalog
            .factory(name)
            .ok_or_else(|| ModuleError::UnknownModule {
                name: name.to_string(),
            })?;

        chain.push(name.to_string());
        let mut resolved = Vec::with_capacity(dependencies.len());

        for dep in dependencies {
            let instance = match self.registry.instance(dep) {
                Some(instance) => instance,
                None => {
                    debug!("Resolving dependency {} of {}", dep, name);
                    if chain.len() >= self.config.max_depth {
                        return Err(ModuleError::dependency(
                            name,
                            dep,
                            ModuleError::DependencyTooDeep {
                                name: dep.clone(),
                                max_depth: self.config.max_depth,
                            },
                        ));
                    }

                    // Transitive dependencies use their catalog defaults
                    let entry = self.catalog.entry(dep).ok_or_else(|| {
                        ModuleError::dependency(
                            name,
                            dep,
                            ModuleError::UnknownModule { name: dep.clone() },
                        )
                    })?;

                    // Visible to other loads deciding whether waiting on us is safe
                    self.set_blocked_on(name, Some(dep));
                    let loaded = self
                        .load_chained(dep.clone(), entry.locator, entry.dependencies, chain.clone())
                        .await;
                    self.set_blocked_on(name, None);
                    loaded.map_err(|e| ModuleError::dependency(name, dep, e))?
                }
            };
            resolved.push((dep.clone(), instance));
        }

        // Code is fetched only once every dependency is in place
        let source = self.fetch(name, locator).await?;

        debug!("Instantiating module {}", name);
        let instance = factory(ModuleContext {
            name: name.to_string(),
            locator: locator.to_string(),
            source,
            dependencies: resolved,
        })
        .map_err(|source| ModuleError::InstantiationFailed {
            name: name.to_string(),
            source,
        })?;

        // Recorded before the in-flight slot is released by the guard
        let instance = self.registry.insert(ModuleRecord {
            name: name.to_string(),
            instance,
            dependencies: dependencies.to_vec(),
        });

        info!("Loaded module: {} ({})", name, locator);
        Ok(instance)
    }

    async fn fetch(&self, name: &str, locator: &str) -> Result<FetchedSource> {
        let fetch = self.fetcher.fetch(name, locator);

        let fetched = match self.config.fetch_timeout_ms {
            Some(timeout_ms) => tokio::time::timeout(Duration::from_millis(timeout_ms), fetch)
                .await
                .map_err(|_| ModuleError::FetchTimedOut {
                    name: name.to_string(),
                    locator: locator.to_string(),
                    timeout_ms,
                })?,
            None => fetch.await,
        };

        fetched.map_err(|source| ModuleError::FetchFailed {
            name: name.to_string(),
            locator: locator.to_string(),
            source,
        })
    }
}

/// Follow the waits-for edges starting at the in-flight load of `name`.
///
/// Returns the cycle when they lead back into `chain`, the loads the
/// requester is resolving on behalf of.
fn waits_for_cycle(
    in_flight: &FxHashMap<String, InFlight>,
    name: &str,
    chain: &[String],
) -> Option<Vec<String>> {
    let mut path = vec![name.to_string()];
    let mut current = name;

    while let Some(next) = in_flight.get(current).and_then(|l| l.blocked_on.as_deref()) {
        if let Some(start) = chain.iter().position(|n| n == next) {
            let mut cycle = chain[start..].to_vec();
            cycle.extend(path);
            cycle.push(next.to_string());
            return Some(cycle);
        }
        // A stale edge must not loop forever
        if path.len() > in_flight.len() {
            break;
        }
        path.push(next.to_string());
        current = next;
    }
    None
}

/// Holds a name's in-flight slot; releasing it wakes everyone waiting
struct InFlightGuard<'a> {
    loader: &'a ModuleLoader,
    name: String,
    sender: watch::Sender<SharedOutcome>,
}

impl InFlightGuard<'_> {
    fn finish(self, result: &Result<ModuleInstance>) {
        let published = match result {
            Ok(instance) => Ok(instance.clone()),
            Err(e) => Err(e.to_string()),
        };
        self.sender.send_replace(Some(published));
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.loader.in_flight.lock().remove(&self.name);
    }
}
