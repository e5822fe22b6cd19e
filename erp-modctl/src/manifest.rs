//! Module manifests and the generic file-backed module

use anyhow::{Context, Result};
use erp_modules::{Module, ModuleCatalog, ModuleContext, ModuleDescriptor, ModuleInstance};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// A manifest lists the modules an application is made of
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    /// Modules in load order
    #[serde(default)]
    pub modules: Vec<ModuleDescriptor>,
}

impl Manifest {
    /// Parse a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid manifest {}", path.display()))
    }

    /// Register every listed module in a fresh catalog
    pub fn catalog(&self) -> ModuleCatalog {
        let catalog = ModuleCatalog::new();
        for module in &self.modules {
            let deps: Vec<&str> = module.dependencies.iter().map(String::as_str).collect();
            catalog.register(&module.name, &module.locator, &deps, SourceModule::build);
        }
        catalog
    }
}

/// A module known only by its code file
#[derive(Debug)]
pub struct SourceModule {
    /// Module name
    pub name: String,

    /// File the code was read from, when it came from disk
    pub path: Option<PathBuf>,

    /// Size of the code in bytes
    pub size: usize,

    /// Names of the dependencies it was built with
    pub dependencies: Vec<String>,
}

impl SourceModule {
    fn build(ctx: ModuleContext) -> Result<ModuleInstance> {
        Ok(Arc::new(SourceModule {
            name: ctx.name,
            path: ctx.source.resolved_path,
            size: ctx.source.bytes.len(),
            dependencies: ctx.dependencies.into_iter().map(|(name, _)| name).collect(),
        }))
    }
}

impl Module for SourceModule {
    fn start(&self) -> Result<()> {
        info!(
            "Started module {} from {:?} ({} bytes, deps: {:?})",
            self.name, self.path, self.size, self.dependencies
        );
        Ok(())
    }
}
