//! Subcommand implementations

use crate::config::Config;
use crate::manifest::Manifest;
use anyhow::{Context, Result};
use erp_modules::{FsFetcher, LoadResult, ModuleLoader};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

/// Build a loader for a manifest and load every module it lists
pub async fn load_manifest(
    manifest_path: &Path,
    config: &Config,
) -> Result<(ModuleLoader, Vec<LoadResult>)> {
    let manifest = Manifest::load(manifest_path)?;
    let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let search_paths = config.fetch.resolved_search_paths(base);
    debug!("Module search paths: {:?}", search_paths);

    let loader = ModuleLoader::new(
        Arc::new(manifest.catalog()),
        Arc::new(FsFetcher::new(search_paths)),
        config.loader.clone(),
    );
    let results = loader.load_modules(&manifest.modules).await;
    Ok((loader, results))
}

/// `load`: report per-module results and start what loaded. Returns false on any failure.
pub async fn load(manifest_path: &Path, config: &Config, start: bool) -> Result<bool> {
    let (loader, results) = load_manifest(manifest_path, config).await?;
    print_results(&results);

    if start {
        start_modules(&loader)?;
    }

    Ok(results.iter().all(LoadResult::is_success))
}

/// `graph`: print the recorded dependency graph as JSON
pub async fn graph(manifest_path: &Path, config: &Config) -> Result<bool> {
    let (loader, results) = load_manifest(manifest_path, config).await?;
    for result in results.iter().filter(|r| !r.is_success()) {
        eprintln!("{}", describe(result));
    }

    let graph = loader.get_dependency_graph();
    println!("{}", serde_json::to_string_pretty(&graph)?);
    Ok(results.iter().all(LoadResult::is_success))
}

/// `check`: load and look for cycles. Returns false on failures or cycles.
pub async fn check(manifest_path: &Path, config: &Config) -> Result<bool> {
    let (loader, results) = load_manifest(manifest_path, config).await?;
    print_results(&results);

    let cycles = loader.detect_circular_dependencies();
    if cycles.is_empty() {
        println!("no circular dependencies");
    } else {
        for cycle in &cycles {
            println!("cycle: {}", cycle.join(" -> "));
        }
    }

    Ok(cycles.is_empty() && results.iter().all(LoadResult::is_success))
}

/// Start loaded modules, dependencies first
fn start_modules(loader: &ModuleLoader) -> Result<()> {
    let order = loader.get_dependency_graph().topological_order()?;
    for name in order {
        if let Some(module) = loader.get_module(&name) {
            module
                .start()
                .with_context(|| format!("failed to start module {}", name))?;
        }
    }
    Ok(())
}

fn print_results(results: &[LoadResult]) {
    for result in results {
        println!("{}", describe(result));
    }
}

fn describe(result: &LoadResult) -> String {
    match &result.outcome {
        Ok(_) => format!("ok    {}", result.name),
        Err(e) => {
            error!("Module {} failed: {}", result.name, e);
            format!("FAIL  {}: {}", result.name, error_chain(e))
        }
    }
}

/// Render an error followed by its causes
fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        // Some errors already print their cause
        if !message.ends_with(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}
