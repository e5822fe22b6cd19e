//! Fetching module code from locators

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::path::{Component, Path, PathBuf};
use tracing::{trace, warn};

/// Module code as returned by a fetcher
#[derive(Debug, Clone)]
pub struct FetchedSource {
    /// Locator the code was fetched from
    pub locator: String,

    /// Where the locator resolved to, when it names a file
    pub resolved_path: Option<PathBuf>,

    /// Raw module code
    pub bytes: Vec<u8>,
}

impl FetchedSource {
    /// Create a source without a resolved path
    pub fn new(locator: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            locator: locator.into(),
            resolved_path: None,
            bytes,
        }
    }

    /// View the code as UTF-8 text
    pub fn as_text(&self) -> anyhow::Result<&str> {
        std::str::from_utf8(&self.bytes)
            .with_context(|| format!("module code at {} is not valid UTF-8", self.locator))
    }
}

/// Turns a locator into module code. This is the only step of a load that suspends.
#[async_trait]
pub trait ModuleFetcher: Send + Sync {
    /// Fetch the code for `name` from `locator`
    async fn fetch(&self, name: &str, locator: &str) -> anyhow::Result<FetchedSource>;
}

/// In-memory locator table
#[derive(Debug, Default)]
pub struct StaticFetcher {
    sources: RwLock<FxHashMap<String, Vec<u8>>>,
}

impl StaticFetcher {
    /// Create an empty fetcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with_source(self, locator: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(locator, bytes);
        self
    }

    /// Make `bytes` available under `locator`
    pub fn insert(&self, locator: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.sources.write().insert(locator.into(), bytes.into());
    }

    /// Forget a locator
    pub fn remove(&self, locator: &str) -> bool {
        self.sources.write().remove(locator).is_some()
    }
}

#[async_trait]
impl ModuleFetcher for StaticFetcher {
    async fn fetch(&self, name: &str, locator: &str) -> anyhow::Result<FetchedSource> {
        let bytes = self
            .sources
            .read()
            .get(locator)
            .cloned()
            .ok_or_else(|| anyhow!("no code registered at locator {}", locator))?;
        trace!("Fetched {} ({} bytes) from static table", name, bytes.len());
        Ok(FetchedSource::new(locator, bytes))
    }
}

/// Reads module files from a set of search paths
#[derive(Debug, Clone)]
pub struct FsFetcher {
    search_paths: Vec<PathBuf>,
}

impl FsFetcher {
    /// Create a fetcher over the given search paths, tried in order
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Reject locators that could escape the search paths
    fn validate_locator(&self, locator: &str) -> anyhow::Result<()> {
        if locator.is_empty() {
            bail!("empty locator");
        }

        if locator.contains("..") || locator.contains("./") || locator.contains("/.") {
            warn!("Rejected locator with directory traversal: {}", locator);
            bail!("locator {} contains directory traversal", locator);
        }

        if Path::new(locator).is_absolute() {
            warn!("Rejected absolute locator: {}", locator);
            bail!("locator {} is an absolute path", locator);
        }

        if locator.contains('\0') {
            warn!("Rejected locator with null byte: {:?}", locator);
            bail!("locator contains a null byte");
        }

        Ok(())
    }

    /// Find the first search path containing the locator
    async fn resolve(&self, locator: &str) -> anyhow::Result<PathBuf> {
        for search_path in &self.search_paths {
            let candidate = search_path.join(locator);
            if tokio::fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                trace!("Found module code at: {:?}", candidate);
                return self.validate_resolved_path(candidate).await;
            }
        }

        bail!("{} not found in any search path", locator)
    }

    /// Check that a resolved path canonicalises inside a search path
    async fn validate_resolved_path(&self, path: PathBuf) -> anyhow::Result<PathBuf> {
        let canonical = tokio::fs::canonicalize(&path)
            .await
            .with_context(|| format!("failed to canonicalize {}", path.display()))?;

        let mut inside = false;
        for search_path in &self.search_paths {
            if let Ok(root) = tokio::fs::canonicalize(search_path).await {
                if canonical.starts_with(&root) {
                    inside = true;
                    break;
                }
            }
        }

        if !inside {
            warn!("Module path {:?} is outside allowed search paths", canonical);
            bail!("{} is outside the search paths", canonical.display());
        }

        if canonical
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            warn!("Path contains parent directory component: {:?}", canonical);
            bail!("{} contains a parent directory component", canonical.display());
        }

        Ok(canonical)
    }
}

#[async_trait]
impl ModuleFetcher for FsFetcher {
    async fn fetch(&self, name: &str, locator: &str) -> anyhow::Result<FetchedSource> {
        self.validate_locator(locator)?;
        let path = self.resolve(locator).await?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        trace!("Read {} bytes for module {} from {:?}", bytes.len(), name, path);

        Ok(FetchedSource {
            locator: locator.to_string(),
            resolved_path: Some(path),
            bytes,
        })
    }
}
