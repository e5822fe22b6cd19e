//! Configuration handling for erp-modctl

use anyhow::{Context, Result};
use erp_modules::LoaderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// erp-modctl configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Loader settings (fetch timeout, dependency depth)
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Where module code is read from
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// Filesystem fetch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Where module code is looked up; relative entries are taken from the manifest's directory
    #[serde(default = "default_search_paths")]
    pub search_paths: Vec<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            search_paths: default_search_paths(),
        }
    }
}

impl FetchConfig {
    /// Search paths with relative entries anchored at `base`
    pub fn resolved_search_paths(&self, base: &Path) -> Vec<PathBuf> {
        self.search_paths
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { base.join(p) })
            .collect()
    }
}

fn default_search_paths() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

/// Load configuration from file or use defaults
pub fn load_config(path: Option<PathBuf>) -> Result<Config> {
    if let Some(path) = path {
        read_config(&path)
    } else if let Some(home) = dirs::home_dir() {
        let default_path = home.join(".erp-modules").join("config.toml");
        if default_path.exists() {
            read_config(&default_path)
        } else {
            Ok(Config::default())
        }
    } else {
        Ok(Config::default())
    }
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("invalid config {}", path.display()))
}
