//! Package source configuration
//!
//! Reads the source list from `~/.config/feedgate/sources.yaml`. Editing
//! that file is left to the host.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::source::{PackageSource, PackageSourceProvider};

/// Sources configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Configured sources, in priority order
    #[serde(default)]
    pub sources: Vec<PackageSource>,
}

fn default_api_version() -> String {
    "feedgate.io/v1".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            sources: Vec::new(),
        }
    }
}

impl SourceConfig {
    /// Load configuration from default location
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        for source in &config.sources {
            source.kind()?;
        }
        tracing::debug!(path = %path.display(), sources = config.sources.len(), "loaded source config");
        Ok(config)
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CoreError::configuration("Could not determine config directory"))?;
        Ok(config_dir.join("feedgate").join("sources.yaml"))
    }

    /// Get a source by name
    pub fn get(&self, name: &str) -> Option<&PackageSource> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// List all source names
    pub fn names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name.as_str()).collect()
    }
}

impl PackageSourceProvider for SourceConfig {
    fn load_package_sources(&self) -> Vec<PackageSource> {
        self.sources.clone()
    }
}
