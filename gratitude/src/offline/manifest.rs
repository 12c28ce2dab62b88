//! Versioned asset manifest the agent installs against

use crate::config::{CACHE_PREFIX, DEFAULT_SHELL_PATHS};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_shell_paths() -> Vec<String> {
    DEFAULT_SHELL_PATHS.iter().map(|p| p.to_string()).collect()
}

/// Build version plus the artifacts that make up the offline app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentManifest {
    pub version: String,
    pub assets: Vec<String>,
    /// Paths tried, in order, when a navigation misses the cache
    #[serde(default = "default_shell_paths")]
    pub shell_paths: Vec<String>,
}

impl AgentManifest {
    pub fn new(version: impl Into<String>, assets: Vec<String>) -> Self {
        Self {
            version: version.into(),
            assets,
            shell_paths: default_shell_paths(),
        }
    }

    /// Read a manifest from a JSON file
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let manifest: Self = serde_json::from_str(&raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version.is_empty() {
            return Err(AppError::Validation("Manifest version is empty".to_string()));
        }
        if self
            .version
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(AppError::Validation(format!(
                "Manifest version {:?} contains invalid characters",
                self.version
            )));
        }
        if let Some(bad) = self.assets.iter().find(|a| !a.starts_with('/')) {
            return Err(AppError::Validation(format!(
                "Asset {:?} is not an absolute path on the app origin",
                bad
            )));
        }
        Ok(())
    }

    /// Cache namespace owned by this version
    pub fn cache_name(&self) -> String {
        format!("{}{}", CACHE_PREFIX, self.version)
    }

    /// Namespace written by some version of this agent, current or not
    pub fn is_agent_cache(name: &str) -> bool {
        name.starts_with(CACHE_PREFIX)
    }
}
