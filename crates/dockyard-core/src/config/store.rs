//! Config store for loading and saving dockyard.toml.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{ProvisionConfig, parser, paths};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Store backed by the per-user config directory.
    pub fn with_defaults() -> anyhow::Result<Self> {
        let dir = paths::default_config_dir()?;
        Ok(Self::from_dir(&dir))
    }

    pub fn from_dir(config_dir: &Path) -> Self {
        Self::from_path(paths::config_path_in(config_dir))
    }

    pub fn from_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config, or the defaults when the file does not exist.
    pub fn load(&self) -> anyhow::Result<ProvisionConfig> {
        if !self.config_path.exists() {
            tracing::debug!(path = %self.config_path.display(), "No config file, using defaults");
            return Ok(ProvisionConfig::new());
        }
        parser::parse_dockyard_toml(&self.config_path)
    }

    pub fn save(&self, config: &ProvisionConfig) -> anyhow::Result<()> {
        let content = parser::to_toml(config)?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&self.config_path, content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;
        Ok(())
    }
}
