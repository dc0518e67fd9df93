use crate::rpc::RelaySettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use upload_engine::{UploadConfig, upload_config::normalize_base_url};

/// On-disk relay configuration, a `[relay]` and an `[upload]` table.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    pub relay: RelaySettings,
    pub upload: UploadConfig,
}

impl RelayConfig {
    /// Reads the TOML file at `config_path`, writing the defaults there first
    /// when it does not exist yet.
    pub fn load_config(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let default_config = Self::default();
            default_config.save_config(config_path)?;
            return Ok(default_config);
        }

        let config_str = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config: {}", config_path.display()))?;

        let mut config: RelayConfig = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config: {}", config_path.display()))?;
        config.upload.base_url = normalize_base_url(&config.upload.base_url);

        Ok(config)
    }

    pub fn save_config(&self, config_path: &Path) -> Result<()> {
        let toml_string = toml::to_string(self).context("Failed to serialize config")?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(config_path)
            .with_context(|| format!("Failed to create config: {}", config_path.display()))?;
        file.write_all(toml_string.as_bytes())?;

        Ok(())
    }
}
