pub mod therapy_config;
pub mod timing_config;

use std::path::Path;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::therapy_config::{SimulationSettings, TherapySettings};
use crate::config::timing_config::{ConnectionSettings, ProtocolTiming};
use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "lamp_config.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LampConfig {
    pub timing: ProtocolTiming,
    pub connection: ConnectionSettings,
    pub simulation: SimulationSettings,
    pub therapy: TherapySettings,
}

impl LampConfig {
    /// Loads the config from `path`, falling back to defaults when the file is missing.
    pub async fn load(path: &Path) -> Result<Self> {
        let file_path_str = path.to_string_lossy().into_owned();

        if !path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path_str);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path_str);
        Ok(config)
    }

    /// Saves the config to `path`, creating the parent directory if needed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            ensure_directory_exists(dir).await?;
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize lamp config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(path, config_json).await?;

        info!("Lamp config saved to {:?}.", path.to_string_lossy());
        Ok(())
    }
}
