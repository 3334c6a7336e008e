//! Process-wide constants and the `config.yaml` schema.
//!
//! The `hue:` section name is kept even though this crate is bridge-agnostic:
//! it is the boundary contract with the out-of-scope discovery/streaming
//! collaborator, which already reads/writes that key.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const RENDER_HZ: f64 = 50.0;
pub const PULSES_PER_QUARTER_NOTE: u32 = 24;
pub const TICKS_PER_QUARTER_NOTE: u32 = 960;
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:9876";
pub const STATUS_BROADCAST_HZ: f64 = 10.0;
pub const IDENTIFY_DURATION_SECS: f64 = 1.0;
pub const IDENTIFY_FLASH_PERIOD_SECS: f64 = 0.15;
pub const DEFAULT_FADE_DURATION_SECS: f64 = 2.0;
pub const GAMMA: f64 = 2.2;

#[derive(Debug)]
pub struct ConfigError(String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HueConfig {
    #[serde(default)]
    pub bridge_ip: Option<String>,
    #[serde(default)]
    pub bridge_username: Option<String>,
    #[serde(default)]
    pub entertainment_area_id: Option<String>,
    #[serde(default)]
    pub light_order: Vec<String>,
    #[serde(default)]
    pub custom_groups: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub zones: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LightingConfig {
    pub hue: HueConfig,
}

impl LightingConfig {
    /// Loads and validates the configuration file. Missing file or a missing
    /// `hue:` bridge identity is a fatal configuration error per the error
    /// taxonomy; an empty `light_order`/`custom_groups`/`zones` is valid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let text = fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read {}: {e}", path.display())))?;
        let config: LightingConfig = serde_yml::from_str(&text)
            .map_err(|e| ConfigError(format!("failed to parse {}: {e}", path.display())))?;
        Ok(config)
    }

    /// Atomically persists the `hue:` section (write-to-temp-then-rename),
    /// preserving any other top-level keys already present on disk.
    pub fn save_light_config(
        path: &Path,
        light_order: Vec<String>,
        custom_groups: HashMap<String, Vec<String>>,
        zones: Option<HashMap<String, Vec<String>>>,
    ) -> Result<(), ConfigError> {
        let mut config = if path.exists() {
            Self::load(path).unwrap_or_default()
        } else {
            Self::default()
        };

        config.hue.light_order = light_order;
        config.hue.custom_groups = custom_groups;
        if let Some(zones) = zones {
            config.hue.zones = zones;
        }

        let serialized = serde_yml::to_string(&config)
            .map_err(|e| ConfigError(format!("failed to serialize config: {e}")))?;

        let tmp_path: PathBuf = {
            let mut p = path.to_path_buf();
            let file_name = format!(
                "{}.tmp",
                path.file_name().and_then(|s| s.to_str()).unwrap_or("config.yaml")
            );
            p.set_file_name(file_name);
            p
        };

        fs::write(&tmp_path, serialized)
            .map_err(|e| ConfigError(format!("failed to write {}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, path)
            .map_err(|e| ConfigError(format!("failed to rename into place: {e}")))?;

        Ok(())
    }
}
