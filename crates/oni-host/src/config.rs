//! Configuration loading

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
}

/// Which implementation of the native API to drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process simulated controller
    #[default]
    Sim,
    /// Installed liboni (needs the `liboni` feature)
    Liboni,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sim" => Ok(BackendKind::Sim),
            "liboni" => Ok(BackendKind::Liboni),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Hardware translation driver
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Physical host index, -1 lets the driver choose
    #[serde(default)]
    pub index: i32,
    /// Bytes per blocking read (optional)
    #[serde(default)]
    pub block_read_size: Option<u32>,
    /// Bytes of write pre-allocation (optional)
    #[serde(default)]
    pub block_write_size: Option<u32>,
    /// Host role in a multi-host topology (optional)
    #[serde(default)]
    pub hardware_address: Option<u32>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            driver: default_driver(),
            index: 0,
            block_read_size: None,
            block_write_size: None,
            hardware_address: None,
        }
    }
}

fn default_driver() -> String {
    "test".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Frames to read before stopping (0 reads none)
    #[serde(default = "default_frames")]
    pub frames: u64,
    /// Zero the acquisition clock as part of starting
    #[serde(default = "default_true")]
    pub reset_clock: bool,
    /// Print every Nth frame (0 prints none)
    #[serde(default = "default_display_every")]
    pub display_every: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            frames: default_frames(),
            reset_clock: true,
            display_every: default_display_every(),
        }
    }
}

fn default_frames() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_display_every() -> u64 {
    100
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = load_config(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.context.driver, "test");
        assert_eq!(config.acquisition.frames, 1000);
    }

    #[test]
    fn test_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("oni.toml");
        std::fs::write(
            &path,
            r#"
[context]
backend = "liboni"
driver = "riffa"
block_read_size = 2048

[acquisition]
frames = 10
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.context.backend, BackendKind::Liboni);
        assert_eq!(config.context.driver, "riffa");
        assert_eq!(config.context.index, 0);
        assert_eq!(config.context.block_read_size, Some(2048));
        assert_eq!(config.context.hardware_address, None);
        assert_eq!(config.acquisition.frames, 10);
        assert!(config.acquisition.reset_clock);
        assert_eq!(config.acquisition.display_every, 100);
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("oni.toml");
        std::fs::write(&path, "[context]\nbackend = \"ethernet\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_saved_defaults_load_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("oni.toml");
        save_default_config(&path).unwrap();
        assert_eq!(load_config(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("SIM".parse::<BackendKind>(), Ok(BackendKind::Sim));
        assert_eq!("liboni".parse::<BackendKind>(), Ok(BackendKind::Liboni));
        assert!("ft600".parse::<BackendKind>().is_err());
    }
}
