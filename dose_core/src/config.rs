//! Configuration file support for Dosewatch.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/dosewatch/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Recomputation engine tunables
///
/// `window_days` bounds how far back the entry log is scanned on each
/// recomputation. An entry older than the window never affects
/// availability, even when its re-dose interval would still keep the drug
/// unavailable. That tradeoff is deliberate and observable; tune the
/// window rather than expecting arbitrarily old entries to count.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Trailing window of entries considered during recomputation
    #[serde(default = "default_window_days")]
    pub window_days: i64,

    /// How often the pipeline re-checks availability with no data change,
    /// so windows that lapse purely by time passing are noticed
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            tick_seconds: default_tick_seconds(),
        }
    }
}

impl EngineConfig {
    /// The trailing-window cutoff as a chrono duration
    pub fn window_cutoff(&self) -> chrono::Duration {
        chrono::Duration::days(self.window_days)
    }

    /// The timer re-check period
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_seconds)
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        let home = std::env::var("HOME").expect("HOME environment variable not set");
        PathBuf::from(home).join(".local/share")
    });
    base.join("dosewatch")
}

fn default_window_days() -> i64 {
    28
}

fn default_tick_seconds() -> u64 {
    5
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        if config.engine.window_days <= 0 {
            return Err(Error::Config(format!(
                "engine.window_days must be positive, got {}",
                config.engine.window_days
            )));
        }
        if config.engine.tick_seconds == 0 {
            return Err(Error::Config("engine.tick_seconds must be positive".into()));
        }

        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            let home = std::env::var("HOME").expect("HOME environment variable not set");
            PathBuf::from(home).join(".config")
        });
        base.join("dosewatch").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.window_days, 28);
        assert_eq!(config.engine.tick_seconds, 5);
    }

    #[test]
    fn test_window_cutoff_duration() {
        let config = EngineConfig::default();
        assert_eq!(config.window_cutoff(), chrono::Duration::weeks(4));
        assert_eq!(config.tick_interval(), std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.engine.window_days = 14;
        config.save_to(&path).unwrap();

        let parsed = Config::load_from(&path).unwrap();
        assert_eq!(parsed.engine.window_days, 14);
        assert_eq!(parsed.engine.tick_seconds, config.engine.tick_seconds);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[engine]
window_days = 7
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.window_days, 7);
        assert_eq!(config.engine.tick_seconds, 5); // default
    }

    #[test]
    fn test_rejects_nonpositive_window() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\nwindow_days = 0\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
