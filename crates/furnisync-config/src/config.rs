//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Inventory scan timing.
    pub scan: ScanSettings,
    /// Bulk operation pacing.
    pub bulk: BulkSettings,
    /// Trade identity and history.
    pub trade: TradeSettings,
    /// Debug/development settings.
    pub debug: DebugSettings,
}

/// Inventory scan timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanSettings {
    /// Delay before the first page request, in milliseconds.
    pub warmup_ms: u64,
    /// Delay between a page and the next request, in milliseconds.
    pub page_delay_ms: u64,
    /// Give up when no page arrives for this many seconds.
    pub timeout_secs: u64,
}

/// Bulk operation pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BulkSettings {
    /// Minimum spacing between two requests, in milliseconds.
    pub request_spacing_ms: u64,
}

/// Trade settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TradeSettings {
    /// Our player name as it appears on the trade table.
    pub local_party: String,
    /// Where completed trades are saved. Not saved when unset.
    pub log_file: Option<PathBuf>,
}

/// Debug/development settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugSettings {
    /// Log level filter (e.g. "info", "debug", "furnisync_core=trace").
    pub log_level: String,
    /// Trace every outbound packet.
    pub log_packets: bool,
}

// --- Defaults ---

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            warmup_ms: 5000,
            page_delay_ms: 500,
            timeout_secs: 30,
        }
    }
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            request_spacing_ms: 550,
        }
    }
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_packets: false,
        }
    }
}

// --- Durations ---

impl ScanSettings {
    /// Warm-up delay.
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    /// Delay between pages.
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    /// Page timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl BulkSettings {
    /// Minimum spacing between requests.
    pub fn request_spacing(&self) -> Duration {
        Duration::from_millis(self.request_spacing_ms)
    }
}

/// Platform config directory for furnisync, if the platform has one.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("furnisync"))
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            return Ok(config);
        }

        let config = read_config(&config_path)?;
        log::info!("Loaded config from {}", config_path.display());
        Ok(config)
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let write_error = |source| ConfigError::Write {
            path: config_path.clone(),
            source,
        };
        std::fs::create_dir_all(config_dir).map_err(write_error)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized = ron::ser::to_string_pretty(self, pretty)?;
        std::fs::write(&config_path, serialized).map_err(write_error)?;
        log::debug!("Saved config to {}", config_path.display());
        Ok(())
    }

    /// Returns `Some(new_config)` if the file on disk differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = read_config(&config_dir.join(CONFIG_FILE))?;
        if &new_config == self {
            return Ok(None);
        }
        log::info!("Config reloaded with changes");
        Ok(Some(new_config))
    }
}

fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    ron::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
