//! Layer cache configuration.
//!
//! Settings can be built programmatically, read from environment variables,
//! or loaded from a TOML file. Sizes are held in bytes in memory and written
//! as megabytes in files and environment variables.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory_budget::{
    AdaptiveConfig, SystemMemoryInfo, DEFAULT_BUDGET_NORMAL, DEFAULT_MAX_BUDGET,
    DEFAULT_MIN_BUDGET, DEFAULT_PRESSURE_CHECK_INTERVAL_MS, MB,
};

/// Layers prefetched on each side of the viewed layer by default
pub const DEFAULT_PREFETCH_RADIUS: usize = 3;

pub const ENV_BUDGET_MB: &str = "TOOLPATH_CACHE_BUDGET_MB";
pub const ENV_ADAPTIVE: &str = "TOOLPATH_CACHE_ADAPTIVE";
pub const ENV_CHECK_INTERVAL_MS: &str = "TOOLPATH_CACHE_CHECK_INTERVAL_MS";
pub const ENV_MIN_BUDGET_MB: &str = "TOOLPATH_CACHE_MIN_BUDGET_MB";
pub const ENV_MAX_BUDGET_MB: &str = "TOOLPATH_CACHE_MAX_BUDGET_MB";
pub const ENV_PREFETCH_RADIUS: &str = "TOOLPATH_CACHE_PREFETCH_RADIUS";

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    fn invalid(key: &str, value: impl ToString) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Configuration for a [`LayerCache`](crate::LayerCache)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Initial byte budget
    pub memory_budget: usize,
    /// Whether pressure checks may move the budget
    pub adaptive_enabled: bool,
    /// Minimum milliseconds between pressure checks
    pub pressure_check_interval_ms: u64,
    /// Smallest adaptive budget in bytes
    pub min_budget: usize,
    /// Largest adaptive budget in bytes
    pub max_budget: usize,
    /// Layers to prefetch on each side of the viewed layer
    pub prefetch_radius: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget: DEFAULT_BUDGET_NORMAL,
            adaptive_enabled: false,
            pressure_check_interval_ms: DEFAULT_PRESSURE_CHECK_INTERVAL_MS,
            min_budget: DEFAULT_MIN_BUDGET,
            max_budget: DEFAULT_MAX_BUDGET,
            prefetch_radius: DEFAULT_PREFETCH_RADIUS,
        }
    }
}

/// On-disk layout. Sizes in megabytes, missing keys take defaults.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct ConfigFile {
    budget_mb: usize,
    adaptive: bool,
    check_interval_ms: u64,
    min_budget_mb: usize,
    max_budget_mb: usize,
    prefetch_radius: usize,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for ConfigFile {
    fn from(config: &CacheConfig) -> Self {
        Self {
            budget_mb: config.budget_mb(),
            adaptive: config.adaptive_enabled,
            check_interval_ms: config.pressure_check_interval_ms,
            min_budget_mb: config.min_budget / MB,
            max_budget_mb: config.max_budget / MB,
            prefetch_radius: config.prefetch_radius,
        }
    }
}

impl CacheConfig {
    /// Defaults sized for the given device
    pub fn for_device(info: &SystemMemoryInfo) -> Self {
        let budget = info.default_budget();
        Self {
            memory_budget: budget,
            max_budget: DEFAULT_MAX_BUDGET.max(budget),
            ..Self::default()
        }
    }

    /// Sets the budget in megabytes.
    pub fn with_budget_mb(mut self, mb: usize) -> Self {
        self.memory_budget = mb.saturating_mul(MB);
        self
    }

    /// Turns adaptive budgeting on or off.
    pub fn with_adaptive(mut self, enabled: bool) -> Self {
        self.adaptive_enabled = enabled;
        self
    }

    /// Sets the adaptive budget range in megabytes.
    pub fn with_budget_range_mb(mut self, min_mb: usize, max_mb: usize) -> Self {
        self.min_budget = min_mb.saturating_mul(MB);
        self.max_budget = max_mb.saturating_mul(MB);
        self
    }

    /// Sets the minimum time between pressure checks.
    pub fn with_check_interval_ms(mut self, interval_ms: u64) -> Self {
        self.pressure_check_interval_ms = interval_ms;
        self
    }

    /// Sets how many layers to prefetch on each side.
    pub fn with_prefetch_radius(mut self, radius: usize) -> Self {
        self.prefetch_radius = radius;
        self
    }

    /// Returns the budget in megabytes.
    pub fn budget_mb(&self) -> usize {
        self.memory_budget / MB
    }

    /// Adaptive settings for the cache
    pub fn adaptive(&self) -> AdaptiveConfig {
        AdaptiveConfig::new(
            self.adaptive_enabled,
            self.pressure_check_interval_ms,
            self.min_budget,
            self.max_budget,
        )
    }

    /// Checks that sizes are non-zero whole megabytes and the adaptive range
    /// is ordered.
    ///
    /// Files and environment variables carry sizes in megabytes, so a
    /// fractional size could not be saved and loaded back unchanged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, bytes) in [
            ("memory_budget", self.memory_budget),
            ("min_budget", self.min_budget),
            ("max_budget", self.max_budget),
        ] {
            if bytes == 0 || bytes % MB != 0 {
                return Err(ConfigError::invalid(
                    key,
                    format!("{} bytes (not a whole number of megabytes)", bytes),
                ));
            }
        }
        if self.max_budget < self.min_budget {
            return Err(ConfigError::invalid(
                "max_budget",
                format!("{} (below min_budget {})", self.max_budget, self.min_budget),
            ));
        }
        Ok(())
    }

    /// Returns the default config file location for the current platform.
    ///
    /// - macOS: ~/Library/Application Support/toolpath-viewer/layer-cache.toml
    /// - Linux: ~/.config/toolpath-viewer/layer-cache.toml
    /// - Windows: %APPDATA%\toolpath-viewer\layer-cache.toml
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("toolpath-viewer")
            .join("layer-cache.toml")
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TOOLPATH_CACHE_BUDGET_MB`: budget in MB (default: 48)
    /// - `TOOLPATH_CACHE_ADAPTIVE`: `true`/`false`, `1`/`0`, `on`/`off` (default: off)
    /// - `TOOLPATH_CACHE_CHECK_INTERVAL_MS`: pressure check interval (default: 5000)
    /// - `TOOLPATH_CACHE_MIN_BUDGET_MB`: adaptive minimum in MB (default: 4)
    /// - `TOOLPATH_CACHE_MAX_BUDGET_MB`: adaptive maximum in MB (default: 64)
    /// - `TOOLPATH_CACHE_PREFETCH_RADIUS`: layers per side (default: 3)
    ///
    /// # Errors
    /// Returns an error if any variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(mb) = env_value::<usize>(ENV_BUDGET_MB)? {
            config.memory_budget = megabytes(ENV_BUDGET_MB, mb)?;
        }
        if let Ok(raw) = std::env::var(ENV_ADAPTIVE) {
            config.adaptive_enabled = parse_flag(ENV_ADAPTIVE, &raw)?;
        }
        if let Some(interval) = env_value::<u64>(ENV_CHECK_INTERVAL_MS)? {
            config.pressure_check_interval_ms = interval;
        }
        if let Some(mb) = env_value::<usize>(ENV_MIN_BUDGET_MB)? {
            config.min_budget = megabytes(ENV_MIN_BUDGET_MB, mb)?;
        }
        if let Some(mb) = env_value::<usize>(ENV_MAX_BUDGET_MB)? {
            config.max_budget = megabytes(ENV_MAX_BUDGET_MB, mb)?;
        }
        if let Some(radius) = env_value::<usize>(ENV_PREFETCH_RADIUS)? {
            config.prefetch_radius = radius;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// budget_mb = 48
    /// adaptive = true
    /// check_interval_ms = 5000
    /// min_budget_mb = 4
    /// max_budget_mb = 64
    /// prefetch_radius = 3
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(toml_str)?;

        let config = Self {
            memory_budget: megabytes("budget_mb", file.budget_mb)?,
            adaptive_enabled: file.adaptive,
            pressure_check_interval_ms: file.check_interval_ms,
            min_budget: megabytes("min_budget_mb", file.min_budget_mb)?,
            max_budget: megabytes("max_budget_mb", file.max_budget_mb)?,
            prefetch_radius: file.prefetch_radius,
        };
        config.validate()?;
        Ok(config)
    }

    /// Converts configuration to TOML format. Invalid configurations are
    /// refused rather than written lossily.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        self.validate()?;
        Ok(toml::to_string_pretty(&ConfigFile::from(self))?)
    }

    /// Saves configuration to a TOML file, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml_string()?)?;
        log::debug!("saved layer cache config to {}", path.display());
        Ok(())
    }
}

fn env_value<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::invalid(key, &raw)),
        Err(_) => Ok(None),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, raw)),
    }
}

fn megabytes(key: &str, mb: usize) -> Result<usize, ConfigError> {
    mb.checked_mul(MB).ok_or_else(|| ConfigError::invalid(key, mb))
}
