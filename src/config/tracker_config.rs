//! Tracker configuration: deployment-time settings read from TOML.
//!
//! Unlike the settings store (which the cloud may rewrite at runtime), this
//! file describes the device build: identity announced for OTA, which cloud
//! platform flavour to speak, and engine tuning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::defaults;

// ============================================================================
// Root Config
// ============================================================================

/// Complete tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TrackerConfig {
    pub device: DeviceConfig,
    pub platform: PlatformConfig,
    pub connectivity: ConnectivityConfig,
    pub sleep: SleepConfig,
    pub storage: StorageConfig,
}

impl TrackerConfig {
    /// Load configuration using the standard search order:
    /// 1. `$TRACKER_CONFIG` environment variable
    /// 2. `./tracker.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), device = %config.device.project_name, "Loaded tracker config from TRACKER_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from TRACKER_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "TRACKER_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(defaults::LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(device = %config.device.project_name, "Loaded tracker config from ./tracker.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./tracker.toml, using defaults");
                }
            }
        }

        info!("No tracker.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document. Unknown keys only warn.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.device.project_name.trim().is_empty() {
            errors.push("device.project_name must not be empty".to_string());
        }
        if self.device.firmware_name.trim().is_empty() {
            errors.push("device.firmware_name must not be empty".to_string());
        }
        if self.device.project_name == self.device.firmware_name {
            errors.push(format!(
                "device.project_name and device.firmware_name must differ (both '{}')",
                self.device.project_name
            ));
        }
        if self.connectivity.max_retries > 10 {
            errors.push(format!(
                "connectivity.max_retries ({}) must be <= 10, a stalled cycle never sleeps",
                self.connectivity.max_retries
            ));
        }
        if self.sleep.idle_poll_ms == 0 {
            errors.push("sleep.idle_poll_ms must be > 0".to_string());
        }
        if self.sleep.psm_active_time_secs == 0 {
            errors.push("sleep.psm_active_time_secs must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),
    #[error("config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, toml::de::Error),
    #[error("config serialization error: {0}")]
    Serialize(toml::ser::Error),
    #[error("config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Device
// ============================================================================

/// Image names and versions announced to the OTA service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub project_name: String,
    pub project_version: String,
    pub firmware_name: String,
    pub firmware_version: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            project_name: defaults::PROJECT_NAME.to_string(),
            project_version: defaults::PROJECT_VERSION.to_string(),
            firmware_name: defaults::FIRMWARE_NAME.to_string(),
            firmware_version: defaults::FIRMWARE_VERSION.to_string(),
        }
    }
}

// ============================================================================
// Platform
// ============================================================================

/// How reports are shaped for the cloud platform
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    /// Property/event thing model with inbound commands and OTA
    #[default]
    ThingModel,
    /// Plain position telemetry, no inbound commands
    Telemetry,
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportFormat::ThingModel => write!(f, "thing_model"),
            ReportFormat::Telemetry => write!(f, "telemetry"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PlatformConfig {
    pub report_format: ReportFormat,
}

// ============================================================================
// Connectivity
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Extra attempts after the first, for both attach and session connect
    pub max_retries: u32,
    /// Delay between failed session connect attempts (ms)
    pub connect_backoff_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::CONNECT_MAX_RETRIES,
            connect_backoff_ms: defaults::CONNECT_BACKOFF_MS,
        }
    }
}

impl ConnectivityConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }
}

// ============================================================================
// Sleep
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SleepConfig {
    /// Fallback poll interval while waiting for the worker to go idle (ms)
    pub idle_poll_ms: u64,
    /// PSM active timer (seconds)
    pub psm_active_time_secs: u64,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: defaults::SLEEP_IDLE_POLL_MS,
            psm_active_time_secs: defaults::PSM_ACTIVE_TIME_SECS,
        }
    }
}

impl SleepConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn psm_active_time(&self) -> Duration {
        Duration::from_secs(self.psm_active_time_secs)
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the sled database (settings + offline history)
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(defaults::DEFAULT_DATA_DIR),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
