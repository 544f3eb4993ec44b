//! Daemon configuration
//! Only handles loading, saving and validating the TOML settings file

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Main daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    pub paths: PathsConfig,
    pub devices: DevicesConfig,
    pub acquisition: AcquisitionConfig,
    pub gnss: GnssSettings,
    pub logging: LoggingConfig,
}

/// Filesystem locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the instance records
    pub state_dir: PathBuf,
    /// Terminal receiving the record stream
    pub output: PathBuf,
}

/// Sensor device nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub imu: PathBuf,
    pub gnss: PathBuf,
}

/// Acquisition loop tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Bounded wait for one poll on a character device
    pub poll_timeout_ms: u64,
    /// Bounded wait for each discarded warm-up record
    pub warmup_wait_ms: u64,
    /// Consecutive read errors tolerated before the loop exits
    pub max_consecutive_errors: u32,
    /// Time a previous instance gets to exit on `start`
    pub takeover_grace_ms: u64,
    /// Delay between signalling and clearing the record on `stop`
    pub stop_grace_ms: u64,
    /// Write failures at which the daemon exits with status 3
    pub failure_threshold: u64,
}

/// GNSS receiver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GnssSettings {
    /// Notification signal is `SIGRTMIN + notify_signal_offset`
    pub notify_signal_offset: u8,
    /// Notifications a one-shot read waits for a position fix
    pub oneshot_max_fixes: u32,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/mnt/spif"),
            output: PathBuf::from("/dev/ttyACM0"),
        }
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            imu: PathBuf::from("/dev/imu0"),
            gnss: PathBuf::from("/dev/gps"),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            warmup_wait_ms: 1000,
            max_consecutive_errors: 8,
            takeover_grace_ms: 500,
            stop_grace_ms: 100,
            failure_threshold: 3,
        }
    }
}

impl AcquisitionConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn warmup_wait(&self) -> Duration {
        Duration::from_millis(self.warmup_wait_ms)
    }

    pub fn takeover_grace(&self) -> Duration {
        Duration::from_millis(self.takeover_grace_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

impl Default for GnssSettings {
    fn default() -> Self {
        Self {
            notify_signal_offset: 0,
            oneshot_max_fixes: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Loads and persists `DaemonConfig`
#[derive(Debug, Default)]
pub struct ConfigManager {
    config: DaemonConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: DaemonConfig = toml::from_str(&config_str).with_context(|| "Failed to parse config file")?;

        self.config = config;
        self.config_path = Some(path.to_path_buf());

        debug!("Loaded configuration from: {}", path.display());
        Ok(())
    }

    /// Save current configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config_str = toml::to_string_pretty(&self.config)?;

        std::fs::write(path.as_ref(), config_str)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        info!("Saved configuration to: {}", path.as_ref().display());
        Ok(())
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn into_config(self) -> DaemonConfig {
        self.config
    }

    /// Validate configuration
    pub fn validate(config: &DaemonConfig) -> Result<()> {
        if config.paths.state_dir.as_os_str().is_empty() {
            anyhow::bail!("paths.state_dir must not be empty");
        }

        if config.paths.output.as_os_str().is_empty() {
            anyhow::bail!("paths.output must not be empty");
        }

        if config.acquisition.poll_timeout_ms == 0 {
            anyhow::bail!("acquisition.poll_timeout_ms must be > 0");
        }

        if config.acquisition.max_consecutive_errors == 0 {
            anyhow::bail!("acquisition.max_consecutive_errors must be > 0");
        }

        if config.acquisition.failure_threshold == 0 {
            anyhow::bail!("acquisition.failure_threshold must be > 0");
        }

        if config.gnss.oneshot_max_fixes == 0 {
            anyhow::bail!("gnss.oneshot_max_fixes must be > 0");
        }

        if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
            anyhow::bail!("Invalid log level: {}", config.logging.level);
        }

        Ok(())
    }
}
