//! Daemon configuration
//!
//! Loaded from a TOML file in the platform config directory (or the path in
//! `FABRIKD_CONFIG`), with defaults that bring the daemon up against the
//! simulated device on a well-known socket when no file exists.

use anyhow::{bail, Context};
use fabrikd_device::link::DeviceFamily;
use fabrikd_device::pipeline::PipelineConfig;
use fabrikd_server::daemon::DaemonConfig;
use fabrikd_server::controller::ControllerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Device selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Device family behind the link (`sim`, `reprap`, `makerbot`)
    pub family: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            family: "sim".to_string(),
        }
    }
}

/// Cadences and retry discipline, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Broadcast tick period
    pub broadcast_interval_ms: u64,
    /// Telemetry poll period
    pub poll_interval_ms: u64,
    /// Delay before the identification batch on startup
    pub identify_delay_ms: u64,
    /// Backoff between retries of one command
    pub retry_backoff_ms: u64,
    /// Settle delay before a newly armed command batch
    pub settle_delay_ms: u64,
    /// Consecutive transient failures before liveness is lost
    pub fail_threshold: u32,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            broadcast_interval_ms: 1000,
            poll_interval_ms: 1000,
            identify_delay_ms: 1000,
            retry_backoff_ms: 100,
            settle_delay_ms: 100,
            fail_threshold: 25,
        }
    }
}

/// Top-level daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Control socket path
    pub socket_path: PathBuf,
    /// Device selection
    pub device: DeviceSettings,
    /// Cadences and retry discipline
    pub timing: TimingSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/fabrikd.sock"),
            device: DeviceSettings::default(),
            timing: TimingSettings::default(),
        }
    }
}

impl Config {
    /// Platform default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fabrikd").join("config.toml"))
    }

    /// Load configuration, falling back to defaults when no file exists
    ///
    /// `FABRIKD_CONFIG` overrides the platform location; naming a missing
    /// file explicitly is an error, a missing default file is not.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var("FABRIKD_CONFIG") {
            return Self::load_from(Path::new(&path));
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// The configured device family
    pub fn device_family(&self) -> anyhow::Result<DeviceFamily> {
        match DeviceFamily::parse(&self.device.family) {
            Some(family) => Ok(family),
            None => bail!("unknown device family '{}'", self.device.family),
        }
    }

    /// Assemble the daemon configuration
    pub fn daemon_config(&self) -> DaemonConfig {
        let t = &self.timing;
        DaemonConfig {
            socket_path: self.socket_path.clone(),
            controller: ControllerConfig {
                broadcast_interval: Duration::from_millis(t.broadcast_interval_ms),
                poll_interval: Duration::from_millis(t.poll_interval_ms),
                identify_delay: Duration::from_millis(t.identify_delay_ms),
            },
            pipeline: PipelineConfig {
                retry_backoff: Duration::from_millis(t.retry_backoff_ms),
                settle_delay: Duration::from_millis(t.settle_delay_ms),
                fail_threshold: t.fail_threshold,
            },
        }
    }
}
