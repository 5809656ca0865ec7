//! Configuration types for devrig
//!
//! `Settings` mirrors `.devrig/config.toml`; every section and field has a
//! default so partial files load.

use devrig_driver::DriverOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application settings (.devrig/config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub driver: DriverSettings,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub selector: SelectorSettings,
}

/// Session sharing and heartbeats
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSettings {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// A session whose last heartbeat is older than this is inactive
    #[serde(default = "default_heartbeat_expiry_ms")]
    pub heartbeat_expiry_ms: u64,

    /// Registry directory (default: platform data dir)
    #[serde(default)]
    pub registry_dir: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_expiry_ms: default_heartbeat_expiry_ms(),
            registry_dir: None,
        }
    }
}

impl SessionSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_expiry(&self) -> Duration {
        Duration::from_millis(self.heartbeat_expiry_ms)
    }

    /// Configured registry directory, else `<data dir>/devrig/sessions`
    pub fn resolved_registry_dir(&self) -> PathBuf {
        self.registry_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("devrig")
                .join("sessions")
        })
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_heartbeat_expiry_ms() -> u64 {
    21_000
}

/// Driver startup and polling
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverSettings {
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    #[serde(default = "default_startup_poll_ms")]
    pub startup_poll_ms: u64,

    /// Reinstall helper packages on fresh Android sessions
    #[serde(default = "default_true")]
    pub reinstall_driver: bool,

    #[serde(default)]
    pub driver_artifacts: Vec<PathBuf>,

    #[serde(default)]
    pub host_port: Option<u16>,

    #[serde(default = "default_settle_poll_ms")]
    pub settle_poll_ms: u64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            startup_timeout_ms: default_startup_timeout_ms(),
            startup_poll_ms: default_startup_poll_ms(),
            reinstall_driver: true,
            driver_artifacts: Vec::new(),
            host_port: None,
            settle_poll_ms: default_settle_poll_ms(),
        }
    }
}

impl DriverSettings {
    /// Adapter options, with the startup-timeout environment override applied
    pub fn to_options(&self) -> DriverOptions {
        DriverOptions {
            startup_timeout: Duration::from_millis(self.startup_timeout_ms),
            startup_poll: Duration::from_millis(self.startup_poll_ms),
            reinstall_driver: self.reinstall_driver,
            driver_artifacts: self.driver_artifacts.clone(),
            host_port: self.host_port,
            settle_poll: Duration::from_millis(self.settle_poll_ms),
        }
        .with_env_overrides()
    }
}

fn default_startup_timeout_ms() -> u64 {
    15_000
}

fn default_startup_poll_ms() -> u64 {
    100
}

fn default_settle_poll_ms() -> u64 {
    200
}

fn default_true() -> bool {
    true
}

/// Automation hub
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HubSettings {
    /// Hub endpoint; credentials come from the environment
    #[serde(default)]
    pub url: Option<String>,

    /// Capabilities file, relative to the project directory
    #[serde(default = "default_capabilities_file")]
    pub capabilities_file: PathBuf,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            url: None,
            capabilities_file: default_capabilities_file(),
        }
    }
}

fn default_capabilities_file() -> PathBuf {
    PathBuf::from(".devrig/hub_capabilities.json")
}

/// Defaults offered by the launch flow
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectorSettings {
    #[serde(default = "default_android_version")]
    pub android_version: u32,

    #[serde(default = "default_ios_version")]
    pub ios_version: u32,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            android_version: default_android_version(),
            ios_version: default_ios_version(),
        }
    }
}

fn default_android_version() -> u32 {
    30
}

fn default_ios_version() -> u32 {
    16
}
