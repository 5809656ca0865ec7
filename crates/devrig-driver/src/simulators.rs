//! iOS simulator discovery and boot using `xcrun simctl`

use devrig_core::prelude::*;
use devrig_core::{Device, DeviceType, Platform};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;

/// How long a simulator may take to reach `Booted`
const BOOT_TIMEOUT: Duration = Duration::from_secs(60);

const BOOT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const RUNTIME_PREFIX: &str = "com.apple.CoreSimulator.SimRuntime.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IosSimulator {
    pub udid: String,
    pub name: String,
    /// Friendly runtime, e.g. "iOS 17.2"
    pub runtime: String,
    pub major_version: Option<u32>,
    pub state: SimulatorState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorState {
    Shutdown,
    Booted,
    Booting,
    Unknown,
}

impl From<&str> for SimulatorState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "shutdown" => SimulatorState::Shutdown,
            "booted" => SimulatorState::Booted,
            "booting" => SimulatorState::Booting,
            _ => SimulatorState::Unknown,
        }
    }
}

impl IosSimulator {
    pub fn to_device(&self) -> Device {
        let description = format!("{} - {}", self.name, self.runtime);
        let device = match self.state {
            SimulatorState::Booted => Device::connected(
                &self.udid,
                description,
                Platform::Ios,
                DeviceType::Simulator,
            ),
            _ => Device::available_for_launch(
                &self.udid,
                description,
                Platform::Ios,
                DeviceType::Simulator,
            ),
        };
        match self.major_version {
            Some(v) => device.with_os_version(v),
            None => device,
        }
    }
}

/// JSON output from `xcrun simctl list devices -j`
#[derive(Debug, Deserialize)]
struct SimctlOutput {
    devices: HashMap<String, Vec<SimctlDevice>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimctlDevice {
    udid: String,
    name: String,
    state: String,
    #[serde(default)]
    is_available: Option<bool>,
}

/// List available iOS simulators (other simulator OSes are skipped)
pub async fn list_simulators() -> Result<Vec<IosSimulator>> {
    let output = Command::new("xcrun")
        .args(["simctl", "list", "devices", "-j"])
        .output()
        .await
        .map_err(|e| Error::backend_unreachable(format!("Failed to run xcrun simctl: {}", e)))?;

    if !output.status.success() {
        return Err(Error::backend_unreachable("xcrun simctl returned error"));
    }

    parse_simctl_output(&String::from_utf8_lossy(&output.stdout))
}

pub fn parse_simctl_output(json: &str) -> Result<Vec<IosSimulator>> {
    let parsed: SimctlOutput = serde_json::from_str(json)
        .map_err(|e| Error::protocol(format!("Failed to parse simctl output: {}", e)))?;

    let mut simulators = Vec::new();
    for (runtime_key, devices) in parsed.devices {
        let Some((os, version)) = parse_runtime(&runtime_key) else {
            continue;
        };
        if os != "iOS" {
            continue;
        }
        let major_version = version.split('.').next().and_then(|v| v.parse().ok());

        for device in devices {
            if device.is_available == Some(false) {
                continue;
            }
            simulators.push(IosSimulator {
                udid: device.udid,
                name: device.name,
                runtime: format!("{} {}", os, version),
                major_version,
                state: SimulatorState::from(device.state.as_str()),
            });
        }
    }

    simulators.sort_by(|a, b| {
        b.major_version
            .cmp(&a.major_version)
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(simulators)
}

/// "com.apple.CoreSimulator.SimRuntime.iOS-17-2" -> ("iOS", "17.2")
fn parse_runtime(identifier: &str) -> Option<(String, String)> {
    let suffix = identifier.strip_prefix(RUNTIME_PREFIX)?;
    let (os, version) = suffix.split_once('-')?;
    Some((os.to_string(), version.replace('-', ".")))
}

/// Boot a simulator and wait until simctl reports it as booted
pub async fn boot_simulator(udid: &str) -> Result<IosSimulator> {
    if let Some(sim) = find_booted(udid).await? {
        return Ok(sim);
    }

    info!("Booting iOS simulator {}", udid);
    let output = Command::new("xcrun")
        .args(["simctl", "boot", udid])
        .output()
        .await
        .map_err(|e| Error::process(format!("Failed to boot simulator: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // "Unable to boot device in current state: Booted" is not an error
        if !stderr.contains("Booted") {
            return Err(Error::process(format!(
                "Failed to boot simulator: {}",
                stderr.trim()
            )));
        }
    }

    let deadline = tokio::time::Instant::now() + BOOT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if let Some(sim) = find_booted(udid).await? {
            let _ = Command::new("open").args(["-a", "Simulator"]).output().await;
            return Ok(sim);
        }
        tokio::time::sleep(BOOT_POLL_INTERVAL).await;
    }

    Err(Error::device_not_connected(format!(
        "iOS simulator {} (boot timed out)",
        udid
    )))
}

async fn find_booted(udid: &str) -> Result<Option<IosSimulator>> {
    Ok(list_simulators()
        .await?
        .into_iter()
        .find(|s| s.udid.eq_ignore_ascii_case(udid) && s.state == SimulatorState::Booted))
}
