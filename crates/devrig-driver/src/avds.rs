//! Android Virtual Device discovery and boot
//!
//! Lists AVDs with `emulator -list-avds` and boots them in the background.
//! Hardware profiles for new AVDs come from `avdmanager list device`.

use crate::ToolAvailability;
use devrig_core::prelude::*;
use devrig_core::{Device, DeviceType, Platform};
use regex::Regex;
use std::sync::LazyLock;
use tokio::process::Command;
use tokio::time::Duration;

/// Delay to wait after starting emulator for initialization
const AVD_INIT_DELAY: Duration = Duration::from_secs(2);

static API_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_API_(\d+)$").expect("Invalid API pattern regex"));

/// `id: 12 or "pixel_6"`
static PROFILE_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^id:\s*\d+\s+or\s+"([^"]+)""#).expect("Invalid profile id regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidAvd {
    /// AVD name (used for boot command)
    pub name: String,
    pub display_name: String,
    pub api_level: Option<u32>,
}

impl AndroidAvd {
    pub fn to_device(&self) -> Device {
        let description = match self.api_level {
            Some(api) => format!("{} (API {})", self.display_name, api),
            None => self.display_name.clone(),
        };
        let device = Device::available_for_launch(
            &self.name,
            description,
            Platform::Android,
            DeviceType::Emulator,
        );
        match self.api_level {
            Some(api) => device.with_os_version(api),
            None => device,
        }
    }
}

pub async fn list_avds(tools: &ToolAvailability) -> Result<Vec<AndroidAvd>> {
    let emulator = tools
        .emulator_path
        .as_deref()
        .ok_or_else(|| Error::backend_unreachable("Android emulator not available"))?;

    let output = Command::new(emulator)
        .arg("-list-avds")
        .output()
        .await
        .map_err(|e| Error::backend_unreachable(format!("Failed to run emulator: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::process(format!(
            "emulator -list-avds failed: {}",
            stderr.trim()
        )));
    }

    Ok(parse_avd_list(&String::from_utf8_lossy(&output.stdout)))
}

/// One AVD name per line; emulator warnings (`INFO |`, `WARNING |`) are skipped
pub fn parse_avd_list(output: &str) -> Vec<AndroidAvd> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains(' '))
        .map(|name| {
            let (display_name, api_level) = parse_avd_name(name);
            AndroidAvd {
                name: name.to_string(),
                display_name,
                api_level,
            }
        })
        .collect()
}

/// "Pixel_6_API_33" -> ("Pixel 6", Some(33))
fn parse_avd_name(name: &str) -> (String, Option<u32>) {
    if let Some(caps) = API_PATTERN.captures(name) {
        let api_level = caps.get(1).and_then(|m| m.as_str().parse().ok());
        let display = API_PATTERN.replace(name, "").replace('_', " ");
        return (display.trim().to_string(), api_level);
    }
    (name.replace('_', " "), None)
}

/// A hardware profile as listed by `avdmanager list device`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvdProfile {
    pub id: String,
    pub name: String,
}

impl AvdProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Profile used when the installed profiles are unknown
    pub fn default_pixel() -> Self {
        Self::new("pixel_6", "Pixel 6")
    }
}

pub async fn list_hardware_profiles(tools: &ToolAvailability) -> Result<Vec<AvdProfile>> {
    let avdmanager = tools
        .avdmanager()
        .ok_or_else(|| Error::process("avdmanager not available"))?;

    let output = Command::new(&avdmanager)
        .args(["list", "device"])
        .output()
        .await
        .map_err(|e| Error::process(format!("Failed to run avdmanager: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::process(format!(
            "avdmanager list device failed: {}",
            stderr.trim()
        )));
    }

    Ok(parse_hardware_profiles(&String::from_utf8_lossy(&output.stdout)))
}

/// Pairs each `id: N or "<id>"` line with the `Name:` line that follows it
pub fn parse_hardware_profiles(output: &str) -> Vec<AvdProfile> {
    let mut profiles = Vec::new();
    let mut pending: Option<String> = None;

    for line in output.lines().map(str::trim) {
        if let Some(caps) = PROFILE_ID_PATTERN.captures(line) {
            pending = Some(caps[1].to_string());
        } else if let Some(name) = line.strip_prefix("Name:") {
            if let Some(id) = pending.take() {
                profiles.push(AvdProfile::new(id, name.trim()));
            }
        }
    }

    profiles
}

/// Launch the emulator for `avd_name` in the background and return
pub async fn boot_avd(avd_name: &str, tools: &ToolAvailability) -> Result<()> {
    let emulator = tools
        .emulator_path
        .as_deref()
        .ok_or_else(|| Error::process("Android emulator not available"))?;

    info!("Starting emulator for AVD {}", avd_name);
    let mut child = Command::new(emulator)
        .args(["-avd", avd_name, "-netdelay", "none", "-netspeed", "full"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| Error::process(format!("Failed to start emulator: {}", e)))?;

    // Detached: the emulator outlives this process
    tokio::spawn(async move {
        let _ = child.wait().await;
    });

    tokio::time::sleep(AVD_INIT_DELAY).await;
    Ok(())
}
