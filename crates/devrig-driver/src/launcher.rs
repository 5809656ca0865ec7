//! Starting devices that are available for launch
//!
//! The selector hands an `AvailableForLaunch` descriptor to a
//! [`DeviceLauncher`]; the returned device is then re-checked as connected.

use crate::{adb, avds, simulators, ToolAvailability};
use async_trait::async_trait;
use devrig_core::prelude::*;
use devrig_core::{Device, Platform};
use std::collections::HashSet;
use std::time::Duration;

/// How long a booting emulator may take to show up in `adb devices`
const EMULATOR_BOOT_TIMEOUT: Duration = Duration::from_secs(120);

const EMULATOR_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[async_trait]
pub trait DeviceLauncher: Send + Sync {
    /// Start `device` and return its connected descriptor
    async fn start(&self, device: &Device) -> Result<Device>;
}

/// Launcher using the Android emulator and `xcrun simctl`
pub struct SystemLauncher {
    tools: ToolAvailability,
    boot_timeout: Duration,
}

impl SystemLauncher {
    pub fn new(tools: ToolAvailability) -> Self {
        Self {
            tools,
            boot_timeout: EMULATOR_BOOT_TIMEOUT,
        }
    }

    async fn start_avd(&self, device: &Device) -> Result<Device> {
        let known = avds::list_avds(&self.tools).await?;
        if !known.iter().any(|avd| avd.name == device.instance_id) {
            return Err(Error::device_not_connected(format!(
                "{} (AVD '{}' does not exist; create it with avdmanager or Android Studio)",
                device.description, device.instance_id
            )));
        }

        let before: HashSet<String> = adb::list_connected(&self.tools)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|d| d.instance_id)
            .collect();

        avds::boot_avd(&device.instance_id, &self.tools).await?;

        let deadline = tokio::time::Instant::now() + self.boot_timeout;
        while tokio::time::Instant::now() < deadline {
            for candidate in adb::list_connected(&self.tools).await.unwrap_or_default() {
                if before.contains(&candidate.instance_id) {
                    continue;
                }
                let avd = adb::emulator_avd_name(&self.tools, &candidate.instance_id).await;
                if avd.as_deref() == Some(device.instance_id.as_str()) {
                    info!("Emulator {} is up as {}", device.instance_id, candidate.instance_id);
                    return Ok(match device.os_version {
                        Some(v) => candidate.with_os_version(v),
                        None => candidate,
                    });
                }
            }
            tokio::time::sleep(EMULATOR_POLL_INTERVAL).await;
        }

        Err(Error::device_not_connected(format!(
            "{} (emulator did not come online)",
            device.description
        )))
    }

    async fn start_simulator(&self, device: &Device) -> Result<Device> {
        let sims = simulators::list_simulators().await?;
        let sim = sims
            .iter()
            .find(|s| s.udid.eq_ignore_ascii_case(&device.instance_id))
            .or_else(|| sims.iter().find(|s| s.name == device.instance_id))
            .ok_or_else(|| {
                Error::device_not_connected(format!(
                    "{} (no simulator named '{}'; create it with xcrun simctl create)",
                    device.description, device.instance_id
                ))
            })?;

        Ok(simulators::boot_simulator(&sim.udid).await?.to_device())
    }
}

#[async_trait]
impl DeviceLauncher for SystemLauncher {
    async fn start(&self, device: &Device) -> Result<Device> {
        if device.is_connected() {
            return Ok(device.clone());
        }

        match device.platform {
            Platform::Android => self.start_avd(device).await,
            Platform::Ios => self.start_simulator(device).await,
            Platform::Web => Ok(Device::browser()),
            Platform::AutomationHub => Err(Error::unsupported(
                "startDevice",
                Platform::AutomationHub.description(),
            )),
        }
    }
}
