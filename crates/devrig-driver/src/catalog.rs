//! Device Catalog
//!
//! Pure query over every platform probe. The catalog keeps no state: each
//! call re-queries the backends. A probe that cannot be reached contributes
//! zero devices instead of failing the whole listing.

use crate::hub::HubCapabilities;
use crate::{adb, avds, simulators, ToolAvailability};
use async_trait::async_trait;
use devrig_core::prelude::*;
use devrig_core::{Device, Platform};
use std::path::PathBuf;
use std::sync::Arc;

/// One platform's source of devices
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    fn platform(&self) -> Platform;

    async fn connected(&self) -> Result<Vec<Device>>;

    async fn available_for_launch(&self) -> Result<Vec<Device>> {
        Ok(Vec::new())
    }
}

// ─────────────────────────────────────────────────────────────────
// System probes
// ─────────────────────────────────────────────────────────────────

/// Android devices over adb; AVDs are launchable
pub struct AdbProbe {
    tools: ToolAvailability,
}

impl AdbProbe {
    pub fn new(tools: ToolAvailability) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl DeviceProbe for AdbProbe {
    fn platform(&self) -> Platform {
        Platform::Android
    }

    async fn connected(&self) -> Result<Vec<Device>> {
        if let Some(message) = self.tools.android_unavailable_message() {
            return Err(Error::backend_unreachable(message));
        }
        adb::list_connected(&self.tools).await
    }

    async fn available_for_launch(&self) -> Result<Vec<Device>> {
        let avds = avds::list_avds(&self.tools).await?;
        Ok(avds.iter().map(|avd| avd.to_device()).collect())
    }
}

/// iOS simulators through `xcrun simctl`
pub struct SimctlProbe {
    tools: ToolAvailability,
}

impl SimctlProbe {
    pub fn new(tools: ToolAvailability) -> Self {
        Self { tools }
    }

    async fn simulators(&self) -> Result<Vec<Device>> {
        if let Some(message) = self.tools.ios_unavailable_message() {
            return Err(Error::backend_unreachable(message));
        }
        let sims = simulators::list_simulators().await?;
        Ok(sims.iter().map(|s| s.to_device()).collect())
    }
}

#[async_trait]
impl DeviceProbe for SimctlProbe {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    async fn connected(&self) -> Result<Vec<Device>> {
        Ok(self
            .simulators()
            .await?
            .into_iter()
            .filter(Device::is_connected)
            .collect())
    }

    async fn available_for_launch(&self) -> Result<Vec<Device>> {
        Ok(self
            .simulators()
            .await?
            .into_iter()
            .filter(|d| !d.is_connected())
            .collect())
    }
}

/// Cloud devices listed in the hub capabilities file
pub struct HubProbe {
    capabilities_file: PathBuf,
}

impl HubProbe {
    pub fn new(capabilities_file: impl Into<PathBuf>) -> Self {
        Self {
            capabilities_file: capabilities_file.into(),
        }
    }
}

#[async_trait]
impl DeviceProbe for HubProbe {
    fn platform(&self) -> Platform {
        Platform::AutomationHub
    }

    async fn connected(&self) -> Result<Vec<Device>> {
        let caps = HubCapabilities::load(&self.capabilities_file)?;
        Ok(caps.enabled_devices().map(|d| d.to_device()).collect())
    }
}

// ─────────────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct DeviceCatalog {
    probes: Vec<Arc<dyn DeviceProbe>>,
}

impl DeviceCatalog {
    pub fn new(probes: Vec<Arc<dyn DeviceProbe>>) -> Self {
        Self { probes }
    }

    /// Catalog over the host's tools; the hub probe is added when its file exists
    pub fn system(tools: ToolAvailability, hub_capabilities: Option<PathBuf>) -> Self {
        let mut probes: Vec<Arc<dyn DeviceProbe>> = vec![
            Arc::new(AdbProbe::new(tools.clone())),
            Arc::new(SimctlProbe::new(tools)),
        ];
        if let Some(path) = hub_capabilities.filter(|p| p.is_file()) {
            probes.push(Arc::new(HubProbe::new(path)));
        }
        Self { probes }
    }

    pub fn with_probe(mut self, probe: Arc<dyn DeviceProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    fn probes_for(&self, filter: Option<Platform>) -> impl Iterator<Item = &Arc<dyn DeviceProbe>> {
        self.probes
            .iter()
            .filter(move |p| filter.map_or(true, |f| p.platform() == f))
    }

    /// Connected devices; the browser device only when Web is requested
    pub async fn list_connected(&self, filter: Option<Platform>) -> Vec<Device> {
        if filter == Some(Platform::Web) {
            return vec![Device::browser()];
        }

        let mut devices = Vec::new();
        for probe in self.probes_for(filter) {
            match probe.connected().await {
                Ok(found) => devices.extend(found),
                Err(e) => warn!(
                    "Could not list connected {} devices: {}",
                    probe.platform().description(),
                    e
                ),
            }
        }
        devices
    }

    pub async fn list_available_for_launch(&self, filter: Option<Platform>) -> Vec<Device> {
        if filter == Some(Platform::Web) {
            return vec![Device::browser()];
        }

        let mut devices = Vec::new();
        for probe in self.probes_for(filter) {
            match probe.available_for_launch().await {
                Ok(found) => devices.extend(found),
                Err(e) => warn!(
                    "Could not list launchable {} devices: {}",
                    probe.platform().description(),
                    e
                ),
            }
        }
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{android_device, ios_simulator, FailingProbe, StaticProbe};

    fn catalog() -> DeviceCatalog {
        DeviceCatalog::new(vec![
            Arc::new(StaticProbe::new(Platform::Android).with_connected(vec![android_device("emulator-5554")])),
            Arc::new(FailingProbe::new(Platform::Ios)),
        ])
    }

    #[tokio::test]
    async fn test_unreachable_probe_counts_as_zero_devices() {
        let devices = catalog().list_connected(None).await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].instance_id, "emulator-5554");
    }

    #[tokio::test]
    async fn test_platform_filter() {
        let catalog = DeviceCatalog::new(vec![
            Arc::new(StaticProbe::new(Platform::Android).with_connected(vec![android_device("emulator-5554")])),
            Arc::new(StaticProbe::new(Platform::Ios).with_connected(vec![ios_simulator("SIM-1", "iPhone 15")])),
        ]);
        let ios = catalog.list_connected(Some(Platform::Ios)).await;
        assert_eq!(ios.len(), 1);
        assert_eq!(ios[0].platform, Platform::Ios);
    }

    #[tokio::test]
    async fn test_web_filter_returns_browser() {
        let devices = catalog().list_connected(Some(Platform::Web)).await;
        assert_eq!(devices, vec![Device::browser()]);
    }

    #[tokio::test]
    async fn test_unfiltered_listing_excludes_browser() {
        let devices = catalog().list_connected(None).await;
        assert!(devices.iter().all(|d| d.platform != Platform::Web));
    }

    #[tokio::test]
    async fn test_hub_probe_reads_enabled_devices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub_capabilities.json");
        std::fs::write(
            &path,
            r#"{"devices":[
                {"enabled":true,"platformName":"android","deviceName":"Pixel 7","platformVersion":"13"},
                {"enabled":false,"platformName":"ios","deviceName":"iPhone 14","platformVersion":"16"}
            ]}"#,
        )
        .unwrap();

        let catalog = DeviceCatalog::default().with_probe(Arc::new(HubProbe::new(&path)));
        let devices = catalog.list_connected(Some(Platform::AutomationHub)).await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].instance_id, "android, Pixel 7, 13");
    }

    #[tokio::test]
    async fn test_missing_hub_file_is_zero_devices() {
        let catalog = DeviceCatalog::default().with_probe(Arc::new(HubProbe::new("/nonexistent/hub.json")));
        assert!(catalog.list_connected(None).await.is_empty());
    }
}
