//! Test helpers for driver and session tests
//!
//! Available in this crate's tests and, with the `test-helpers` feature, to
//! downstream crates.

use crate::backend::{BackendClient, BackendConnector, BackendResult, ScreenSize};
use crate::catalog::DeviceProbe;
use crate::classify::BackendFailure;
use crate::gesture::GestureSequence;
use crate::launcher::DeviceLauncher;
use crate::permissions::PermissionAction;
use async_trait::async_trait;
use devrig_core::{ConnectionState, Device, DeviceType, KeyCode, Platform};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ─────────────────────────────────────────────────────────────────
// Device builders
// ─────────────────────────────────────────────────────────────────

pub fn android_device(serial: &str) -> Device {
    let device_type = if serial.starts_with("emulator-") {
        DeviceType::Emulator
    } else {
        DeviceType::Real
    };
    Device::connected(serial, "Android SDK built for x86", Platform::Android, device_type)
}

pub fn ios_simulator(udid: &str, name: &str) -> Device {
    Device::connected(udid, format!("{} - iOS 17.2", name), Platform::Ios, DeviceType::Simulator)
}

pub fn launchable(device: &Device) -> Device {
    Device {
        state: ConnectionState::AvailableForLaunch,
        ..device.clone()
    }
}

// ─────────────────────────────────────────────────────────────────
// Fake backend
// ─────────────────────────────────────────────────────────────────

const DEFAULT_PAGE: &str = r#"<hierarchy rotation="0"><node class="android.widget.FrameLayout" bounds="[0,0][1080,2400]"/></hierarchy>"#;

/// Scripted [`BackendClient`] recording every call it receives
///
/// Calls are recorded as `"<operation> <args...>"`, for example
/// `"shell wm size"` or `"uninstall dev.devrig.driver"`.
pub struct FakeBackend {
    screen: ScreenSize,
    page_sources: Mutex<VecDeque<String>>,
    screenshots: Mutex<VecDeque<Vec<u8>>>,
    shell_responses: Vec<(String, String)>,
    declared_permissions: Option<Vec<String>>,
    installable: Vec<String>,
    installed: Mutex<HashSet<String>>,
    probe_failures: AtomicUsize,
    failures: Mutex<VecDeque<(String, BackendFailure)>>,
    calls: Mutex<Vec<String>>,
    gestures: Mutex<Vec<GestureSequence>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            screen: ScreenSize::pixels(1080, 2400),
            page_sources: Mutex::new(VecDeque::from([DEFAULT_PAGE.to_string()])),
            screenshots: Mutex::new(VecDeque::from([vec![0u8; 64]])),
            shell_responses: Vec::new(),
            declared_permissions: None,
            installable: Vec::new(),
            installed: Mutex::new(HashSet::new()),
            probe_failures: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            gestures: Mutex::new(Vec::new()),
        }
    }

    pub fn with_screen(mut self, width_pixels: u32, height_pixels: u32, width_grid: u32, height_grid: u32) -> Self {
        self.screen = ScreenSize {
            width_pixels,
            height_pixels,
            width_grid,
            height_grid,
        };
        self
    }

    /// Page sources returned in order; the last one repeats
    pub fn with_page_sources(self, sources: &[&str]) -> Self {
        *self.page_sources.lock().unwrap() = sources.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_page_source(self, source: &str) -> Self {
        self.with_page_sources(&[source])
    }

    /// Screenshots returned in order; the last one repeats
    pub fn with_screenshots(self, shots: Vec<Vec<u8>>) -> Self {
        *self.screenshots.lock().unwrap() = shots.into();
        self
    }

    /// Output for shell commands starting with `prefix`; unmatched commands print nothing
    pub fn with_shell_response(mut self, prefix: &str, output: &str) -> Self {
        self.shell_responses.push((prefix.to_string(), output.to_string()));
        self
    }

    pub fn with_declared_permissions(mut self, permissions: &[&str]) -> Self {
        self.declared_permissions = Some(permissions.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Packages that become installed when any artifact is installed
    pub fn with_installable(mut self, packages: &[&str]) -> Self {
        self.installable = packages.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Fail the first `count` probes
    pub fn with_probe_failures(self, count: usize) -> Self {
        self.probe_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Fail the next call of `operation`
    pub fn fail_next(&self, operation: &str, failure: BackendFailure) {
        self.failures
            .lock()
            .unwrap()
            .push_back((operation.to_string(), failure));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    /// Calls of exactly `operation`, or `operation` followed by arguments
    pub fn count_calls(&self, operation: &str) -> usize {
        let with_args = format!("{} ", operation);
        self.calls()
            .iter()
            .filter(|c| *c == operation || c.starts_with(&with_args))
            .count()
    }

    pub fn gestures(&self) -> Vec<GestureSequence> {
        self.gestures.lock().unwrap().clone()
    }

    fn record(&self, operation: &str, args: &[&str]) -> BackendResult<()> {
        let mut entry = operation.to_string();
        for arg in args {
            entry.push(' ');
            entry.push_str(arg);
        }
        self.calls.lock().unwrap().push(entry);

        let mut failures = self.failures.lock().unwrap();
        match failures.iter().position(|(op, _)| op == operation) {
            Some(index) => Err(failures.remove(index).map(|(_, f)| f).unwrap()),
            None => Ok(()),
        }
    }

    fn next_sticky<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl BackendClient for FakeBackend {
    fn name(&self) -> String {
        "fake".to_string()
    }

    async fn probe(&self) -> BackendResult<()> {
        self.record("probe", &[])?;
        let remaining = self.probe_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.probe_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendFailure::unavailable("driver not ready"));
        }
        Ok(())
    }

    async fn quit(&self) -> BackendResult<()> {
        self.record("quit", &[])
    }

    async fn screen_size(&self) -> BackendResult<ScreenSize> {
        self.record("screenSize", &[])?;
        Ok(self.screen)
    }

    async fn page_source(&self) -> BackendResult<String> {
        self.record("pageSource", &[])?;
        Self::next_sticky(&self.page_sources)
            .ok_or_else(|| BackendFailure::internal("no page source scripted"))
    }

    async fn perform(&self, gesture: &GestureSequence) -> BackendResult<()> {
        self.record("perform", &[])?;
        self.gestures.lock().unwrap().push(gesture.clone());
        Ok(())
    }

    async fn screenshot(&self) -> BackendResult<Vec<u8>> {
        self.record("screenshot", &[])?;
        Self::next_sticky(&self.screenshots)
            .ok_or_else(|| BackendFailure::internal("no screenshot scripted"))
    }

    async fn input_text(&self, text: &str) -> BackendResult<()> {
        self.record("inputText", &[text])
    }

    async fn press_key(&self, code: KeyCode) -> BackendResult<()> {
        self.record("pressKey", &[&code.android_code().to_string()])
    }

    async fn back(&self) -> BackendResult<()> {
        self.record("back", &[])
    }

    async fn shell(&self, command: &str) -> BackendResult<String> {
        self.record("shell", &[command])?;
        Ok(self
            .shell_responses
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    async fn launch_app(&self, app_id: &str) -> BackendResult<()> {
        self.record("launchApp", &[app_id])
    }

    async fn stop_app(&self, app_id: &str) -> BackendResult<()> {
        self.record("stopApp", &[app_id])
    }

    async fn is_app_installed(&self, app_id: &str) -> BackendResult<bool> {
        self.record("isAppInstalled", &[app_id])?;
        Ok(self.installed.lock().unwrap().contains(app_id))
    }

    async fn install_app(&self, artifact: &Path) -> BackendResult<()> {
        self.record("install", &[&artifact.to_string_lossy()])?;
        self.installed
            .lock()
            .unwrap()
            .extend(self.installable.iter().cloned());
        Ok(())
    }

    async fn uninstall_app(&self, app_id: &str) -> BackendResult<()> {
        self.record("uninstall", &[app_id])?;
        self.installed.lock().unwrap().remove(app_id);
        Ok(())
    }

    async fn set_permission(
        &self,
        app_id: &str,
        permission: &str,
        action: PermissionAction,
    ) -> BackendResult<()> {
        self.record("setPermission", &[app_id, permission, action.as_str()])
    }

    async fn declared_permissions(&self, app_id: &str) -> BackendResult<Vec<String>> {
        self.record("declaredPermissions", &[app_id])?;
        self.declared_permissions
            .clone()
            .ok_or_else(|| BackendFailure::internal("Unable to find package"))
    }

    async fn forward_port(&self, host_port: u16, device_port: u16) -> BackendResult<()> {
        self.record(
            "forwardPort",
            &[&host_port.to_string(), &device_port.to_string()],
        )
    }

    async fn remove_port_forward(&self, host_port: u16) -> BackendResult<()> {
        self.record("removePortForward", &[&host_port.to_string()])
    }
}

/// Connector handing out one shared [`FakeBackend`]
pub struct FakeConnector {
    backend: Arc<FakeBackend>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(backend: Arc<FakeBackend>) -> Self {
        Self {
            backend,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendConnector for FakeConnector {
    async fn connect(&self, _device: &Device) -> devrig_core::Result<Arc<dyn BackendClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.backend.clone())
    }
}

// ─────────────────────────────────────────────────────────────────
// Probes and launchers
// ─────────────────────────────────────────────────────────────────

/// Probe returning fixed device lists
pub struct StaticProbe {
    platform: Platform,
    connected: Mutex<Vec<Device>>,
    launchable: Vec<Device>,
}

impl StaticProbe {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            connected: Mutex::new(Vec::new()),
            launchable: Vec::new(),
        }
    }

    pub fn with_connected(self, devices: Vec<Device>) -> Self {
        *self.connected.lock().unwrap() = devices;
        self
    }

    pub fn with_launchable(mut self, devices: Vec<Device>) -> Self {
        self.launchable = devices;
        self
    }

    /// Add a device to the connected list, as a launcher would
    pub fn connect(&self, device: Device) {
        self.connected.lock().unwrap().push(device);
    }
}

#[async_trait]
impl DeviceProbe for StaticProbe {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn connected(&self) -> devrig_core::Result<Vec<Device>> {
        Ok(self.connected.lock().unwrap().clone())
    }

    async fn available_for_launch(&self) -> devrig_core::Result<Vec<Device>> {
        Ok(self.launchable.clone())
    }
}

/// Probe whose backend cannot be reached
pub struct FailingProbe {
    platform: Platform,
}

impl FailingProbe {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl DeviceProbe for FailingProbe {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn connected(&self) -> devrig_core::Result<Vec<Device>> {
        Err(devrig_core::Error::backend_unreachable(format!(
            "{} tooling missing",
            self.platform
        )))
    }

    async fn available_for_launch(&self) -> devrig_core::Result<Vec<Device>> {
        self.connected().await
    }
}

/// Launcher that "boots" a device by marking it connected on a [`StaticProbe`]
pub struct FakeLauncher {
    probe: Option<Arc<StaticProbe>>,
    started: Mutex<Vec<Device>>,
}

impl FakeLauncher {
    /// Started devices appear on `probe`
    pub fn new(probe: Arc<StaticProbe>) -> Self {
        Self {
            probe: Some(probe),
            started: Mutex::new(Vec::new()),
        }
    }

    /// Started devices never come online
    pub fn never_connects() -> Self {
        Self {
            probe: None,
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn started(&self) -> Vec<Device> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceLauncher for FakeLauncher {
    async fn start(&self, device: &Device) -> devrig_core::Result<Device> {
        let running = Device {
            state: ConnectionState::Connected,
            ..device.clone()
        };
        self.started.lock().unwrap().push(device.clone());
        if let Some(probe) = &self.probe {
            probe.connect(running.clone());
        }
        Ok(running)
    }
}
