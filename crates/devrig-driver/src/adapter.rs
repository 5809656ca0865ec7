//! Driver Adapter
//!
//! One [`DriverAdapter`] drives one device for the lifetime of a session. The
//! backend variant is fixed at construction as an [`AdapterKind`]; every
//! operation goes through the same contract afterwards.
//!
//! ## Failure policy
//!
//! Backend failures are classified by [`crate::classify::classify`]. A
//! failure classified as unreachable marks the adapter closed; later calls fail
//! fast with `BackendUnreachable` without touching the backend. Only the
//! startup probe in [`DriverAdapter::open`] retries.

use crate::backend::{BackendClient, BackendResult};
use crate::classify::{classify, is_permission_denial};
use crate::gesture::{GestureSequence, GestureSynthesizer, SCROLL_DURATION_MS};
use crate::normalizer;
use crate::permissions::{self, PermissionAction};
use crate::settle::{self, hierarchy_difference, screenshot_difference};
use devrig_core::prelude::*;
use devrig_core::{
    Device, DeviceInfo, DeviceType, KeyCode, Platform, Point, SwipeDirection, TreeNode,
    ViewHierarchy,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Environment override for the driver startup deadline, in milliseconds
pub const ENV_STARTUP_TIMEOUT: &str = "DEVRIG_DRIVER_STARTUP_TIMEOUT";

/// Helper packages installed on Android devices for fresh sessions
pub const DRIVER_PACKAGES: [&str; 2] = ["dev.devrig.driver", "dev.devrig.driver.test"];

/// Port the on-device driver listens on
pub const DRIVER_DEVICE_PORT: u16 = 7001;

/// First API level with `cmd connectivity airplane-mode`
const AIRPLANE_MODE_CMD_MIN_API: u32 = 28;

const ROOT_REQUIRED_MESSAGE: &str = "Toggling airplane mode on this device requires root access. \
     Use an emulator image without Google Play or a rooted device.";

// ─────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Deadline for the startup connectivity probe
    pub startup_timeout: Duration,
    pub startup_poll: Duration,
    /// Reinstall the helper packages when opening a fresh session
    pub reinstall_driver: bool,
    pub driver_artifacts: Vec<PathBuf>,
    /// Host port forwarded to [`DRIVER_DEVICE_PORT`]
    pub host_port: Option<u16>,
    pub settle_poll: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_millis(15_000),
            startup_poll: Duration::from_millis(100),
            reinstall_driver: true,
            driver_artifacts: Vec::new(),
            host_port: None,
            settle_poll: Duration::from_millis(200),
        }
    }
}

impl DriverOptions {
    /// Apply [`ENV_STARTUP_TIMEOUT`] when it holds a valid number
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var(ENV_STARTUP_TIMEOUT) {
            match value.trim().parse::<u64>() {
                Ok(ms) => self.startup_timeout = Duration::from_millis(ms),
                Err(_) => warn!("Ignoring invalid {}={}", ENV_STARTUP_TIMEOUT, value),
            }
        }
        self
    }
}

// ─────────────────────────────────────────────────────────────────
// Kind
// ─────────────────────────────────────────────────────────────────

/// Backend variant, chosen once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Android,
    Ios,
    Web,
    /// A cloud device; `platform` is the OS the hub runs it on
    AutomationHub { platform: Platform },
}

impl AdapterKind {
    pub fn for_device(device: &Device) -> Result<Self> {
        match device.platform {
            Platform::Android => Ok(AdapterKind::Android),
            Platform::Ios => match device.device_type {
                DeviceType::Real | DeviceType::Simulator => Ok(AdapterKind::Ios),
                other => Err(Error::unsupported(
                    "open",
                    format!("iOS {} device", other.label()),
                )),
            },
            Platform::Web => Ok(AdapterKind::Web),
            Platform::AutomationHub => {
                let os = device.instance_id.split(',').next().unwrap_or_default();
                match os.parse::<Platform>() {
                    Ok(platform @ (Platform::Android | Platform::Ios)) => {
                        Ok(AdapterKind::AutomationHub { platform })
                    }
                    _ => Err(Error::unsupported(
                        "open",
                        format!("{} platform '{}'", Platform::AutomationHub, os.trim()),
                    )),
                }
            }
        }
    }

    /// Platform gestures and permissions are expressed for
    pub fn platform(&self) -> Platform {
        match self {
            AdapterKind::Android => Platform::Android,
            AdapterKind::Ios => Platform::Ios,
            AdapterKind::Web => Platform::Web,
            AdapterKind::AutomationHub { platform } => *platform,
        }
    }

    /// Name used in error messages
    pub fn target(&self) -> &'static str {
        match self {
            AdapterKind::Android => "Android",
            AdapterKind::Ios => "iOS",
            AdapterKind::Web => "Web",
            AdapterKind::AutomationHub { .. } => "Automation Hub",
        }
    }

    fn runs_android(&self) -> bool {
        self.platform() == Platform::Android
    }
}

/// Whether [`DriverAdapter::open`] starts the backend or joins a running one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Fresh,
    Join,
}

// ─────────────────────────────────────────────────────────────────
// Adapter
// ─────────────────────────────────────────────────────────────────

pub struct DriverAdapter {
    kind: AdapterKind,
    device: Device,
    client: Arc<dyn BackendClient>,
    options: DriverOptions,
    info: OnceCell<DeviceInfo>,
    opened: AtomicBool,
    /// Set by `close()`
    closed: AtomicBool,
    /// Set when a call classified the backend as gone
    unreachable: AtomicBool,
}

impl std::fmt::Debug for DriverAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverAdapter")
            .field("kind", &self.kind)
            .field("device", &self.device.instance_id)
            .field("backend", &self.client.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl DriverAdapter {
    pub fn new(device: Device, client: Arc<dyn BackendClient>, options: DriverOptions) -> Result<Self> {
        let kind = AdapterKind::for_device(&device)?;
        Ok(Self {
            kind,
            device,
            client,
            options,
            info: OnceCell::new(),
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
        })
    }

    pub fn kind(&self) -> AdapterKind {
        self.kind
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.unreachable.load(Ordering::SeqCst)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::backend_unreachable(format!(
                "{} driver for {} is closed",
                self.kind.target(),
                self.device.instance_id
            )));
        }
        Ok(())
    }

    /// Run one backend call under the failure policy
    async fn call<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = BackendResult<T>>,
    ) -> Result<T> {
        self.ensure_usable()?;
        match fut.await {
            Ok(value) => Ok(value),
            Err(failure) => {
                let classification = classify(operation, self.kind.target(), failure);
                if classification.closes_adapter {
                    self.unreachable.store(true, Ordering::SeqCst);
                }
                Err(classification.error)
            }
        }
    }

    fn require_android(&self, operation: &str) -> Result<()> {
        if self.kind.runs_android() {
            Ok(())
        } else {
            Err(Error::unsupported(operation, self.kind.target()))
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Bring the backend up. A second call after success is a no-op.
    ///
    /// `Fresh` sessions on Android reinstall the helper packages first. Both
    /// modes then probe until the driver answers or the startup deadline
    /// passes, which is the only retrying path in the adapter. A failed open
    /// leaves the adapter unreachable.
    pub async fn open(&self, mode: OpenMode) -> Result<()> {
        if self.opened.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.ensure_usable()?;

        match self.start(mode).await {
            Ok(()) => {
                self.opened.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.unreachable.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn start(&self, mode: OpenMode) -> Result<()> {
        if mode == OpenMode::Fresh && self.kind == AdapterKind::Android {
            if self.options.reinstall_driver {
                self.install_driver().await?;
            }
            if let Some(port) = self.options.host_port {
                self.call("forwardPort", self.client.forward_port(port, DRIVER_DEVICE_PORT))
                    .await?;
            }
        }

        if mode == OpenMode::Join {
            debug!("Joining running {} driver on {}", self.kind.target(), self.device.instance_id);
        }
        self.wait_until_ready().await
    }

    async fn install_driver(&self) -> Result<()> {
        if self.options.driver_artifacts.is_empty() {
            debug!("No driver artifacts configured, skipping installation");
            return Ok(());
        }

        for package in DRIVER_PACKAGES {
            if let Err(e) = self.client.uninstall_app(package).await {
                warn!("Failed to uninstall {}: {}", package, e);
            }
        }

        for artifact in &self.options.driver_artifacts {
            self.client.install_app(artifact).await.map_err(|e| {
                Error::installation(format!("{}: {}", artifact.display(), e.message))
            })?;
        }

        for package in DRIVER_PACKAGES {
            let installed = self.client.is_app_installed(package).await.map_err(|e| {
                Error::installation(format!("could not verify {}: {}", package, e.message))
            })?;
            if !installed {
                return Err(Error::installation(format!(
                    "{} is not installed on {}",
                    package, self.device.instance_id
                )));
            }
        }

        info!("Driver installed on {}", self.device.instance_id);
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.options.startup_timeout;
        loop {
            match self.client.probe().await {
                Ok(()) => return Ok(()),
                Err(failure) => trace!("{} driver not ready: {}", self.kind.target(), failure),
            }
            if tokio::time::Instant::now() >= deadline {
                self.unreachable.store(true, Ordering::SeqCst);
                return Err(Error::driver_timeout(format!(
                    "{} driver on {} did not answer within {} ms",
                    self.kind.target(),
                    self.device.instance_id,
                    self.options.startup_timeout.as_millis()
                )));
            }
            tokio::time::sleep(self.options.startup_poll).await;
        }
    }

    /// Release the backend. Idempotent; every step is best-effort.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(port) = self.options.host_port.filter(|_| self.kind == AdapterKind::Android) {
            if let Err(e) = self.client.remove_port_forward(port).await {
                warn!("Failed to remove port forward {}: {}", port, e);
            }
        }
        if let Err(e) = self.client.quit().await {
            warn!("Failed to quit {}: {}", self.client.name(), e);
        }
        info!("Closed {} driver for {}", self.kind.target(), self.device.instance_id);
    }

    // ─────────────────────────────────────────────────────────────
    // Device state
    // ─────────────────────────────────────────────────────────────

    pub async fn device_info(&self) -> Result<DeviceInfo> {
        self.info
            .get_or_try_init(|| async {
                let size = self.call("deviceInfo", self.client.screen_size()).await?;
                Ok::<_, Error>(DeviceInfo {
                    platform: self.kind.platform(),
                    width_pixels: size.width_pixels,
                    height_pixels: size.height_pixels,
                    width_grid: size.width_grid,
                    height_grid: size.height_grid,
                })
            })
            .await
            .copied()
    }

    pub async fn view_hierarchy(&self) -> Result<ViewHierarchy> {
        let source = self.call("viewHierarchy", self.client.page_source()).await?;
        normalizer::normalize(&source)
    }

    /// Canonical tree, optionally without the on-screen keyboard
    pub async fn capture_hierarchy(&self, exclude_keyboard: bool) -> Result<TreeNode> {
        let root = self.view_hierarchy().await?.root;
        if exclude_keyboard {
            Ok(root.exclude_keyboard().unwrap_or_default())
        } else {
            Ok(root)
        }
    }

    pub async fn is_keyboard_visible(&self) -> Result<bool> {
        let info = self.device_info().await?;
        let root = self.view_hierarchy().await?.root;
        Ok(root
            .filter_out_of_bounds(info.width_grid as i32, info.height_grid as i32)
            .is_some_and(|tree| tree.contains_keyboard()))
    }

    pub async fn take_screenshot(&self) -> Result<Vec<u8>> {
        self.call("takeScreenshot", self.client.screenshot()).await
    }

    /// Whether two consecutive screenshots match within `timeout`
    pub async fn is_screen_static(&self, timeout: Duration) -> Result<bool> {
        let settled = settle::poll_until_stable(
            timeout,
            self.options.settle_poll,
            move || self.take_screenshot(),
            |a: &Vec<u8>, b: &Vec<u8>| screenshot_difference(a, b),
        )
        .await?;
        Ok(settled.stable)
    }

    /// Wait for the hierarchy to stop changing and return the last capture
    ///
    /// Snapshots that fail to parse mid-animation are skipped; `None` means
    /// none parsed before the deadline.
    pub async fn wait_for_settle(&self, timeout: Duration) -> Result<Option<TreeNode>> {
        let settled = settle::poll_until_stable(
            timeout,
            self.options.settle_poll,
            move || async move {
                match self.capture_hierarchy(false).await {
                    Ok(tree) => Ok(Some(tree)),
                    Err(Error::MalformedHierarchy { message }) => {
                        debug!("Skipping unparseable hierarchy: {}", message);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            },
            |a: &Option<TreeNode>, b: &Option<TreeNode>| match (a, b) {
                (Some(a), Some(b)) => hierarchy_difference(a, b),
                _ => 1.0,
            },
        )
        .await?;
        Ok(settled.sample)
    }

    // ─────────────────────────────────────────────────────────────
    // Gestures
    // ─────────────────────────────────────────────────────────────

    async fn gestures(&self) -> Result<GestureSynthesizer> {
        Ok(GestureSynthesizer::new(self.device_info().await?))
    }

    async fn perform(&self, operation: &str, gesture: GestureSequence) -> Result<()> {
        self.call(operation, self.client.perform(&gesture)).await
    }

    pub async fn tap(&self, point: Point) -> Result<()> {
        let gesture = self.gestures().await?.tap(point);
        self.perform("tap", gesture).await
    }

    pub async fn long_press(&self, point: Point) -> Result<()> {
        let gesture = self.gestures().await?.long_press(point);
        self.perform("longPress", gesture).await
    }

    pub async fn swipe(&self, start: Point, end: Point, duration_ms: u64) -> Result<()> {
        let gesture = self.gestures().await?.swipe(start, end, duration_ms);
        self.perform("swipe", gesture).await
    }

    pub async fn swipe_direction(&self, direction: SwipeDirection, duration_ms: u64) -> Result<()> {
        let gesture = self.gestures().await?.directional(direction, duration_ms);
        self.perform("swipe", gesture).await
    }

    pub async fn swipe_from_element(
        &self,
        element: Point,
        direction: SwipeDirection,
        duration_ms: u64,
    ) -> Result<()> {
        let gesture = self
            .gestures()
            .await?
            .from_element(element, direction, duration_ms);
        self.perform("swipe", gesture).await
    }

    pub async fn scroll_vertical(&self) -> Result<()> {
        self.swipe_direction(SwipeDirection::Up, SCROLL_DURATION_MS)
            .await
    }

    // ─────────────────────────────────────────────────────────────
    // Input and apps
    // ─────────────────────────────────────────────────────────────

    pub async fn press_key(&self, code: KeyCode) -> Result<()> {
        self.call("pressKey", self.client.press_key(code)).await
    }

    pub async fn back_press(&self) -> Result<()> {
        self.call("backPress", self.client.back()).await
    }

    pub async fn input_text(&self, text: &str) -> Result<()> {
        self.call("inputText", self.client.input_text(text)).await
    }

    pub async fn launch_app(&self, app_id: &str) -> Result<()> {
        self.call("launchApp", self.client.launch_app(app_id)).await
    }

    pub async fn stop_app(&self, app_id: &str) -> Result<()> {
        self.call("stopApp", self.client.stop_app(app_id)).await
    }

    // ─────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────

    /// Apply a capability → state mapping to `app_id`
    ///
    /// The `all` wildcard expands to the app's declared permissions and is
    /// applied before the named capabilities, so `{all: deny, camera: allow}`
    /// leaves the camera granted. If the declared permissions cannot be read
    /// the wildcard is skipped.
    pub async fn set_permissions(
        &self,
        app_id: &str,
        request: &BTreeMap<String, String>,
    ) -> Result<()> {
        if self.kind == AdapterKind::Web {
            return Err(Error::unsupported("setPermissions", self.kind.target()));
        }

        let plan = permissions::plan(self.kind.platform(), request);

        if let Some(action) = plan.wildcard {
            self.apply_wildcard(app_id, action).await;
        }

        for (permission, action) in &plan.entries {
            self.call(
                "setPermissions",
                self.client.set_permission(app_id, permission, *action),
            )
            .await?;
        }

        Ok(())
    }

    async fn apply_wildcard(&self, app_id: &str, action: PermissionAction) {
        let declared = match self
            .call("setPermissions", self.client.declared_permissions(app_id))
            .await
        {
            Ok(declared) => declared,
            Err(e) => {
                warn!("Could not read permissions declared by {}, ignoring 'all': {}", app_id, e);
                return;
            }
        };

        for (permission, action) in permissions::expand_wildcard(declared, action) {
            if let Err(e) = self
                .call(
                    "setPermissions",
                    self.client.set_permission(app_id, &permission, action),
                )
                .await
            {
                debug!("Could not {} {}: {}", action.as_str(), permission, e);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Airplane mode
    // ─────────────────────────────────────────────────────────────

    /// Shell command whose textual output is checked for a permission denial
    async fn shell_checked(&self, operation: &str, command: &str) -> Result<String> {
        let output = self.call(operation, self.client.shell(command)).await?;
        if is_permission_denial(&output) {
            return Err(Error::permission_denied(output.trim()));
        }
        Ok(output)
    }

    async fn api_level(&self) -> Option<u32> {
        match self.shell_checked("apiLevel", "getprop ro.build.version.sdk").await {
            Ok(out) => out.trim().parse().ok().or(self.device.os_version),
            Err(e) => {
                debug!("Could not read API level: {}", e);
                self.device.os_version
            }
        }
    }

    pub async fn set_airplane_mode(&self, enabled: bool) -> Result<()> {
        self.require_android("setAirplaneMode")?;

        let api = self.api_level().await.unwrap_or(AIRPLANE_MODE_CMD_MIN_API);
        if api >= AIRPLANE_MODE_CMD_MIN_API {
            let state = if enabled { "enable" } else { "disable" };
            self.shell_checked(
                "setAirplaneMode",
                &format!("cmd connectivity airplane-mode {}", state),
            )
            .await?;
            return Ok(());
        }

        let flag = if enabled { 1 } else { 0 };
        self.shell_checked(
            "setAirplaneMode",
            &format!("settings put global airplane_mode_on {}", flag),
        )
        .await?;
        self.broadcast_airplane_mode(enabled).await
    }

    /// Older Android needs a broadcast, which may demand root
    async fn broadcast_airplane_mode(&self, enabled: bool) -> Result<()> {
        let command = format!(
            "am broadcast -a android.intent.action.AIRPLANE_MODE --ez state {}",
            enabled
        );
        match self.shell_checked("setAirplaneMode", &command).await {
            Err(Error::PermissionDenied { .. }) => {
                warn!("Airplane mode broadcast denied, retrying as root");
                self.shell_checked("setAirplaneMode", &format!("su root {}", command))
                    .await
                    .map(|_| ())
                    .map_err(|e| match e {
                        Error::PermissionDenied { .. } => {
                            Error::permission_denied(ROOT_REQUIRED_MESSAGE)
                        }
                        other => other,
                    })
            }
            other => other.map(|_| ()),
        }
    }

    pub async fn is_airplane_mode_enabled(&self) -> Result<bool> {
        self.require_android("isAirplaneModeEnabled")?;

        let output = self
            .shell_checked("isAirplaneModeEnabled", "cmd connectivity airplane-mode")
            .await?;
        match output.trim() {
            "enabled" => Ok(true),
            "disabled" => Ok(false),
            other => {
                debug!("Unexpected airplane-mode output '{}', reading settings", other);
                let setting = self
                    .shell_checked(
                        "isAirplaneModeEnabled",
                        "settings get global airplane_mode_on",
                    )
                    .await?;
                Ok(setting.trim() == "1")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::BackendFailure;
    use crate::gesture::PointerAction;
    use crate::test_utils::{android_device, ios_simulator, FakeBackend};
    use devrig_core::ConnectionState;

    const PAGE: &str = r#"<hierarchy rotation="0">
        <node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="com.example" bounds="[0,0][1000,2000]" visible-to-user="true">
            <node index="0" text="Hello" resource-id="com.example:id/label" class="android.widget.TextView" package="com.example" bounds="[0,100][1000,200]" visible-to-user="true" clickable="true"/>
            <node index="1" text="" resource-id="com.google.android.inputmethod.latin:id/keyboard_holder" class="android.widget.FrameLayout" package="com.google.android.inputmethod.latin" bounds="[0,1400][1000,2000]" visible-to-user="true"/>
        </node>
    </hierarchy>"#;

    fn adapter(backend: &Arc<FakeBackend>, options: DriverOptions) -> DriverAdapter {
        DriverAdapter::new(android_device("emulator-5554"), backend.clone(), options).unwrap()
    }

    fn options() -> DriverOptions {
        DriverOptions {
            startup_timeout: Duration::from_millis(1000),
            ..DriverOptions::default()
        }
    }

    #[test]
    fn test_kind_for_hub_device() {
        let device = Device::connected(
            "ios, iPhone 15, 17",
            "iPhone 15",
            Platform::AutomationHub,
            DeviceType::Real,
        );
        assert_eq!(
            AdapterKind::for_device(&device).unwrap(),
            AdapterKind::AutomationHub {
                platform: Platform::Ios
            }
        );
    }

    #[test]
    fn test_ios_rejects_emulator_device_type() {
        let device = Device {
            instance_id: "X".into(),
            description: "odd".into(),
            platform: Platform::Ios,
            state: ConnectionState::Connected,
            device_type: DeviceType::Emulator,
            os_version: None,
        };
        assert!(matches!(
            AdapterKind::for_device(&device),
            Err(Error::UnsupportedOperation { .. })
        ));
        assert!(AdapterKind::for_device(&ios_simulator("SIM-1", "iPhone 15")).is_ok());
    }

    #[tokio::test]
    async fn test_tap_converts_grid_to_pixels() {
        let backend = Arc::new(FakeBackend::new().with_screen(1080, 2400, 540, 1200));
        let adapter = adapter(&backend, options());

        adapter.tap(Point::new(100, 200)).await.unwrap();

        let gestures = backend.gestures();
        assert_eq!(gestures.len(), 1);
        assert_eq!(
            gestures[0].actions[0],
            PointerAction::Move {
                x: 200,
                y: 400,
                duration_ms: 0
            }
        );
    }

    #[tokio::test]
    async fn test_capture_hierarchy_excludes_keyboard() {
        let backend = Arc::new(FakeBackend::new().with_page_source(PAGE));
        let adapter = adapter(&backend, options());

        let full = adapter.capture_hierarchy(false).await.unwrap();
        let pruned = adapter.capture_hierarchy(true).await.unwrap();

        assert!(full.contains_keyboard());
        assert!(!pruned.contains_keyboard());
        assert_eq!(pruned.children[0].children.len(), 1);
    }

    #[tokio::test]
    async fn test_keyboard_visible() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_screen(1000, 2000, 1000, 2000)
                .with_page_source(PAGE),
        );
        assert!(adapter(&backend, options()).is_keyboard_visible().await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_marks_adapter_closed() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail_next("screenshot", BackendFailure::deadline_exceeded("slow"));
        let adapter = adapter(&backend, options());

        let first = adapter.take_screenshot().await.unwrap_err();
        assert!(first.is_transient());
        assert!(adapter.is_closed());

        let calls_before = backend.calls().len();
        let second = adapter.take_screenshot().await.unwrap_err();
        assert!(matches!(second, Error::BackendUnreachable { .. }));
        assert_eq!(backend.calls().len(), calls_before, "closed adapter must not call the backend");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let backend = Arc::new(FakeBackend::new());
        let adapter = adapter(&backend, options());

        adapter.close().await;
        adapter.close().await;

        assert_eq!(backend.count_calls("quit"), 1);
        assert!(adapter.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_retries_probe_until_ready() {
        let backend = Arc::new(FakeBackend::new().with_probe_failures(3));
        let adapter = adapter(&backend, options());

        adapter.open(OpenMode::Fresh).await.unwrap();
        assert_eq!(backend.count_calls("probe"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_times_out() {
        let backend = Arc::new(FakeBackend::new().with_probe_failures(usize::MAX));
        let adapter = adapter(&backend, options());

        let err = adapter.open(OpenMode::Fresh).await.unwrap_err();
        assert!(matches!(err, Error::DriverTimeout { .. }));
    }

    #[tokio::test]
    async fn test_fresh_open_reinstalls_driver_best_effort() {
        let backend = Arc::new(
            FakeBackend::new().with_installable(&["dev.devrig.driver", "dev.devrig.driver.test"]),
        );
        backend.fail_next("uninstall", BackendFailure::internal("not installed"));
        let adapter = adapter(
            &backend,
            DriverOptions {
                driver_artifacts: vec![PathBuf::from("driver.apk"), PathBuf::from("driver-test.apk")],
                ..options()
            },
        );

        adapter.open(OpenMode::Fresh).await.unwrap();

        assert_eq!(backend.count_calls("uninstall"), 2);
        assert_eq!(backend.count_calls("install"), 2);
    }

    #[tokio::test]
    async fn test_installation_failure_when_not_verified() {
        let backend = Arc::new(FakeBackend::new());
        let adapter = adapter(
            &backend,
            DriverOptions {
                driver_artifacts: vec![PathBuf::from("driver.apk")],
                ..options()
            },
        );

        let err = adapter.open(OpenMode::Fresh).await.unwrap_err();
        assert!(matches!(err, Error::InstallationFailure { .. }));
    }

    #[tokio::test]
    async fn test_retry_after_installation_failure_fails_fast() {
        let backend = Arc::new(FakeBackend::new());
        let adapter = adapter(
            &backend,
            DriverOptions {
                driver_artifacts: vec![PathBuf::from("driver.apk")],
                ..options()
            },
        );

        let first = adapter.open(OpenMode::Fresh).await.unwrap_err();
        assert!(matches!(first, Error::InstallationFailure { .. }));
        assert!(adapter.is_closed());

        let calls_before = backend.calls().len();
        let second = adapter.open(OpenMode::Fresh).await.unwrap_err();
        assert!(matches!(second, Error::BackendUnreachable { .. }));
        assert!(adapter.tap(Point::new(1, 1)).await.is_err());
        assert_eq!(backend.calls().len(), calls_before);
        assert_eq!(backend.count_calls("probe"), 0);
    }

    #[tokio::test]
    async fn test_join_skips_installation() {
        let backend = Arc::new(FakeBackend::new());
        let adapter = adapter(
            &backend,
            DriverOptions {
                driver_artifacts: vec![PathBuf::from("driver.apk")],
                ..options()
            },
        );

        adapter.open(OpenMode::Join).await.unwrap();
        assert_eq!(backend.count_calls("install"), 0);
    }

    #[tokio::test]
    async fn test_wildcard_permissions_expand_from_manifest() {
        let backend = Arc::new(FakeBackend::new().with_declared_permissions(&[
            "android.permission.CAMERA",
            "android.permission.INTERNET",
        ]));
        let adapter = adapter(&backend, options());
        let request = BTreeMap::from([("all".to_string(), "allow".to_string())]);

        adapter.set_permissions("com.example", &request).await.unwrap();

        assert_eq!(
            backend.calls_matching("setPermission"),
            vec![
                "setPermission com.example android.permission.CAMERA grant",
                "setPermission com.example android.permission.INTERNET grant",
            ]
        );
    }

    #[tokio::test]
    async fn test_wildcard_without_manifest_is_noop() {
        let backend = Arc::new(FakeBackend::new());
        let adapter = adapter(&backend, options());
        let request = BTreeMap::from([
            ("all".to_string(), "deny".to_string()),
            ("camera".to_string(), "allow".to_string()),
        ]);

        adapter.set_permissions("com.example", &request).await.unwrap();

        assert_eq!(
            backend.calls_matching("setPermission"),
            vec!["setPermission com.example android.permission.CAMERA grant"]
        );
    }

    #[tokio::test]
    async fn test_airplane_mode_uses_cmd_on_modern_android() {
        let backend = Arc::new(FakeBackend::new().with_shell_response("getprop ro.build.version.sdk", "33\n"));
        let adapter = adapter(&backend, options());

        adapter.set_airplane_mode(true).await.unwrap();

        assert!(backend
            .calls()
            .contains(&"shell cmd connectivity airplane-mode enable".to_string()));
    }

    #[tokio::test]
    async fn test_airplane_mode_broadcast_denied_retries_as_root() {
        let denial = "Security exception: Permission Denial: not allowed to send broadcast android.intent.action.AIRPLANE_MODE";
        let backend = Arc::new(
            FakeBackend::new()
                .with_shell_response("getprop ro.build.version.sdk", "27")
                .with_shell_response("am broadcast", denial)
                .with_shell_response("su root", denial),
        );
        let adapter = adapter(&backend, options());

        let err = adapter.set_airplane_mode(true).await.unwrap_err();

        match err {
            Error::PermissionDenied { message } => assert!(message.contains("root")),
            other => panic!("expected PermissionDenied, got {other:?}"),
        }
        assert!(backend
            .calls()
            .contains(&"shell settings put global airplane_mode_on 1".to_string()));
        assert_eq!(backend.count_calls("shell su root"), 1);
        assert!(!adapter.is_closed());
    }

    #[tokio::test]
    async fn test_airplane_mode_unsupported_on_ios() {
        let backend = Arc::new(FakeBackend::new());
        let adapter =
            DriverAdapter::new(ios_simulator("SIM-1", "iPhone 15"), backend.clone(), options()).unwrap();

        let err = adapter.set_airplane_mode(true).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { .. }));
    }

    #[tokio::test]
    async fn test_is_airplane_mode_enabled() {
        let backend = Arc::new(FakeBackend::new().with_shell_response("cmd connectivity airplane-mode", "enabled\n"));
        assert!(adapter(&backend, options()).is_airplane_mode_enabled().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_settle_returns_tree() {
        let backend = Arc::new(FakeBackend::new().with_page_source(PAGE));
        let adapter = adapter(&backend, options());

        let tree = adapter
            .wait_for_settle(Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tree.children.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_screen_static_times_out_on_changing_screens() {
        let backend = Arc::new(FakeBackend::new().with_screenshots(vec![
            vec![0; 100],
            vec![1; 100],
            vec![2; 100],
            vec![3; 100],
            vec![4; 100],
            vec![5; 100],
            vec![6; 100],
            vec![7; 100],
        ]));
        let adapter = adapter(&backend, options());

        assert!(!adapter.is_screen_static(Duration::from_millis(500)).await.unwrap());
    }
}
